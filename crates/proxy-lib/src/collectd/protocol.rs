//! collectd binary network protocol decoder
//!
//! A datagram is a sequence of parts, each `type: u16be, length: u16be,
//! payload`, where the length includes the 4-byte header. Identity parts
//! (host, plugin, type, ...) update the running state; each values part emits
//! one sample carrying that state.

use crate::models::{Sample, Value};
use thiserror::Error;

const PART_HOST: u16 = 0x0000;
const PART_TIME: u16 = 0x0001;
const PART_PLUGIN: u16 = 0x0002;
const PART_PLUGIN_INSTANCE: u16 = 0x0003;
const PART_TYPE: u16 = 0x0004;
const PART_TYPE_INSTANCE: u16 = 0x0005;
const PART_VALUES: u16 = 0x0006;
const PART_INTERVAL: u16 = 0x0007;
const PART_TIME_HR: u16 = 0x0008;
const PART_INTERVAL_HR: u16 = 0x0009;
const PART_MESSAGE: u16 = 0x0100;
const PART_SEVERITY: u16 = 0x0101;
const PART_SIGNATURE: u16 = 0x0200;
const PART_ENCRYPTION: u16 = 0x0210;

const DS_TYPE_COUNTER: u8 = 0;
const DS_TYPE_GAUGE: u8 = 1;
const DS_TYPE_DERIVE: u8 = 2;
const DS_TYPE_ABSOLUTE: u8 = 3;

const HEADER_LEN: usize = 4;

/// Errors raised while decoding a datagram
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated part header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("part 0x{part_type:04x} at offset {offset} declares invalid length {length}")]
    InvalidLength {
        part_type: u16,
        offset: usize,
        length: usize,
    },

    #[error("part 0x{part_type:04x} has payload of {actual} bytes, expected {expected}")]
    PayloadSize {
        part_type: u16,
        expected: usize,
        actual: usize,
    },

    #[error("string part 0x{part_type:04x} is not valid null-terminated UTF-8")]
    InvalidString { part_type: u16 },

    #[error("unknown data source type {0}")]
    UnknownDataType(u8),

    #[error("time part 0x{part_type:04x} value {raw} is out of range")]
    InvalidTime { part_type: u16, raw: u64 },

    #[error("encrypted packets are not supported")]
    Encrypted,
}

/// Identity and time accumulated while walking the parts
#[derive(Debug, Default)]
struct State {
    host: String,
    plugin: String,
    plugin_instance: String,
    type_name: String,
    type_instance: String,
    time_ms: i64,
}

impl State {
    fn sample(&self, values: Vec<Value>) -> Sample {
        Sample {
            host: self.host.clone(),
            plugin: self.plugin.clone(),
            plugin_instance: non_empty(&self.plugin_instance),
            type_name: self.type_name.clone(),
            type_instance: non_empty(&self.type_instance),
            values,
            time_ms: self.time_ms,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Decode one datagram into the samples it carries
pub fn decode_packet(buf: &[u8]) -> Result<Vec<Sample>, DecodeError> {
    let mut state = State::default();
    let mut samples = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        if buf.len() - offset < HEADER_LEN {
            return Err(DecodeError::TruncatedHeader { offset });
        }

        let part_type = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let length = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        if length < HEADER_LEN || offset + length > buf.len() {
            return Err(DecodeError::InvalidLength {
                part_type,
                offset,
                length,
            });
        }

        let payload = &buf[offset + HEADER_LEN..offset + length];
        match part_type {
            PART_HOST => state.host = parse_string(part_type, payload)?,
            PART_PLUGIN => state.plugin = parse_string(part_type, payload)?,
            PART_PLUGIN_INSTANCE => state.plugin_instance = parse_string(part_type, payload)?,
            PART_TYPE => state.type_name = parse_string(part_type, payload)?,
            PART_TYPE_INSTANCE => state.type_instance = parse_string(part_type, payload)?,
            PART_TIME => {
                let secs = parse_u64(part_type, payload)?;
                state.time_ms = i64::try_from(secs)
                    .ok()
                    .and_then(|secs| secs.checked_mul(1000))
                    .ok_or(DecodeError::InvalidTime {
                        part_type,
                        raw: secs,
                    })?;
            }
            PART_TIME_HR => {
                let hr = parse_u64(part_type, payload)?;
                state.time_ms = hr_to_millis(hr).ok_or(DecodeError::InvalidTime {
                    part_type,
                    raw: hr,
                })?;
            }
            PART_INTERVAL | PART_INTERVAL_HR => {
                parse_u64(part_type, payload)?;
            }
            PART_VALUES => samples.push(state.sample(parse_values(payload)?)),
            PART_MESSAGE | PART_SEVERITY | PART_SIGNATURE => {}
            PART_ENCRYPTION => return Err(DecodeError::Encrypted),
            // Unknown parts are skipped for forward compatibility
            _ => {}
        }

        offset += length;
    }

    Ok(samples)
}

/// Convert collectd high-resolution time (2^-30 s units) to milliseconds
fn hr_to_millis(hr: u64) -> Option<i64> {
    let secs = i64::try_from(hr >> 30).ok()?;
    let frac = i64::try_from(((hr & ((1 << 30) - 1)) * 1000) >> 30).ok()?;
    secs.checked_mul(1000)?.checked_add(frac)
}

fn parse_string(part_type: u16, payload: &[u8]) -> Result<String, DecodeError> {
    match payload.split_last() {
        Some((&0, body)) => std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidString { part_type }),
        _ => Err(DecodeError::InvalidString { part_type }),
    }
}

fn parse_u64(part_type: u16, payload: &[u8]) -> Result<u64, DecodeError> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| DecodeError::PayloadSize {
        part_type,
        expected: 8,
        actual: payload.len(),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn parse_values(payload: &[u8]) -> Result<Vec<Value>, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::PayloadSize {
            part_type: PART_VALUES,
            expected: 2,
            actual: payload.len(),
        });
    }

    let count = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let expected = 2 + count * 9;
    if payload.len() != expected {
        return Err(DecodeError::PayloadSize {
            part_type: PART_VALUES,
            expected,
            actual: payload.len(),
        });
    }

    let types = &payload[2..2 + count];
    let data = &payload[2 + count..];

    types
        .iter()
        .zip(data.chunks_exact(8))
        .map(|(&ds_type, chunk)| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            match ds_type {
                DS_TYPE_COUNTER => Ok(Value::Counter(u64::from_be_bytes(raw))),
                // Gauges are the one little-endian field in the protocol
                DS_TYPE_GAUGE => Ok(Value::Gauge(f64::from_le_bytes(raw))),
                DS_TYPE_DERIVE => Ok(Value::Derive(i64::from_be_bytes(raw))),
                DS_TYPE_ABSOLUTE => Ok(Value::Absolute(u64::from_be_bytes(raw))),
                other => Err(DecodeError::UnknownDataType(other)),
            }
        })
        .collect()
}

/// Encoder used to build test datagrams
#[cfg(test)]
pub(crate) mod encode {
    use super::*;

    pub fn string_part(part_type: u16, value: &str) -> Vec<u8> {
        let len = (HEADER_LEN + value.len() + 1) as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&part_type.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(0);
        out
    }

    pub fn u64_part(part_type: u16, value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&part_type.to_be_bytes());
        out.extend_from_slice(&12u16.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    pub fn values_part(values: &[Value]) -> Vec<u8> {
        let len = (HEADER_LEN + 2 + values.len() * 9) as u16;
        let mut out = Vec::new();
        out.extend_from_slice(&PART_VALUES.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&(values.len() as u16).to_be_bytes());
        for value in values {
            out.push(match value {
                Value::Counter(_) => DS_TYPE_COUNTER,
                Value::Gauge(_) => DS_TYPE_GAUGE,
                Value::Derive(_) => DS_TYPE_DERIVE,
                Value::Absolute(_) => DS_TYPE_ABSOLUTE,
            });
        }
        for value in values {
            match *value {
                Value::Counter(v) | Value::Absolute(v) => out.extend_from_slice(&v.to_be_bytes()),
                Value::Gauge(v) => out.extend_from_slice(&v.to_le_bytes()),
                Value::Derive(v) => out.extend_from_slice(&v.to_be_bytes()),
            }
        }
        out
    }

    /// A full packet for one sample using second-resolution time
    pub fn packet(
        host: &str,
        plugin: &str,
        plugin_instance: &str,
        type_name: &str,
        type_instance: &str,
        time_secs: u64,
        values: &[Value],
    ) -> Vec<u8> {
        [
            string_part(PART_HOST, host),
            u64_part(PART_TIME, time_secs),
            string_part(PART_PLUGIN, plugin),
            string_part(PART_PLUGIN_INSTANCE, plugin_instance),
            string_part(PART_TYPE, type_name),
            string_part(PART_TYPE_INSTANCE, type_instance),
            values_part(values),
        ]
        .concat()
    }
}
