//! UDP listener for collectd network packets

use super::protocol::decode_packet;
use crate::models::Sample;
use crate::observability::ProxyMetrics;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Largest datagram collectd can emit
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Pause after a failed receive so a persistent socket error cannot spin
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Default channel capacity between the listener and the pipeline
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Receives collectd datagrams and forwards decoded samples
pub struct CollectdListener {
    socket: UdpSocket,
    samples_tx: mpsc::Sender<Sample>,
    metrics: Option<ProxyMetrics>,
}

impl CollectdListener {
    /// Bind the UDP socket
    pub async fn bind(addr: &str, samples_tx: mpsc::Sender<Sample>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind collectd listener on {}", addr))?;

        Ok(Self {
            socket,
            samples_tx,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: ProxyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Receive until shutdown or until the pipeline goes away
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?self.socket.local_addr().ok(), "Starting collectd listener");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received,
                _ = shutdown.recv() => {
                    info!("Shutting down collectd listener");
                    break;
                }
            };

            let (len, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Failed to receive datagram");
                    if back_off(&mut shutdown).await {
                        info!("Shutting down collectd listener");
                        break;
                    }
                    continue;
                }
            };

            match self.forward(&buf[..len], peer, &mut shutdown).await {
                Ok(()) => {}
                Err(Halt::ChannelClosed) => {
                    info!("Sample channel closed, stopping collectd listener");
                    break;
                }
                Err(Halt::Shutdown) => {
                    info!("Shutting down collectd listener with a full queue");
                    break;
                }
            }
        }
    }

    /// Decode one datagram and queue its samples
    ///
    /// A full queue blocks here, so shutdown is watched while sending.
    async fn forward(
        &self,
        datagram: &[u8],
        peer: SocketAddr,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), Halt> {
        let samples = match decode_packet(datagram) {
            Ok(samples) => samples,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping undecodable packet");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_decode_errors();
                }
                return Ok(());
            }
        };

        debug!(peer = %peer, samples = samples.len(), "Received collectd packet");
        for sample in samples {
            if let Some(metrics) = &self.metrics {
                metrics.inc_samples_received();
            }
            tokio::select! {
                sent = self.samples_tx.send(sample) => {
                    if sent.is_err() {
                        return Err(Halt::ChannelClosed);
                    }
                }
                _ = shutdown.recv() => return Err(Halt::Shutdown),
            }
        }
        Ok(())
    }
}

/// Wait out a receive error; true if shutdown arrived meanwhile
async fn back_off(shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = sleep(RECV_ERROR_BACKOFF) => false,
        _ = shutdown.recv() => true,
    }
}

/// Why forwarding stopped
enum Halt {
    ChannelClosed,
    Shutdown,
}
