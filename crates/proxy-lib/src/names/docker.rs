//! Docker Engine API name source
//!
//! Resolves container ids to container names for running containers so
//! that collectd hosts reported as container ids get readable labels.
//! The daemon is reached over its unix socket or over TCP.

use super::NameSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry returned by `GET /containers/json`
#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
}

/// Subset of `GET /containers/{id}/json`
#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Running", default)]
    running: bool,
}

/// Where the Docker API lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Http(Url),
    Unix(PathBuf),
}

enum Transport {
    Http { client: Client, base_url: Url },
    Unix { socket_path: PathBuf },
}

/// Name source backed by the Docker Engine HTTP API
pub struct DockerNameSource {
    transport: Transport,
}

impl DockerNameSource {
    /// Create a source for a Docker endpoint
    /// (`unix://`, `http://`, `https://` or `tcp://`)
    pub fn new(endpoint: &str) -> Result<Self> {
        let transport = match parse_endpoint(endpoint)? {
            Endpoint::Http(base_url) => {
                let client = Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .context("Failed to create Docker HTTP client")?;
                Transport::Http { client, base_url }
            }
            Endpoint::Unix(socket_path) => Transport::Unix { socket_path },
        };

        Ok(Self { transport })
    }

    /// GET an API path (with query) and decode the JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = match &self.transport {
            Transport::Http { client, base_url } => {
                let url = base_url
                    .join(path.trim_start_matches('/'))
                    .with_context(|| format!("Invalid Docker API path {}", path))?;
                http_get(client, url).await?
            }
            Transport::Unix { socket_path } => {
                tokio::time::timeout(REQUEST_TIMEOUT, unix_get(socket_path, path))
                    .await
                    .with_context(|| format!("Docker request {} timed out", path))??
            }
        };

        serde_json::from_slice(&body)
            .with_context(|| format!("Failed to parse Docker response for {}", path))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.get_json("/containers/json?all=1")
            .await
            .context("Failed to list Docker containers")
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        self.get_json(&format!("/containers/{}/json", id))
            .await
            .with_context(|| format!("Failed to inspect container {}", id))
    }
}

async fn http_get(client: &Client, url: Url) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Docker API error ({}): {}", status, body);
    }

    Ok(response.bytes().await?.to_vec())
}

/// One HTTP/1.1 request over a fresh connection to the daemon socket
async fn unix_get(socket_path: &Path, path: &str) -> Result<Vec<u8>> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .context("HTTP handshake on Docker socket failed")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Docker socket connection ended with error");
        }
    });

    let request = hyper::Request::get(path)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .context("Failed to build Docker request")?;

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();

    if !status.is_success() {
        anyhow::bail!(
            "Docker API error ({}): {}",
            status,
            String::from_utf8_lossy(&body)
        );
    }

    Ok(body.to_vec())
}

#[async_trait]
impl NameSource for DockerNameSource {
    async fn fetch(&self) -> Result<HashMap<String, String>> {
        let containers = self.list_containers().await?;
        let mut names = HashMap::with_capacity(containers.len());

        for container in containers {
            let info = self.inspect_container(&container.id).await?;
            if !info.state.running {
                continue;
            }

            if let Some(name) = container.names.first() {
                names.insert(
                    container.id.clone(),
                    name.trim_start_matches('/').to_string(),
                );
            }
        }

        debug!(containers = names.len(), "Fetched running container names");
        Ok(names)
    }
}

/// Classify a Docker endpoint, rewriting `tcp://` to `http://`
fn parse_endpoint(endpoint: &str) -> Result<Endpoint> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        if !path.starts_with('/') {
            anyhow::bail!("Docker socket path must be absolute: {}", endpoint);
        }
        return Ok(Endpoint::Unix(PathBuf::from(path)));
    }

    let rewritten = match endpoint.strip_prefix("tcp://") {
        Some(rest) => format!("http://{}", rest),
        None => endpoint.to_string(),
    };

    let mut url = Url::parse(&rewritten)
        .with_context(|| format!("Invalid Docker endpoint: {}", endpoint))?;

    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("Unsupported Docker endpoint scheme '{}'", url.scheme());
    }

    // Url::join replaces the last segment unless the path ends with a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(Endpoint::Http(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use mockito::Matcher;
    use std::convert::Infallible;
    use tokio::net::UnixListener;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:2375").unwrap(),
            Endpoint::Http(Url::parse("http://127.0.0.1:2375/").unwrap())
        );
        assert_eq!(
            parse_endpoint("https://docker.local:2376/v1.41").unwrap(),
            Endpoint::Http(Url::parse("https://docker.local:2376/v1.41/").unwrap())
        );
        assert_eq!(
            parse_endpoint("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert!(parse_endpoint("unix://docker.sock").is_err());
        assert!(parse_endpoint("ftp://docker").is_err());
    }

    #[tokio::test]
    async fn test_fetch_running_container_names() {
        let mut server = mockito::Server::new_async().await;

        let list = server
            .mock("GET", "/containers/json")
            .match_query(Matcher::UrlEncoded("all".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"Id": "abc123", "Names": ["/frontend-1"]},
                    {"Id": "def456", "Names": ["/stopped-job"]}
                ]"#,
            )
            .create_async()
            .await;
        let running = server
            .mock("GET", "/containers/abc123/json")
            .with_status(200)
            .with_body(r#"{"Id": "abc123", "State": {"Running": true}}"#)
            .create_async()
            .await;
        let stopped = server
            .mock("GET", "/containers/def456/json")
            .with_status(200)
            .with_body(r#"{"Id": "def456", "State": {"Running": false}}"#)
            .create_async()
            .await;

        let source = DockerNameSource::new(&server.url()).unwrap();
        let names = source.fetch().await.unwrap();

        list.assert_async().await;
        running.assert_async().await;
        stopped.assert_async().await;
        assert_eq!(names.len(), 1);
        assert_eq!(names["abc123"], "frontend-1");
    }

    #[tokio::test]
    async fn test_fetch_fails_on_inspect_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/containers/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"Id": "abc123", "Names": ["/frontend-1"]}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/containers/abc123/json")
            .with_status(500)
            .with_body("daemon error")
            .create_async()
            .await;

        let source = DockerNameSource::new(&server.url()).unwrap();
        assert!(source.fetch().await.is_err());
    }

    /// Minimal Docker daemon answering on a unix socket
    async fn docker_daemon(
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let (status, body) = match (req.uri().path(), req.uri().query()) {
            ("/containers/json", Some("all=1")) => (
                StatusCode::OK,
                r#"[{"Id": "abc123", "Names": ["/frontend-1"]},
                    {"Id": "def456", "Names": ["/stopped-job"]}]"#,
            ),
            ("/containers/abc123/json", _) => {
                (StatusCode::OK, r#"{"State": {"Running": true}}"#)
            }
            ("/containers/def456/json", _) => {
                (StatusCode::OK, r#"{"State": {"Running": false}}"#)
            }
            _ => (StatusCode::NOT_FOUND, r#"{"message": "page not found"}"#),
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        Ok(response)
    }

    fn spawn_daemon(socket_path: &Path) {
        let listener = UnixListener::bind(socket_path).unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(docker_daemon))
                        .await;
                });
            }
        });
    }

    #[tokio::test]
    async fn test_fetch_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("docker.sock");
        spawn_daemon(&socket_path);

        let source =
            DockerNameSource::new(&format!("unix://{}", socket_path.display())).unwrap();
        let names = source.fetch().await.unwrap();

        assert_eq!(names.len(), 1);
        assert_eq!(names["abc123"], "frontend-1");
    }

    #[tokio::test]
    async fn test_missing_socket_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DockerNameSource::new(&format!(
            "unix://{}",
            dir.path().join("absent.sock").display()
        ))
        .unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to connect"));
    }
}
