use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::assertions;

/// Longest response prefix kept for the history row.
const SNIPPET_MAX_CHARS: usize = 1000;

/// Everything the executor needs to run one probe, lifted off the monitor
/// definition so the executor stays free of storage types.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
    pub assertions: Vec<String>,
}

/// The recorded result of a single probe. A failed request is a normal
/// outcome (`ok = false`), never an executor error.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub ok: bool,
    pub body_hash: Option<String>,
    pub response_snippet: Option<String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Issues HTTP probes. Stateless apart from the shared client; safe to share
/// across the whole check pool.
#[derive(Clone)]
pub struct ProbeExecutor {
    client: Client,
}

impl Default for ProbeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeExecutor {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Runs the probe and classifies the result. The configured timeout is a
    /// hard bound on the whole request including body download; exceeding it
    /// yields `error = "timeout"`.
    pub async fn execute(&self, spec: &ProbeSpec) -> ProbeOutcome {
        let checked_at = Utc::now();
        let method = parse_method(&spec.method);
        let sends_body =
            method == Method::POST || method == Method::PUT || method == Method::PATCH;

        let mut request = self
            .client
            .request(method, &spec.url)
            .timeout(spec.timeout);
        for (name, value) in &spec.headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                request = request.header(name, value);
            }
        }
        if sends_body {
            if let Some(body) = &spec.body {
                request = request.body(body.clone());
            }
        }

        let start = Instant::now();
        let (status_code, body_text, error) = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(text) => (Some(status), Some(text), None),
                    Err(e) => (Some(status), None, Some(classify(&e))),
                }
            }
            Err(e) => (None, None, Some(classify(&e))),
        };
        let elapsed_ms = start.elapsed().as_millis() as i64;

        let response_time_ms = status_code.map(|_| elapsed_ms);
        let body_hash = body_text.as_deref().map(sha256_hex);
        let response_snippet = body_text.as_deref().map(truncate_chars);

        // A request that never completed can never pass, whatever the
        // assertion list says.
        let ok = error.is_none()
            && assertions::evaluate(&spec.assertions, status_code, body_text.as_deref());

        debug!(
            url = %spec.url,
            status = ?status_code,
            ok,
            elapsed_ms,
            error = ?error,
            "Probe finished."
        );

        ProbeOutcome {
            status_code: status_code.map(i32::from),
            response_time_ms,
            ok,
            body_hash,
            response_snippet,
            error,
            checked_at,
        }
    }
}

fn parse_method(method: &str) -> Method {
    match method.to_ascii_uppercase().as_str() {
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "PATCH" => Method::PATCH,
        "HEAD" => Method::HEAD,
        _ => Method::GET,
    }
}

fn classify(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_string()
    } else {
        err.to_string()
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn truncate_chars(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_MAX_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn spec(url: String, assertions: Vec<String>) -> ProbeSpec {
        ProbeSpec {
            method: "GET".to_string(),
            url,
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(2),
            assertions,
        }
    }

    #[tokio::test]
    async fn successful_probe_records_status_latency_and_snippet() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\nall healthy",
        )
        .await;
        let outcome = ProbeExecutor::new().execute(&spec(url, vec![])).await;

        assert!(outcome.ok);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.response_snippet.as_deref(), Some("all healthy"));
        assert_eq!(outcome.body_hash.as_deref(), Some(sha256_hex("all healthy").as_str()));
        assert!(outcome.response_time_ms.is_some());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn failing_assertion_is_a_down_outcome_not_an_error() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\ndegraded",
        )
        .await;
        let outcome = ProbeExecutor::new()
            .execute(&spec(url, vec!["body_contains:healthy".to_string()]))
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn status_assertion_checks_exact_code() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let outcome = ProbeExecutor::new()
            .execute(&spec(url, vec!["status==200".to_string()]))
            .await;

        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, Some(503));
    }

    #[tokio::test]
    async fn stalled_server_is_classified_as_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the connection open without ever answering.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut probe = spec(format!("http://{addr}"), vec![]);
        probe.timeout = Duration::from_millis(200);
        let outcome = ProbeExecutor::new().execute(&probe).await;

        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.response_time_ms, None);
    }

    #[tokio::test]
    async fn connection_refused_is_a_down_outcome() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = ProbeExecutor::new()
            .execute(&spec(format!("http://{addr}"), vec![]))
            .await;

        assert!(!outcome.ok);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.status_code, None);
    }

    #[test]
    fn snippet_is_bounded() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_chars(&long).len(), SNIPPET_MAX_CHARS);
        assert_eq!(truncate_chars("short"), "short");
    }
}
