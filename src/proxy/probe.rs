//! Single-candidate liveness probe
//!
//! A probe sends one GET through the candidate, used as a forward proxy, to a test URL that is
//! known to answer with a fixed status (by default `204 No Content`). Whatever happens during
//! that attempt is reduced to an [`Observation`] and then classified into exactly one
//! [`ProbeOutcome`].

use crate::proxy::models::{Candidate, FailureKind, ProbeOutcome, Protocol};
use crate::Result;
use reqwest::{redirect, Client, Proxy as ReqwestProxy};
use std::error::Error as StdError;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::trace;

/// Default timeout for a single probe in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default URL to test proxies against
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Status the default test URL answers with
pub const DEFAULT_EXPECTED_STATUS: u16 = 204;

/// Longest diagnostic string kept on an outcome
const MAX_DETAIL_LEN: usize = 160;

const TLS_MARKERS: &[&str] = &["tls", "ssl", "certificate"];

/// Configuration for the probe
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout for each probe, covering DNS, connect and the proxied round trip
    pub timeout: Duration,
    /// URL to test proxies against
    pub test_url: String,
    /// Status code a healthy proxy relays back from the test URL
    pub expected_status: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            test_url: DEFAULT_TEST_URL.to_string(),
            expected_status: DEFAULT_EXPECTED_STATUS,
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }
}

/// Something that can check one candidate.
///
/// Implementations must turn every failure into a [`ProbeOutcome`]; they never return errors.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, candidate: &Candidate) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Raw facts gathered from one attempt, before classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub timed_out: bool,
    /// The proxy refused, reset or otherwise failed the connection
    pub proxy_error: bool,
    pub tls_error: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl Observation {
    pub fn response(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            error: Some("probe timed out".to_string()),
            ..Default::default()
        }
    }

    /// Inspect a client error and its source chain
    pub fn from_error(err: &reqwest::Error) -> Self {
        let chain = error_chain(err);
        // The top-level message embeds the request URL, so markers are matched on sources only.
        let lowered = chain
            .split_once(": ")
            .map(|(_, sources)| sources.to_lowercase())
            .unwrap_or_default();
        let tls_error = TLS_MARKERS.iter().any(|m| lowered.contains(m));
        let timed_out = err.is_timeout() || chain_has_io_kind(err, std::io::ErrorKind::TimedOut);

        Self {
            timed_out,
            proxy_error: !tls_error && (err.is_connect() || lowered.contains("proxy")),
            tls_error,
            status: err.status().map(|s| s.as_u16()),
            error: Some(truncate(&chain)),
        }
    }
}

/// Classify an observation.
///
/// Precedence: timeout, proxy connection error, TLS error, unexpected status, any other error,
/// and finally success.
pub fn classify(
    candidate: &Candidate,
    observation: &Observation,
    expected_status: u16,
    elapsed_ms: u64,
) -> ProbeOutcome {
    let outcome = if observation.timed_out {
        ProbeOutcome::timeout(candidate)
    } else if observation.proxy_error {
        ProbeOutcome::failure(candidate, FailureKind::ConnectionError)
    } else if observation.tls_error {
        ProbeOutcome::failure(candidate, FailureKind::TlsError)
    } else {
        match (observation.status, &observation.error) {
            (Some(code), _) if code != expected_status => {
                ProbeOutcome::unexpected_response(candidate, code)
            }
            (_, Some(error)) => ProbeOutcome::other(candidate, error.clone()),
            (Some(code), None) => return ProbeOutcome::success(candidate, elapsed_ms, code),
            (None, None) => ProbeOutcome::other(candidate, "no response"),
        }
    };

    let outcome = outcome.with_response_time(elapsed_ms);
    match (&outcome.detail, &observation.error) {
        (None, Some(error)) => outcome.with_detail(error.clone()),
        _ => outcome,
    }
}

/// Probe that goes over the network with `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ProxyProbe {
    config: ProbeConfig,
}

impl ProxyProbe {
    /// Create a new probe with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new probe with custom configuration
    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Check a single candidate
    pub async fn check(&self, candidate: &Candidate) -> ProbeOutcome {
        let (host, port) = match candidate.host_port() {
            Ok(parts) => parts,
            Err(e) => return ProbeOutcome::other(candidate, e),
        };

        let start = Instant::now();
        let client = match self.create_client(candidate.protocol, host, port) {
            Ok(client) => client,
            Err(e) => {
                return ProbeOutcome::other(candidate, truncate(&e.to_string()))
                    .with_response_time(elapsed_ms(start))
            }
        };

        let observation = match tokio::time::timeout(
            self.config.timeout,
            client.get(&self.config.test_url).send(),
        )
        .await
        {
            Ok(Ok(response)) => Observation::response(response.status().as_u16()),
            Ok(Err(e)) => Observation::from_error(&e),
            Err(_) => Observation::timed_out(),
        };

        let outcome = classify(
            candidate,
            &observation,
            self.config.expected_status,
            elapsed_ms(start),
        );
        trace!(endpoint = %candidate.endpoint, ?observation, "probe finished");
        outcome
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, protocol: Protocol, host: &str, port: u16) -> Result<Client> {
        let proxy_url = format!("{}://{}:{}", protocol.scheme(), host, port);
        let client = Client::builder()
            .proxy(ReqwestProxy::all(&proxy_url)?)
            .timeout(self.config.timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(client)
    }
}

impl Probe for ProxyProbe {
    fn probe(&self, candidate: &Candidate) -> impl Future<Output = ProbeOutcome> + Send {
        self.check(candidate)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn chain_has_io_kind(err: &(dyn StdError + 'static), kind: std::io::ErrorKind) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == kind {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

fn truncate(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default();
    match line.char_indices().nth(MAX_DETAIL_LEN) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProbeStatus;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const TEST_TARGET: &str = "http://probe.invalid/generate_204";
    const TLS_TARGET: &str = "https://probe.invalid/generate_204";

    const OK_EMPTY: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const FORBIDDEN: &str = "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n";

    fn candidate() -> Candidate {
        Candidate::new("10.0.0.1:8080", Protocol::Http)
    }

    /// Read one request head, false if the peer went away first
    async fn read_head(socket: &mut TcpStream) -> bool {
        let mut buf = vec![0u8; 8192];
        let mut read = 0;
        loop {
            match socket.read(&mut buf[read..]).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => read += n,
            }
            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                return true;
            }
            if read == buf.len() {
                return false;
            }
        }
    }

    /// Local forward proxy that answers every request with a canned response
    async fn spawn_fake_proxy(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if read_head(&mut socket).await {
                        let _ = socket.write_all(response.as_bytes()).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    /// Local proxy that accepts CONNECT, then answers the TLS handshake in plaintext
    async fn spawn_plaintext_tunnel() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if !read_head(&mut socket).await {
                        return;
                    }
                    let established = b"HTTP/1.1 200 Connection established\r\n\r\n";
                    if socket.write_all(established).await.is_err() {
                        return;
                    }
                    // Wait for the ClientHello before replying with something that is not TLS.
                    let mut hello = [0u8; 1024];
                    let _ = socket.read(&mut hello).await;
                    let _ = socket.write_all(OK_EMPTY.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    /// Local proxy that accepts connections and never answers
    async fn spawn_silent_proxy() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    fn test_probe(timeout: Duration) -> ProxyProbe {
        ProxyProbe::with_config(
            ProbeConfig::new()
                .with_timeout(timeout)
                .with_test_url(TEST_TARGET.to_string()),
        )
    }

    fn tls_probe() -> ProxyProbe {
        ProxyProbe::with_config(
            ProbeConfig::new()
                .with_timeout(Duration::from_secs(5))
                .with_test_url(TLS_TARGET.to_string()),
        )
    }

    async fn check_via(addr: SocketAddr, probe: ProxyProbe) -> ProbeOutcome {
        probe.check(&Candidate::new(addr.to_string(), Protocol::Http)).await
    }

    #[test]
    fn test_probe_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
        assert_eq!(config.expected_status, 204);
    }

    #[test]
    fn test_probe_config_builder() {
        let config = ProbeConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_test_url("http://example.com/ping".to_string())
            .with_expected_status(200);

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.test_url, "http://example.com/ping");
        assert_eq!(config.expected_status, 200);
    }

    #[test]
    fn test_classify_timeout_wins_over_everything() {
        let observation = Observation {
            timed_out: true,
            proxy_error: true,
            tls_error: true,
            status: Some(500),
            error: Some("timed out".to_string()),
        };
        let outcome = classify(&candidate(), &observation, 204, 10_000);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Timeout));
        assert_eq!(outcome.response_time_ms, Some(10_000));
    }

    #[test]
    fn test_classify_proxy_error_before_tls() {
        let observation = Observation {
            proxy_error: true,
            tls_error: true,
            error: Some("connection refused".to_string()),
            ..Default::default()
        };
        let outcome = classify(&candidate(), &observation, 204, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::ConnectionError));
        assert_eq!(outcome.detail.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_classify_tls_before_status() {
        let observation = Observation {
            tls_error: true,
            status: Some(502),
            error: Some("invalid certificate".to_string()),
            ..Default::default()
        };
        let outcome = classify(&candidate(), &observation, 204, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::TlsError));
    }

    #[test]
    fn test_classify_unexpected_status_before_other() {
        let observation = Observation {
            status: Some(403),
            error: Some("something odd".to_string()),
            ..Default::default()
        };
        let outcome = classify(&candidate(), &observation, 204, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::UnexpectedResponse));
        assert_eq!(outcome.http_status, Some(403));
    }

    #[test]
    fn test_classify_other_error() {
        let observation = Observation {
            status: Some(204),
            error: Some("body decode failed".to_string()),
            ..Default::default()
        };
        let outcome = classify(&candidate(), &observation, 204, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Other));
        assert_eq!(outcome.detail.as_deref(), Some("body decode failed"));

        let outcome = classify(&candidate(), &Observation::default(), 204, 3);
        assert_eq!(outcome.failure_kind, Some(FailureKind::Other));
    }

    #[test]
    fn test_classify_success() {
        let outcome = classify(&candidate(), &Observation::response(204), 204, 42);
        assert_eq!(outcome.status, ProbeStatus::Success);
        assert_eq!(outcome.failure_kind, None);
        assert_eq!(outcome.response_time_ms, Some(42));
        assert_eq!(outcome.http_status, Some(204));
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "x".repeat(500);
        let short = truncate(&long);
        assert!(short.len() <= MAX_DETAIL_LEN + 3);
        assert_eq!(truncate("line one\nline two"), "line one");
    }

    #[tokio::test]
    async fn test_probe_malformed_endpoint() {
        let probe = test_probe(Duration::from_secs(1));
        let outcome = probe.check(&Candidate::new("badformat", Protocol::Http)).await;
        assert_eq!(outcome.failure_kind, Some(FailureKind::Other));
        assert!(outcome.detail.is_some());
    }

    #[tokio::test]
    async fn test_probe_success_through_fake_proxy() {
        let addr = spawn_fake_proxy("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        let outcome = check_via(addr, test_probe(Duration::from_secs(5))).await;
        assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome);
        assert_eq!(outcome.http_status, Some(204));
        assert!(outcome.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_unexpected_status() {
        let addr = spawn_fake_proxy(OK_EMPTY).await;
        let outcome = check_via(addr, test_probe(Duration::from_secs(5))).await;
        assert_eq!(outcome.failure_kind, Some(FailureKind::UnexpectedResponse));
        assert_eq!(outcome.http_status, Some(200));
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let addr = spawn_silent_proxy().await;
        let outcome = check_via(addr, test_probe(Duration::from_millis(300))).await;
        assert_eq!(outcome.failure_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let outcome = check_via(addr, test_probe(Duration::from_secs(5))).await;
        assert_eq!(outcome.failure_kind, Some(FailureKind::ConnectionError));
    }

    #[tokio::test]
    async fn test_plaintext_after_tunnel_is_tls_error() {
        let addr = spawn_plaintext_tunnel().await;
        let outcome = check_via(addr, tls_probe()).await;
        assert_eq!(
            outcome.failure_kind,
            Some(FailureKind::TlsError),
            "unexpected outcome: {:?}",
            outcome
        );
        assert!(outcome.detail.is_some());
        assert!(outcome.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_rejected_tunnel_is_connection_error() {
        let addr = spawn_fake_proxy(FORBIDDEN).await;
        let outcome = check_via(addr, tls_probe()).await;
        assert_eq!(
            outcome.failure_kind,
            Some(FailureKind::ConnectionError),
            "unexpected outcome: {:?}",
            outcome
        );
    }
}
