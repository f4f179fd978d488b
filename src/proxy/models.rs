//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy protocol enumeration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Socks5,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Http, Protocol::Socks5];

    /// URL scheme used when installing the proxy on an HTTP client
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "socks5" => Ok(Protocol::Socks5),
            _ => Err(format!("Invalid protocol: {}. Use: http, socks5", s)),
        }
    }
}

/// A candidate proxy endpoint read from a source list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Endpoint in `host:port` form
    pub endpoint: String,
    pub protocol: Protocol,
}

impl Candidate {
    pub fn new(endpoint: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocol,
        }
    }

    /// Whether the endpoint carries the `host:port` separator
    pub fn has_separator(&self) -> bool {
        self.endpoint.contains(':')
    }

    /// Split the endpoint into host and port.
    ///
    /// Exactly one colon is accepted, the host must be non-empty and the port must be a
    /// non-zero `u16`.
    pub fn host_port(&self) -> Result<(&str, u16), String> {
        let (host, port) = self
            .endpoint
            .split_once(':')
            .ok_or_else(|| format!("missing ':' separator in {:?}", self.endpoint))?;
        if host.is_empty() || port.contains(':') {
            return Err(format!("malformed endpoint {:?}", self.endpoint));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in {:?}", self.endpoint))?;
        if port == 0 {
            return Err(format!("invalid port in {:?}", self.endpoint));
        }
        Ok((host, port))
    }

    /// Get the proxy URL string
    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.endpoint)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Terminal status of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeStatus {
    Success,
    Failure,
}

/// Why a probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    TlsError,
    UnexpectedResponse,
    Other,
    /// Never started because the run was cancelled
    Skipped,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionError => "connection error",
            FailureKind::TlsError => "tls error",
            FailureKind::UnexpectedResponse => "unexpected response",
            FailureKind::Other => "other",
            FailureKind::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Result of probing one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub protocol: Protocol,
    pub status: ProbeStatus,
    pub failure_kind: Option<FailureKind>,
    pub response_time_ms: Option<u64>,
    pub http_status: Option<u16>,
    /// Short diagnostic for failures
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn success(candidate: &Candidate, response_time_ms: u64, http_status: u16) -> Self {
        Self {
            endpoint: candidate.endpoint.clone(),
            protocol: candidate.protocol,
            status: ProbeStatus::Success,
            failure_kind: None,
            response_time_ms: Some(response_time_ms),
            http_status: Some(http_status),
            detail: None,
        }
    }

    pub fn failure(candidate: &Candidate, kind: FailureKind) -> Self {
        Self {
            endpoint: candidate.endpoint.clone(),
            protocol: candidate.protocol,
            status: ProbeStatus::Failure,
            failure_kind: Some(kind),
            response_time_ms: None,
            http_status: None,
            detail: None,
        }
    }

    pub fn timeout(candidate: &Candidate) -> Self {
        Self::failure(candidate, FailureKind::Timeout)
    }

    pub fn unexpected_response(candidate: &Candidate, http_status: u16) -> Self {
        let mut outcome = Self::failure(candidate, FailureKind::UnexpectedResponse);
        outcome.http_status = Some(http_status);
        outcome
    }

    pub fn other(candidate: &Candidate, detail: impl Into<String>) -> Self {
        Self::failure(candidate, FailureKind::Other).with_detail(detail)
    }

    pub fn skipped(candidate: &Candidate) -> Self {
        Self::failure(candidate, FailureKind::Skipped).with_detail("run cancelled before start")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ProbeStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parse_and_display() {
        assert_eq!("HTTP".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!("socks5".parse::<Protocol>().unwrap(), Protocol::Socks5);
        assert!("socks4".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Socks5.to_string(), "socks5");
    }

    #[test]
    fn test_candidate_host_port() {
        let candidate = Candidate::new("127.0.0.1:8080", Protocol::Http);
        assert_eq!(candidate.host_port().unwrap(), ("127.0.0.1", 8080));
        assert_eq!(candidate.url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_candidate_malformed() {
        assert!(!Candidate::new("badformat", Protocol::Http).has_separator());
        assert!(Candidate::new("badformat", Protocol::Http).host_port().is_err());
        assert!(Candidate::new(":8080", Protocol::Http).host_port().is_err());
        assert!(Candidate::new("1.2.3.4:abc", Protocol::Http).host_port().is_err());
        assert!(Candidate::new("1.2.3.4:0", Protocol::Http).host_port().is_err());
        assert!(Candidate::new("1.2.3.4:80:x", Protocol::Http).host_port().is_err());
    }

    #[test]
    fn test_outcome_constructors() {
        let candidate = Candidate::new("10.0.0.1:3128", Protocol::Socks5);

        let ok = ProbeOutcome::success(&candidate, 120, 204);
        assert!(ok.is_success());
        assert_eq!(ok.failure_kind, None);
        assert_eq!(ok.response_time_ms, Some(120));

        let bad = ProbeOutcome::unexpected_response(&candidate, 200).with_response_time(80);
        assert!(!bad.is_success());
        assert_eq!(bad.failure_kind, Some(FailureKind::UnexpectedResponse));
        assert_eq!(bad.http_status, Some(200));

        let other = ProbeOutcome::other(&candidate, "boom");
        assert_eq!(other.detail.as_deref(), Some("boom"));

        let skipped = ProbeOutcome::skipped(&candidate);
        assert_eq!(skipped.failure_kind, Some(FailureKind::Skipped));
        assert_eq!(skipped.endpoint, "10.0.0.1:3128");
    }
}
