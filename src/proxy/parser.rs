//! Proxy list parser
//!
//! Turns the plain-text lists published by proxy sources into candidates.

use crate::proxy::models::{Candidate, Protocol};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// `scheme://[user:pass@]host:port[/]`
static URL_FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks5h?)://(?:[^@/]+@)?([^:/@]+:\d+)/?$")
        .expect("Invalid proxy URL regex")
});

/// Proxy parser for parsing candidates from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - HOST:PORT
    /// - HOST:PORT followed by whitespace-separated extra columns
    /// - scheme://HOST:PORT (the scheme overrides `default_protocol`)
    pub fn parse_line(line: &str, default_protocol: Protocol) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // Some sources append country, anonymity level etc. after the endpoint.
        let field = line.split_whitespace().next()?;

        let candidate = match Self::parse_url_format(field) {
            Some(candidate) => candidate,
            None => Candidate::new(field, default_protocol),
        };
        candidate.host_port().ok()?;
        Some(candidate)
    }

    /// Parse URL format proxy (e.g. http://ip:port or socks5://ip:port)
    fn parse_url_format(field: &str) -> Option<Candidate> {
        let caps = URL_FORMAT_REGEX.captures(field)?;
        let protocol = match caps[1].to_lowercase().as_str() {
            "http" | "https" => Protocol::Http,
            "socks5" | "socks5h" => Protocol::Socks5,
            _ => return None,
        };
        Some(Candidate::new(&caps[2], protocol))
    }

    /// Parse candidates from a string (multiple lines), dropping repeats
    pub fn parse_string(content: &str, default_protocol: Protocol) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_protocol))
            .filter(|candidate| seen.insert(candidate.endpoint.clone()))
            .collect()
    }

    /// Parse candidates from a file
    pub fn parse_file<P: AsRef<Path>>(
        path: P,
        default_protocol: Protocol,
    ) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, default_protocol))
    }

    /// Write endpoints to a file, one per line
    pub fn save_to_file<P, S>(endpoints: &[S], path: P) -> Result<()>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let content = endpoints
            .iter()
            .map(|e| e.as_ref())
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}
