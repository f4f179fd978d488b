//! Proxy crawler module for fetching candidate lists from public sources
//!
//! This module provides functionality for:
//! - Fetching plain-text proxy lists over HTTP
//! - Extracting `host:port` entries, falling back to a regex scan for HTML pages
//! - Merging several sources into one de-duplicated candidate set

use crate::proxy::models::{Candidate, Protocol};
use crate::proxy::parser::ProxyParser;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

const HTTP_SOURCES: &[&str] = &[
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/http.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
];

const SOCKS5_SOURCES: &[&str] = &[
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=socks5",
    "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/socks5.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks5.txt",
];

/// Built-in source URLs for a protocol
pub fn default_source_urls(protocol: Protocol) -> Vec<String> {
    let urls = match protocol {
        Protocol::Http => HTTP_SOURCES,
        Protocol::Socks5 => SOCKS5_SOURCES,
    };
    urls.iter().map(|u| u.to_string()).collect()
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    /// Candidates extracted from the source
    pub candidates: Vec<Candidate>,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: String, candidates: Vec<Candidate>) -> Self {
        Self {
            source,
            candidates,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A website that publishes a proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    /// Protocol of the proxies it lists
    pub protocol: Protocol,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            protocol,
        }
    }

    /// Source named after the host of its URL
    pub fn from_url(url: &str, protocol: Protocol) -> Self {
        let name = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| url.to_string());
        Self::new(&name, url, protocol)
    }
}

/// Proxy crawler for fetching candidate lists
pub struct ProxyCrawler {
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch and parse candidates from a single URL
    pub async fn crawl_url(&self, url: &str, protocol: Protocol) -> Result<Vec<Candidate>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(Self::parse_candidates_from_text(&content, protocol))
    }

    /// Fetch and parse candidates from a ProxySource
    pub async fn crawl_source(&self, source: &ProxySource) -> Result<Vec<Candidate>> {
        self.crawl_url(&source.url, source.protocol).await
    }

    /// Fetch every source, returning a result for each
    pub async fn crawl_sources_with_results(&self, sources: &[ProxySource]) -> Vec<CrawlResult> {
        let mut results = Vec::new();

        for source in sources {
            let result = match self.crawl_source(source).await {
                Ok(candidates) => {
                    info!(source = %source.name, found = candidates.len(), "fetched proxy list");
                    CrawlResult::success(source.name.clone(), candidates)
                }
                Err(e) => {
                    CrawlResult::failure(source.name.clone(), format!("{}: {:#}", source.url, e))
                }
            };
            results.push(result);
        }

        results
    }

    /// Fetch every source and merge the candidates into one de-duplicated list.
    ///
    /// A failing source is logged and skipped.
    pub async fn collect(&self, sources: &[ProxySource]) -> Vec<Candidate> {
        let results = self.crawl_sources_with_results(sources).await;
        let failed = results.iter().filter(|r| !r.is_success()).count();

        let mut candidates = Vec::new();
        for result in results {
            if let Some(error) = &result.error {
                warn!(source = %result.source, %error, "failed to fetch proxy list");
                continue;
            }
            candidates.extend(result.candidates);
        }

        let merged = merge_unique(candidates);
        info!(
            sources = sources.len(),
            failed,
            unique = merged.len(),
            "merged proxy lists"
        );
        merged
    }

    /// Parse candidates from raw text content
    ///
    /// This method tries two parsing strategies:
    /// 1. Line-by-line parsing using ProxyParser
    /// 2. Regex-based IP:PORT extraction, when the first finds nothing
    pub fn parse_candidates_from_text(content: &str, protocol: Protocol) -> Vec<Candidate> {
        let candidates = ProxyParser::parse_string(content, protocol);
        if !candidates.is_empty() {
            return candidates;
        }
        merge_unique(Self::extract_candidates_with_regex(content, protocol))
    }

    /// Extract candidates using regex pattern matching
    fn extract_candidates_with_regex(content: &str, protocol: Protocol) -> Vec<Candidate> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let port: u16 = cap.get(2)?.as_str().parse().ok()?;

                // Validate IP address parts
                for part in host.split('.') {
                    let num: u32 = part.parse().ok()?;
                    if num > 255 {
                        return None;
                    }
                }

                // Validate port
                if port == 0 {
                    return None;
                }

                Some(Candidate::new(format!("{}:{}", host, port), protocol))
            })
            .collect()
    }
}

/// Keep the first occurrence of every endpoint
fn merge_unique(candidates: impl IntoIterator<Item = Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.endpoint.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new().with_timeout(Duration::from_secs(60));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_proxy_source_from_url() {
        let source = ProxySource::from_url(
            "https://raw.githubusercontent.com/TheSpeedX/SOCKS-List/master/http.txt",
            Protocol::Http,
        );
        assert_eq!(source.name, "raw.githubusercontent.com");
        assert_eq!(source.protocol, Protocol::Http);

        let source = ProxySource::from_url("not a url", Protocol::Socks5);
        assert_eq!(source.name, "not a url");
    }

    #[test]
    fn test_default_source_urls() {
        for protocol in Protocol::ALL {
            let urls = default_source_urls(protocol);
            assert!(!urls.is_empty());
            assert!(urls.iter().all(|u| u.starts_with("https://")));
            assert!(urls.iter().all(|u| u.contains(protocol.scheme())));
        }
    }

    #[test]
    fn test_crawl_result_success_and_failure() {
        let candidates = vec![
            Candidate::new("192.168.1.1:8080", Protocol::Http),
            Candidate::new("192.168.1.2:3128", Protocol::Http),
        ];
        let result = CrawlResult::success("test-source".to_string(), candidates);
        assert!(result.is_success());
        assert_eq!(result.candidates.len(), 2);

        let result =
            CrawlResult::failure("test-source".to_string(), "Connection failed".to_string());
        assert!(!result.is_success());
        assert!(result.candidates.is_empty());
        assert_eq!(result.error, Some("Connection failed".to_string()));
    }

    #[test]
    fn test_parse_candidates_from_text_simple() {
        let content = r#"
192.168.1.1:8080
192.168.1.2:3128
10.0.0.1:1080
"#;
        let candidates = ProxyCrawler::parse_candidates_from_text(content, Protocol::Http);
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_parse_candidates_from_html_like_content() {
        let content = r#"
<html>
<body>
<table>
<tr><td>192.168.1.1</td><td>8080</td></tr>
</table>
Some text with 10.0.0.1:3128 embedded, and again 10.0.0.1:3128.
</body>
</html>
"#;
        let candidates = ProxyCrawler::parse_candidates_from_text(content, Protocol::Socks5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].endpoint, "10.0.0.1:3128");
        assert_eq!(candidates[0].protocol, Protocol::Socks5);
    }

    #[test]
    fn test_extract_candidates_invalid_ip_and_port() {
        let content = "Invalid IP: 999.999.999.999:8080, zero port: 192.168.1.1:0";
        let candidates = ProxyCrawler::extract_candidates_with_regex(content, Protocol::Http);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_merge_unique_keeps_first() {
        let merged = merge_unique(vec![
            Candidate::new("1.1.1.1:80", Protocol::Http),
            Candidate::new("2.2.2.2:80", Protocol::Http),
            Candidate::new("1.1.1.1:80", Protocol::Http),
        ]);
        let endpoints: Vec<_> = merged.iter().map(|c| c.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["1.1.1.1:80", "2.2.2.2:80"]);
    }

    #[tokio::test]
    async fn test_collect_skips_failing_source() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let body = "1.1.1.1:80\n2.2.2.2:8080\n";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let closed = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let config = CrawlerConfig::new().with_timeout(Duration::from_secs(5));
        let crawler = ProxyCrawler::with_config(config).unwrap();
        let sources = vec![
            ProxySource::new("down", &format!("http://{}/list.txt", closed), Protocol::Http),
            ProxySource::new("up", &format!("http://{}/list.txt", addr), Protocol::Http),
            ProxySource::new("up-again", &format!("http://{}/list.txt", addr), Protocol::Http),
        ];

        let candidates = crawler.collect(&sources).await;
        let endpoints: Vec<_> = candidates.iter().map(|c| c.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["1.1.1.1:80", "2.2.2.2:8080"]);
    }
}
