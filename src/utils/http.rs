// src/utils/http.rs

//! HTTP client utilities and the cached page source used by crawlers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a URL as text, treating non-success statuses as retrieval errors.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::retrieval(url, format!("HTTP {status}")));
    }
    Ok(response.text().await?)
}

/// Anything that can hand out page bodies by URL.
#[async_trait]
pub trait PageSource: Send {
    async fn fetch(&mut self, url: &str) -> Result<String>;
}

/// Bounded page cache that evicts its oldest entries in batches.
#[derive(Debug)]
pub struct PageCache {
    pages: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
    trim: usize,
}

impl PageCache {
    pub fn new(capacity: usize, trim: usize) -> Self {
        Self {
            pages: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            trim: trim.clamp(1, capacity.max(1)),
        }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.pages.get(url).map(String::as_str)
    }

    pub fn insert(&mut self, url: String, body: String) {
        if self.capacity == 0 {
            return;
        }
        if self.pages.contains_key(&url) {
            self.pages.insert(url, body);
            return;
        }
        if self.pages.len() >= self.capacity {
            for _ in 0..self.trim {
                if let Some(oldest) = self.order.pop_front() {
                    self.pages.remove(&oldest);
                }
            }
        }
        self.order.push_back(url.clone());
        self.pages.insert(url, body);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Page source backed by reqwest, with a page cache and a politeness delay.
pub struct HttpPageSource {
    client: reqwest::Client,
    cache: PageCache,
    delay: Duration,
    last_request: Option<Instant>,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client, config: &HttpConfig) -> Self {
        Self {
            client,
            cache: PageCache::new(config.page_cache_size, config.page_cache_trim),
            delay: Duration::from_millis(config.request_delay_ms),
            last_request: None,
        }
    }

    async fn wait_for_turn(&mut self) {
        if let Some(last) = self.last_request {
            let ready = last + self.delay;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&mut self, url: &str) -> Result<String> {
        if let Some(body) = self.cache.get(url) {
            log::debug!("Page cache hit: {}", url);
            return Ok(body.to_string());
        }

        self.wait_for_turn().await;
        log::debug!("Fetching {}", url);
        let body = fetch_text(&self.client, url).await?;
        self.cache.insert(url.to_string(), body.clone());
        Ok(body)
    }
}

/// Page source serving fixed pages from memory.
#[derive(Debug, Default, Clone)]
pub struct StaticPageSource {
    pages: HashMap<String, String>,
    requests: Vec<String>,
}

impl StaticPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    async fn fetch(&mut self, url: &str) -> Result<String> {
        self.requests.push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::retrieval(url, "HTTP 404 Not Found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> HttpConfig {
        HttpConfig {
            request_delay_ms: 0,
            ..HttpConfig::default()
        }
    }

    #[test]
    fn test_cache_evicts_oldest_batch() {
        let mut cache = PageCache::new(4, 2);
        for i in 0..4 {
            cache.insert(format!("u{i}"), format!("p{i}"));
        }
        cache.insert("u4".to_string(), "p4".to_string());

        assert_eq!(cache.len(), 3);
        assert!(cache.get("u0").is_none());
        assert!(cache.get("u1").is_none());
        assert_eq!(cache.get("u2"), Some("p2"));
        assert_eq!(cache.get("u4"), Some("p4"));
    }

    #[tokio::test]
    async fn test_http_source_caches_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/routes/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>regions</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let client = create_client(&config).unwrap();
        let mut source = HttpPageSource::new(client, &config);
        let url = format!("{}/routes/", server.uri());

        assert_eq!(source.fetch(&url).await.unwrap(), "<html>regions</html>");
        assert_eq!(source.fetch(&url).await.unwrap(), "<html>regions</html>");
    }

    #[tokio::test]
    async fn test_http_source_reports_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = test_config();
        let client = create_client(&config).unwrap();
        let mut source = HttpPageSource::new(client, &config);

        let err = source
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Retrieval { .. }));
    }

    #[tokio::test]
    async fn test_static_source_records_requests() {
        let mut source = StaticPageSource::new().with_page("a", "body");
        assert_eq!(source.fetch("a").await.unwrap(), "body");
        assert!(source.fetch("b").await.is_err());
        assert_eq!(source.requests(), ["a".to_string(), "b".to_string()]);
    }
}
