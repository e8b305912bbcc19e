use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client, Url};
use thiserror::Error;
use tokio::time::sleep;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("request failed for {url}: {reason}")]
    Request { url: String, reason: String },
    #[error("non-success status {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Plain GET access to the web; the seam tests replace with canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, max_redirects: usize, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(max_redirects))
            .user_agent(user_agent)
            .build()
            .map_err(|err| FetchError::Request {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Self::new(&config.user_agent, config.max_redirects, config.fetch_timeout())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| FetchError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|err| FetchError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Spaces successive page fetches at least `window` apart.
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub async fn wait(&mut self) {
        if let Some(previous) = self.last {
            let elapsed = previous.elapsed();
            if elapsed < self.window {
                sleep(self.window - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttle_spaces_calls() {
        let mut throttle = Throttle::new(Duration::from_millis(30));
        let started = Instant::now();
        throttle.wait().await;
        assert!(started.elapsed() < Duration::from_millis(30));
        throttle.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_sending() {
        let fetcher = HttpFetcher::new("test-agent", 5, Duration::from_secs(1)).unwrap();
        let err = fetcher
            .get("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
