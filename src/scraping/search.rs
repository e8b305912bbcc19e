use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

const TOPIC_TERM: &str = "Veranstaltung";
const DEFAULT_STYLE: &str = "Salsa";
const GOOGLE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search provider is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("search request failed: {0}")]
    Http(String),
    #[error("search response could not be parsed: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub snippet: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// `"<style> Veranstaltung <weekday> <city> <scope>"`, with at most one style term.
pub fn build_query(city: &str, weekday: Option<&str>, styles: &[String], site_scope: &str) -> String {
    let style = styles
        .iter()
        .map(|style| style.trim())
        .find(|style| !style.is_empty())
        .unwrap_or(DEFAULT_STYLE);

    [style, TOPIC_TERM, weekday.unwrap_or(""), city, site_scope]
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct GoogleSearch {
    api_key: String,
    engine_id: String,
    user_agent: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: Option<String>,
    snippet: Option<String>,
}

impl GoogleSearch {
    pub fn from_config(config: &AppConfig) -> Result<Self, SearchError> {
        let api_key = config
            .search_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(SearchError::NotConfigured("GOOGLE_API_KEY"))?;
        let engine_id = config
            .search_engine_id
            .clone()
            .filter(|cx| !cx.trim().is_empty())
            .ok_or(SearchError::NotConfigured("GOOGLE_CSE_ID"))?;
        Ok(Self {
            api_key,
            engine_id,
            user_agent: config.user_agent.clone(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let url = Url::parse_with_params(
            GOOGLE_ENDPOINT,
            [
                ("q", query),
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("num", "10"),
                ("hl", "de"),
            ],
        )
        .map_err(|err| SearchError::Http(err.to_string()))?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|err| SearchError::Http(err.without_url().to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| SearchError::Http(err.without_url().to_string()))?;
        if !status.is_success() {
            return Err(SearchError::Http(format!("HTTP {status}: {body}")));
        }

        parse_results(&body)
    }
}

fn parse_results(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let payload: SearchResponse =
        serde_json::from_str(body).map_err(|err| SearchError::Parse(err.to_string()))?;
    Ok(payload
        .items
        .into_iter()
        .filter_map(|item| {
            let url = item.link?.trim().to_string();
            (!url.is_empty()).then_some(SearchHit {
                url,
                snippet: item.snippet,
            })
        })
        .collect())
}
