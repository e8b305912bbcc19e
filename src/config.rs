use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::utils;

pub const DEFAULT_USER_AGENT: &str = "TanzpartyBot/1.0 (+https://github.com/salsa-finder/bot-info)";
pub const MIN_REQUEST_DELAY_MS: u64 = 2000;
pub const MAX_RECENCY_DAYS: i64 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub user_agent: String,
    pub search_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub site_scope: String,
    pub recency_window_days: i64,
    pub request_delay_ms: u64,
    pub fetch_timeout_secs: u64,
    pub robots_timeout_secs: u64,
    pub max_redirects: usize,
    pub content_char_budget: usize,
    pub min_event_year: i32,
    pub relevance_filter: bool,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            search_api_key: None,
            search_engine_id: None,
            site_scope: "site:.de".to_string(),
            recency_window_days: 3,
            request_delay_ms: MIN_REQUEST_DELAY_MS,
            fetch_timeout_secs: 10,
            robots_timeout_secs: 5,
            max_redirects: 5,
            content_char_budget: 10_000,
            min_event_year: 2024,
            relevance_filter: true,
            llm_endpoint: "http://127.0.0.1:1234/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_api_key: None,
            llm_temperature: 0.1,
            llm_max_tokens: 4000,
        }
    }
}

impl AppConfig {
    /// Reads `config.json` from the data directory (if present) and layers the environment on top.
    pub fn load() -> Result<Self, String> {
        let mut config = read_config(&utils::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SALSA_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(agent) = lookup("SALSA_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(key) = lookup("GOOGLE_API_KEY") {
            self.search_api_key = Some(key);
        }
        if let Some(cx) = lookup("GOOGLE_CSE_ID") {
            self.search_engine_id = Some(cx);
        }
        if let Some(scope) = lookup("SALSA_SITE_SCOPE") {
            self.site_scope = scope;
        }
        if let Some(days) = lookup("SALSA_RECENCY_DAYS").and_then(|s| s.parse().ok()) {
            self.recency_window_days = days;
        }
        if let Some(delay) = lookup("SALSA_REQUEST_DELAY_MS").and_then(|s| s.parse().ok()) {
            self.request_delay_ms = delay;
        }
        if let Some(budget) = lookup("SALSA_CONTENT_BUDGET").and_then(|s| s.parse().ok()) {
            self.content_char_budget = budget;
        }
        if let Some(year) = lookup("SALSA_MIN_YEAR").and_then(|s| s.parse().ok()) {
            self.min_event_year = year;
        }
        if let Some(flag) = lookup("SALSA_RELEVANCE_FILTER").and_then(|s| parse_flag(&s)) {
            self.relevance_filter = flag;
        }
        if let Some(endpoint) = lookup("LLM_ENDPOINT") {
            self.llm_endpoint = endpoint;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm_model = model;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(temperature) = lookup("LLM_TEMPERATURE").and_then(|s| s.parse().ok()) {
            self.llm_temperature = temperature;
        }
        if let Some(max_tokens) = lookup("LLM_MAX_TOKENS").and_then(|s| s.parse().ok()) {
            self.llm_max_tokens = max_tokens;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    /// Politeness delay between page fetches; never shorter than two seconds.
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms.max(MIN_REQUEST_DELAY_MS))
    }

    /// Recency window, bounded to `0..=MAX_RECENCY_DAYS` days.
    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.recency_window_days.clamp(0, MAX_RECENCY_DAYS))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn robots_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_timeout_secs)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config(path: &Path) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str(&contents).map_err(|err| err.to_string())
}
