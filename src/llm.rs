use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::candidate::{DANCE_STYLES, DEFAULT_EVENT_TIME};
use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Turns a prompt into free-form text that may or may not contain the requested JSON.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

const SYSTEM_PROMPT: &str = "You extract Latin dance social events from German web pages. \
     Answer with a single JSON object and nothing else. Never invent dates, venues or times.";

pub struct LLMOracle {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl LLMOracle {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm_model.clone(),
            base_url: config.llm_endpoint.clone(),
            api_key: config.llm_api_key.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ExtractionOracle for LLMOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{}/chat/completions", base);

        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .await
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        if !status.is_success() {
            return Err(OracleError::Unavailable(format!(
                "HTTP {}: {}",
                status, text_body
            )));
        }

        let value: Value = serde_json::from_str(&text_body)
            .map_err(|err| OracleError::Unavailable(err.to_string()))?;

        value
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OracleError::Unavailable("LLM response missing content".to_string()))
    }
}

/// The instruction payload: schema, enumerations, date/recurrence rules and fallbacks.
pub fn build_extraction_prompt(
    content: &str,
    url: &str,
    city: &str,
    fallback_date: NaiveDate,
) -> String {
    let styles = DANCE_STYLES.join(", ");
    let date = fallback_date.format("%Y-%m-%d");
    let default_time = DEFAULT_EVENT_TIME;
    format!(
        r#"Extract Latin dance social events (parties, socials, milongas) from the web page content below.
Skip pure courses or lessons unless a party or social follows them.

Return exactly one JSON object with this structure and no other text:
{{
  "events": [
    {{
      "title": "Event title",
      "dance_styles": ["Salsa", "Bachata"],
      "date": "YYYY-MM-DD" or null,
      "time": "HH:MM",
      "venue_name": "Venue name" or null,
      "venue_address": "Full street address" or null,
      "venue_type": "Indoor" | "Outdoor" | "Unspecified",
      "workshop_date": "YYYY-MM-DD" or null,
      "workshop_time": "HH:MM" or null,
      "party_date": "YYYY-MM-DD" or null,
      "party_time": "HH:MM" or null,
      "workshops": [{{"style": "Salsa", "level": "Beginner", "start": "HH:MM", "end": "HH:MM", "instructors": ["Name"]}}],
      "party": {{"start": "HH:MM", "end": "HH:MM" or null, "floors": [{{"floor": "1", "distribution": "60% Salsa, 40% Bachata"}}]}} or null,
      "description": "One or two sentences",
      "recurrence": "Human readable recurrence, e.g. jeden Freitag" or null,
      "recurring_pattern": "weekly" | "biweekly" | "monthly" | "weekly_<weekday>" | "biweekly_<weekday>" | "monthly_<weekday>" or null,
      "multiple_dates": ["YYYY-MM-DD", "YYYY-MM-DD"] or null
    }}
  ]
}}

Rules:
1. dance_styles may only contain values from this list: {styles}
2. venue_type must be exactly "Indoor", "Outdoor" or "Unspecified". Open Air, draußen, Garten, Terrasse, Innenhof, Park, Strand or "bei gutem Wetter" mean Outdoor; clubs, bars, restaurants, studios and dance schools mean Indoor.
3. Dates written with numbers are day-first: 20.08.2025 is 2025-08-20 (day 20, month 08), 05.11. is the 5th of November. German month names: Januar=01, Februar=02, März=03, April=04, Mai=05, Juni=06, Juli=07, August=08, September=09, Oktober=10, November=11, Dezember=12.
4. recurring_pattern uses English weekday names in lowercase: "jeden Freitag" or "wöchentlich freitags" is "weekly_friday", "alle zwei Wochen" or "zweiwöchentlich" is "biweekly", "monatlich" or "jeden ersten Samstag" is "monthly" or "monthly_saturday".
5. If a recurring event names no concrete date, set "date" to null and fill recurring_pattern. If there is no date and no recurrence, use {date}.
6. If no specific time is found, use "{default_time}".
7. If one event lists several concrete dates, put all of them in multiple_dates.
8. If nothing qualifies, return {{"events": []}}.

Search city: {city}
Source URL: {url}

Content:
{content}
"#
    )
}

/// Pulls the candidate list out of an untrusted reply; any shape problem yields an empty list.
pub fn parse_oracle_reply(reply: &str) -> Vec<Value> {
    let stripped = strip_code_fences(reply);
    let Some(span) = first_json_object(&stripped) else {
        tracing::warn!("oracle reply contains no JSON object");
        return Vec::new();
    };
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(mut map)) => match map.remove("events") {
            Some(Value::Array(events)) => events,
            _ => {
                tracing::warn!("oracle reply has no events array");
                Vec::new()
            }
        },
        Ok(_) => Vec::new(),
        Err(err) => {
            tracing::warn!("oracle reply is not valid JSON: {err}");
            Vec::new()
        }
    }
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid fence regex"));

/// Removes fence markers only, so JSON sharing a line with a fence survives.
fn strip_code_fences(reply: &str) -> String {
    CODE_FENCE.replace_all(reply, "").into_owned()
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
