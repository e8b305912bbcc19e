use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::candidate::Candidate;
use crate::config::AppConfig;
use crate::db::Store;
use crate::llm::{build_extraction_prompt, parse_oracle_reply, ExtractionOracle, LLMOracle};
use crate::models::NewEvent;
use crate::normalize::{normalize, NormalizeContext};
use crate::recurrence::german_weekday;
use crate::scraping::{
    build_query, fetch_page_text, is_allowed_by_robots, is_relevant, FetchError, GoogleSearch,
    HttpFetcher, PageFetcher, SearchError, SearchProvider, Throttle,
};

static CITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z\x{C0}-\x{FF}0-9\s'-]{1,100}$").expect("valid city regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("invalid city: {0:?}")]
    InvalidCity(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Validated search parameters for one discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub city: String,
    pub date: Option<NaiveDate>,
    pub weekday: Option<String>,
    pub styles: Vec<String>,
}

impl DiscoveryRequest {
    pub fn new(
        city: &str,
        date: Option<&str>,
        weekday: Option<&str>,
        styles: Vec<String>,
    ) -> Result<Self, RequestError> {
        let city = city.trim();
        if !CITY_RE.is_match(city) {
            return Err(RequestError::InvalidCity(city.to_string()));
        }
        let date = date
            .map(str::trim)
            .filter(|date| !date.is_empty())
            .map(|raw| {
                // Strict YYYY-MM-DD; chrono alone would accept unpadded fields.
                let well_formed = raw.len() == 10
                    && raw.as_bytes()[4] == b'-'
                    && raw.as_bytes()[7] == b'-';
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .filter(|_| well_formed)
                    .ok_or_else(|| RequestError::InvalidDate(raw.to_string()))
            })
            .transpose()?;
        Ok(Self {
            city: city.to_string(),
            date,
            weekday: weekday
                .map(str::trim)
                .filter(|weekday| !weekday.is_empty())
                .map(str::to_string),
            styles,
        })
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SearchQuery,
    SearchResults,
    SearchError,
    NoResults,
    ProcessingUrl,
    SkipRecent,
    RobotsBlocked,
    ScrapeFailed,
    NotRelevant,
    OracleFailed,
    NoEvents,
    CandidateRejected,
    EventsExtracted,
    TotalExtracted,
    SkipDuplicate,
    DbInserted,
    DbInsertError,
    SeriesLinked,
    Complete,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub step: StepKind,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: Vec<Step>,
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub errored: usize,
    /// Set when the run stopped before processing any page.
    pub aborted: Option<String>,
}

impl RunSummary {
    fn push(&mut self, step: StepKind, message: impl Into<String>) {
        self.steps.push(Step {
            step,
            message: message.into(),
        });
    }

    pub fn count(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|step| step.step == kind).count()
    }
}

#[derive(Debug, Default)]
struct SeriesGroup {
    primary: Option<i64>,
    siblings: Vec<i64>,
}

/// The scrape-and-persist pipeline with its collaborators.
pub struct Discovery {
    config: AppConfig,
    search: Box<dyn SearchProvider>,
    fetcher: Box<dyn PageFetcher>,
    oracle: Box<dyn ExtractionOracle>,
    request_delay: Duration,
    clock: Option<DateTime<Utc>>,
}

impl Discovery {
    pub fn new(
        config: AppConfig,
        search: Box<dyn SearchProvider>,
        fetcher: Box<dyn PageFetcher>,
        oracle: Box<dyn ExtractionOracle>,
    ) -> Self {
        let request_delay = config.request_delay();
        Self {
            config,
            search,
            fetcher,
            oracle,
            request_delay,
            clock: None,
        }
    }

    /// Wires the live Google search, HTTP fetcher and chat-completions oracle.
    pub fn from_config(config: AppConfig) -> Result<Self, DiscoveryError> {
        let search = GoogleSearch::from_config(&config)?;
        let fetcher = HttpFetcher::from_config(&config)?;
        let oracle = LLMOracle::from_config(&config);
        Ok(Self::new(
            config,
            Box::new(search),
            Box::new(fetcher),
            Box::new(oracle),
        ))
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Pins "now" for recurrence resolution and collection timestamps.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    /// Runs one discovery pass. Per-URL and per-candidate failures are recorded as steps;
    /// the summary is always returned.
    pub async fn run(&self, store: &Store, request: &DiscoveryRequest) -> RunSummary {
        let mut summary = RunSummary::default();
        let now = self.now();
        let today = now.date_naive();
        let search_date = request.date.unwrap_or(today);
        let weekday = request
            .weekday
            .clone()
            .unwrap_or_else(|| german_weekday(search_date.weekday()).to_string());

        let query = build_query(
            &request.city,
            Some(&weekday),
            &request.styles,
            &self.config.site_scope,
        );
        tracing::info!(%query, city = %request.city, %search_date, "starting discovery");
        summary.push(StepKind::SearchQuery, query.clone());

        let hits = match self.search.search(&query).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::error!("search failed: {err}");
                summary.push(StepKind::SearchError, err.to_string());
                summary.aborted = Some(err.to_string());
                return summary;
            }
        };
        summary.push(
            StepKind::SearchResults,
            format!("search returned {} results", hits.len()),
        );
        if hits.is_empty() {
            tracing::info!("no search results");
            summary.push(StepKind::NoResults, "No search results found");
            return summary;
        }

        let mut throttle = Throttle::new(self.request_delay);
        let mut pending: Vec<NewEvent> = Vec::new();
        let mut next_group = 0usize;
        let total = hits.len();

        for (index, hit) in hits.iter().enumerate() {
            let url = hit.url.as_str();
            tracing::info!("[{}/{}] processing {url}", index + 1, total);
            summary.push(
                StepKind::ProcessingUrl,
                format!("{}/{}: {url}", index + 1, total),
            );

            match store.recently_scraped(url, self.config.recency_window(), now) {
                Ok(true) => {
                    tracing::info!(%url, "recently scraped, skipping");
                    summary.push(StepKind::SkipRecent, format!("Skipped: {url}"));
                    continue;
                }
                Ok(false) => {}
                Err(err) => tracing::warn!(%url, "recency check failed, fetching anyway: {err}"),
            }

            // Spaces every request to the site, robots.txt included.
            throttle.wait().await;

            if !is_allowed_by_robots(
                self.fetcher.as_ref(),
                url,
                &self.config.user_agent,
                self.config.robots_timeout(),
            )
            .await
            {
                tracing::info!(%url, "blocked by robots.txt");
                summary.push(StepKind::RobotsBlocked, format!("Blocked: {url}"));
                continue;
            }

            let Some(content) = fetch_page_text(
                self.fetcher.as_ref(),
                url,
                self.config.fetch_timeout(),
                self.config.content_char_budget,
            )
            .await
            else {
                summary.push(StepKind::ScrapeFailed, format!("Failed: {url}"));
                self.remember(store, url, false, 0, now);
                continue;
            };

            if self.config.relevance_filter && !is_relevant(&content) {
                tracing::info!(%url, "content not relevant");
                summary.push(StepKind::NotRelevant, format!("Not relevant: {url}"));
                self.remember(store, url, true, 0, now);
                continue;
            }

            let prompt = build_extraction_prompt(&content, url, &request.city, search_date);
            let reply = match self.oracle.complete(&prompt).await {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(%url, "oracle call failed: {err}");
                    summary.push(StepKind::OracleFailed, format!("{url}: {err}"));
                    self.remember(store, url, false, 0, now);
                    continue;
                }
            };

            let raw_events = parse_oracle_reply(&reply);
            let ctx = NormalizeContext {
                search_city: &request.city,
                search_date,
                today,
                min_year: self.config.min_event_year,
                source: url,
            };
            let mut extracted = 0usize;
            for raw in &raw_events {
                let candidate = match Candidate::from_value(raw) {
                    Ok(candidate) => candidate,
                    Err(err) => {
                        tracing::warn!(%url, "candidate rejected: {err}");
                        summary.push(StepKind::CandidateRejected, format!("{url}: {err}"));
                        summary.rejected += 1;
                        continue;
                    }
                };
                let title = candidate.title.clone();
                match normalize(candidate, &ctx, next_group) {
                    Ok(events) => {
                        next_group += 1;
                        extracted += events.len();
                        pending.extend(events);
                    }
                    Err(skip) => {
                        tracing::warn!(%url, %title, "candidate skipped: {skip}");
                        summary.push(StepKind::CandidateRejected, format!("{title}: {skip}"));
                        summary.rejected += 1;
                    }
                }
            }

            if extracted == 0 {
                tracing::info!(%url, "no events found");
                summary.push(StepKind::NoEvents, format!("No events: {url}"));
            } else {
                tracing::info!(%url, extracted, "events extracted");
                summary.push(
                    StepKind::EventsExtracted,
                    format!("{extracted} events from {url}"),
                );
            }
            self.remember(store, url, true, extracted, now);
        }

        tracing::info!(total = pending.len(), "extraction finished");
        summary.push(
            StepKind::TotalExtracted,
            format!("Total events extracted: {}", pending.len()),
        );

        self.persist(store, &pending, now, &mut summary);

        tracing::info!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            errored = summary.errored,
            "discovery complete"
        );
        let message = format!("Successfully inserted {} new events", summary.inserted);
        summary.push(StepKind::Complete, message);
        summary
    }

    /// Inserts every new event, then links each multi-date group to its primary.
    fn persist(
        &self,
        store: &Store,
        pending: &[NewEvent],
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) {
        let group_count = pending.iter().map(|event| event.group + 1).max().unwrap_or(0);
        let mut groups: Vec<SeriesGroup> = (0..group_count).map(|_| SeriesGroup::default()).collect();

        for event in pending {
            let group = &mut groups[event.group];
            match store.find_duplicate(&event.source, event.date, &event.title) {
                Ok(Some((existing, original))) => {
                    tracing::info!(title = %event.title, date = %event.date, "skipping duplicate");
                    summary.push(StepKind::SkipDuplicate, event.title.clone());
                    summary.skipped += 1;
                    if event.is_primary {
                        group.primary = Some(original.unwrap_or(existing));
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(title = %event.title, "duplicate check failed: {err}");
                    summary.push(StepKind::DbInsertError, format!("{}: {err}", event.title));
                    summary.errored += 1;
                    continue;
                }
            }

            match store.insert_event(event, now) {
                Ok(id) => {
                    tracing::info!(id, title = %event.title, date = %event.date, "inserted event");
                    summary.push(StepKind::DbInserted, event.title.clone());
                    summary.inserted += 1;
                    if event.is_primary {
                        group.primary = Some(id);
                    } else {
                        group.siblings.push(id);
                    }
                }
                Err(err) => {
                    tracing::warn!(title = %event.title, "insert failed: {err}");
                    summary.push(StepKind::DbInsertError, format!("{}: {err}", event.title));
                    summary.errored += 1;
                }
            }
        }

        for group in groups {
            let (primary, siblings) = match group.primary {
                Some(primary) => (primary, group.siblings.as_slice()),
                // The earliest sibling that made it in stands in for a failed primary.
                None => match group.siblings.split_first() {
                    Some((first, rest)) => (*first, rest),
                    None => continue,
                },
            };
            if siblings.is_empty() {
                continue;
            }
            match store.link_series(primary, siblings) {
                Ok(linked) => {
                    tracing::info!(primary, linked, "linked series");
                    summary.push(
                        StepKind::SeriesLinked,
                        format!("{linked} events linked to {primary}"),
                    );
                }
                Err(err) => {
                    tracing::warn!(primary, "series linking failed: {err}");
                    summary.push(StepKind::DbInsertError, format!("series {primary}: {err}"));
                    summary.errored += 1;
                }
            }
        }
    }

    fn remember(&self, store: &Store, url: &str, success: bool, count: usize, now: DateTime<Utc>) {
        if let Err(err) = store.record_scraped_url(url, success, count, now) {
            tracing::warn!(%url, "could not record scraped url: {err}");
        }
    }
}

/// Validates the request, wires live collaborators from `config` and runs one pass.
pub async fn run_discovery(
    store: &Store,
    config: AppConfig,
    city: &str,
    date: Option<&str>,
    weekday: Option<&str>,
    styles: Vec<String>,
) -> Result<RunSummary, DiscoveryError> {
    let request = DiscoveryRequest::new(city, date, weekday, styles)?;
    let discovery = Discovery::from_config(config)?;
    Ok(discovery.run(store, &request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OracleError;
    use crate::scraping::SearchHit;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    struct OneHit;

    #[async_trait]
    impl SearchProvider for OneHit {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
            Ok(vec![SearchHit {
                url: "https://tanz.de/kalender".to_string(),
                snippet: None,
            }])
        }
    }

    struct Page;

    #[async_trait]
    impl PageFetcher for Page {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
            if url.ends_with("/robots.txt") {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok("<html><body><main>Salsa Party am Freitag</main></body></html>".to_string())
        }
    }

    struct Reply(&'static str);

    #[async_trait]
    impl ExtractionOracle for Reply {
        async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    fn discovery(reply: &'static str) -> Discovery {
        Discovery::new(
            AppConfig::default(),
            Box::new(OneHit),
            Box::new(Page),
            Box::new(Reply(reply)),
        )
        .with_request_delay(Duration::ZERO)
        .with_clock(
            DateTime::parse_from_rfc3339("2025-07-07T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn request_validation() {
        let request =
            DiscoveryRequest::new(" Frankfurt am Main ", Some("2025-07-10"), None, vec![]).unwrap();
        assert_eq!(request.city, "Frankfurt am Main");
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2025, 7, 10));

        assert!(DiscoveryRequest::new("Düsseldorf", None, Some(" "), vec![])
            .unwrap()
            .weekday
            .is_none());
        assert!(matches!(
            DiscoveryRequest::new("Berlin; DROP TABLE", None, None, vec![]),
            Err(RequestError::InvalidCity(_))
        ));
        assert!(matches!(
            DiscoveryRequest::new("", None, None, vec![]),
            Err(RequestError::InvalidCity(_))
        ));
        assert!(matches!(
            DiscoveryRequest::new("Berlin", Some("10.07.2025"), None, vec![]),
            Err(RequestError::InvalidDate(_))
        ));
        assert!(matches!(
            DiscoveryRequest::new("Berlin", Some("2025-7-1"), None, vec![]),
            Err(RequestError::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn query_uses_weekday_derived_from_date() {
        let store = Store::open_in_memory().unwrap();
        let request = DiscoveryRequest::new("Berlin", Some("2025-07-11"), None, vec![]).unwrap();
        let summary = discovery(r#"{"events": []}"#).run(&store, &request).await;
        assert_eq!(summary.steps[0].step, StepKind::SearchQuery);
        assert_eq!(
            summary.steps[0].message,
            "Salsa Veranstaltung Freitag Berlin site:.de"
        );
        assert_eq!(summary.count(StepKind::NoEvents), 1);
    }

    #[tokio::test]
    async fn insert_failure_does_not_abort_the_batch() {
        let store = Store::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER reject_broken BEFORE INSERT ON events
                 WHEN NEW.title = 'Kaputt'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let request = DiscoveryRequest::new("Berlin", Some("2025-07-10"), None, vec![]).unwrap();
        let summary = discovery(
            r#"{"events": [{"title": "Kaputt"}, {"title": "Salsa Night"}, {"date": "2025-07-12"}]}"#,
        )
        .run(&store, &request)
        .await;

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.count(StepKind::DbInsertError), 1);
        assert_eq!(store.count_events().unwrap(), 1);
        assert_eq!(summary.steps.last().unwrap().step, StepKind::Complete);
    }

    #[tokio::test]
    async fn series_with_failed_primary_links_to_earliest_sibling() {
        let store = Store::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER reject_first BEFORE INSERT ON events
                 WHEN NEW.date = '2025-08-01'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        let request = DiscoveryRequest::new("Berlin", Some("2025-07-10"), None, vec![]).unwrap();
        let summary = discovery(
            r#"{"events": [{"title": "Zouk Sommer", "multiple_dates": ["2025-08-15", "2025-08-01", "2025-08-29"]}]}"#,
        )
        .run(&store, &request)
        .await;

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.errored, 1);
        let events = store.search_events("Berlin", None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].original_event_id, None);
        assert_eq!(events[1].original_event_id, Some(events[0].id));
    }

    struct TwoHits;

    #[async_trait]
    impl SearchProvider for TwoHits {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
            Ok(["https://tanz.de/a", "https://tanz.de/b"]
                .into_iter()
                .map(|url| SearchHit {
                    url: url.to_string(),
                    snippet: None,
                })
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<(String, Instant)>>>);

    #[async_trait]
    impl PageFetcher for Recording {
        async fn get(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
            self.0
                .lock()
                .unwrap()
                .push((url.to_string(), Instant::now()));
            Page.get(url, timeout).await
        }
    }

    #[tokio::test]
    async fn robots_requests_are_throttled_too() {
        let store = Store::open_in_memory().unwrap();
        let requests = Recording::default();
        let request = DiscoveryRequest::new("Berlin", Some("2025-07-10"), None, vec![]).unwrap();
        Discovery::new(
            AppConfig::default(),
            Box::new(TwoHits),
            Box::new(requests.clone()),
            Box::new(Reply(r#"{"events": []}"#)),
        )
        .with_request_delay(Duration::from_millis(30))
        .run(&store, &request)
        .await;

        let log = requests.0.lock().unwrap();
        let robots: Vec<Instant> = log
            .iter()
            .filter(|(url, _)| url.ends_with("/robots.txt"))
            .map(|(_, at)| *at)
            .collect();
        assert_eq!(log.len(), 4);
        assert_eq!(robots.len(), 2);
        assert!(robots[1].duration_since(robots[0]) >= Duration::from_millis(30));
    }
}
