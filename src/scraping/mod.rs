pub mod base;
pub mod content;
pub mod relevance;
pub mod robots;
pub mod search;

pub use base::{FetchError, HttpFetcher, PageFetcher, Throttle};
pub use content::{extract_text, fetch_page_text};
pub use relevance::is_relevant;
pub use robots::{is_allowed_by_robots, RobotsTxt};
pub use search::{build_query, GoogleSearch, SearchError, SearchHit, SearchProvider};
