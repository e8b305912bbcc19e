pub mod candidate;
pub mod config;
pub mod db;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod recurrence;
pub mod scraping;
pub mod utils;
pub mod votes;

pub use config::AppConfig;
pub use db::Store;
pub use llm::{ExtractionOracle, LLMOracle, OracleError};
pub use models::{
    Event, ExistenceCounts, ExistenceVote, NewEvent, VenueCounts, VenueType, VenueVote,
};
pub use pipeline::{
    run_discovery, Discovery, DiscoveryError, DiscoveryRequest, RequestError, RunSummary, Step,
    StepKind,
};
pub use recurrence::{calculate_next_occurrence, BaseRecurrence};
pub use votes::{cast_existence_vote, cast_venue_vote, VoteError};
