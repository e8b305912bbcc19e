use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::BaseRecurrence;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VenueType {
    Indoor,
    Outdoor,
    #[default]
    Unspecified,
}

impl VenueType {
    pub fn as_str(self) -> &'static str {
        match self {
            VenueType::Indoor => "Indoor",
            VenueType::Outdoor => "Outdoor",
            VenueType::Unspecified => "Unspecified",
        }
    }

    /// Lenient parse of oracle/stored values; unknown strings yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "indoor" => Some(VenueType::Indoor),
            "outdoor" | "open air" | "open-air" => Some(VenueType::Outdoor),
            "unspecified" => Some(VenueType::Unspecified),
            _ => None,
        }
    }
}

impl fmt::Display for VenueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Workshop {
    pub style: Option<String>,
    pub level: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub instructors: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Floor {
    pub floor: String,
    pub distribution: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct Party {
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub floors: Vec<Floor>,
}

/// A normalized event ready to be written; one per concrete date.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub dance_styles: Vec<String>,
    pub date: NaiveDate,
    pub time: Option<String>,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: String,
    pub venue_type: VenueType,
    pub workshop_date: Option<NaiveDate>,
    pub workshop_time: Option<String>,
    pub party_date: Option<NaiveDate>,
    pub party_time: Option<String>,
    pub workshops: Vec<Workshop>,
    pub party: Option<Party>,
    pub description: Option<String>,
    pub recurrence: Option<String>,
    pub base_recurrence: Option<BaseRecurrence>,
    pub recurring_pattern: Option<String>,
    pub source: String,
    /// Earliest member of its multi-date series (or a standalone event).
    pub is_primary: bool,
    /// Identifies the candidate this record was expanded from within one run.
    pub group: usize,
}

/// A stored event row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub dance_styles: Vec<String>,
    pub date: NaiveDate,
    pub time: Option<String>,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub venue_type: VenueType,
    pub workshop_date: Option<NaiveDate>,
    pub workshop_time: Option<String>,
    pub party_date: Option<NaiveDate>,
    pub party_time: Option<String>,
    pub workshops: Vec<Workshop>,
    pub party: Option<Party>,
    pub description: Option<String>,
    pub recurrence: Option<String>,
    pub base_recurrence: Option<BaseRecurrence>,
    pub source: String,
    pub trusted: bool,
    pub collected_at: DateTime<Utc>,
    pub original_event_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid vote type: {0}")]
pub struct InvalidBallot(pub String);

/// A vote kind stored in its own table with exactly two choices.
pub trait Ballot: Copy + Eq + fmt::Debug + Send + 'static {
    const TABLE: &'static str;
    const CHOICES: [Self; 2];

    fn as_str(self) -> &'static str;

    fn index(self) -> usize {
        Self::CHOICES
            .iter()
            .position(|choice| *choice == self)
            .unwrap_or(0)
    }

    fn from_db(value: &str) -> Option<Self> {
        Self::CHOICES
            .into_iter()
            .find(|choice| choice.as_str() == value)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExistenceVote {
    Exists,
    NotExists,
}

impl Ballot for ExistenceVote {
    const TABLE: &'static str = "votes";
    const CHOICES: [Self; 2] = [ExistenceVote::Exists, ExistenceVote::NotExists];

    fn as_str(self) -> &'static str {
        match self {
            ExistenceVote::Exists => "exists",
            ExistenceVote::NotExists => "notexists",
        }
    }
}

impl FromStr for ExistenceVote {
    type Err = InvalidBallot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s.trim()).ok_or_else(|| InvalidBallot(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VenueVote {
    Indoor,
    Outdoor,
}

impl Ballot for VenueVote {
    const TABLE: &'static str = "venue_votes";
    const CHOICES: [Self; 2] = [VenueVote::Indoor, VenueVote::Outdoor];

    fn as_str(self) -> &'static str {
        match self {
            VenueVote::Indoor => "indoor",
            VenueVote::Outdoor => "outdoor",
        }
    }
}

impl FromStr for VenueVote {
    type Err = InvalidBallot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s.trim()).ok_or_else(|| InvalidBallot(s.to_string()))
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct VoteRow {
    pub id: i64,
    pub event_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub date: DateTime<Utc>,
    pub user_id: String,
}

/// Raw per-choice counts, indexed by `Ballot::index`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: [u32; 2],
    pub week: [u32; 2],
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceCounts {
    pub exists: u32,
    pub notexists: u32,
    pub week_exists: u32,
    pub week_not_exists: u32,
}

impl From<Tally> for ExistenceCounts {
    fn from(tally: Tally) -> Self {
        Self {
            exists: tally.total[0],
            notexists: tally.total[1],
            week_exists: tally.week[0],
            week_not_exists: tally.week[1],
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VenueCounts {
    pub indoor: u32,
    pub outdoor: u32,
    pub week_indoor: u32,
    pub week_outdoor: u32,
}

impl From<Tally> for VenueCounts {
    fn from(tally: Tally) -> Self {
        Self {
            indoor: tally.total[0],
            outdoor: tally.total[1],
            week_indoor: tally.week[0],
            week_outdoor: tally.week[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_serialize_with_api_field_names() {
        let counts = ExistenceCounts::from(Tally {
            total: [3, 1],
            week: [2, 0],
        });
        let value = serde_json::to_value(counts).unwrap();
        assert_eq!(value["exists"], 3);
        assert_eq!(value["notexists"], 1);
        assert_eq!(value["weekExists"], 2);
        assert_eq!(value["weekNotExists"], 0);

        let venue = serde_json::to_value(VenueCounts::default()).unwrap();
        assert_eq!(venue["weekIndoor"], 0);
        assert_eq!(venue["weekOutdoor"], 0);
    }

    #[test]
    fn ballots_parse_only_their_own_vocabulary() {
        assert_eq!("exists".parse::<ExistenceVote>(), Ok(ExistenceVote::Exists));
        assert_eq!(
            "notexists".parse::<ExistenceVote>(),
            Ok(ExistenceVote::NotExists)
        );
        assert!("indoor".parse::<ExistenceVote>().is_err());
        assert_eq!("outdoor".parse::<VenueVote>(), Ok(VenueVote::Outdoor));
        assert_eq!(VenueVote::Outdoor.index(), 1);
    }

    #[test]
    fn venue_type_parse_is_lenient() {
        assert_eq!(VenueType::parse(" OUTDOOR "), Some(VenueType::Outdoor));
        assert_eq!(VenueType::parse("Open Air"), Some(VenueType::Outdoor));
        assert_eq!(VenueType::parse("garage"), None);
    }
}
