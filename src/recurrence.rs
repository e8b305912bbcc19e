//! Recurrence tags produced by the extraction prompt (`weekly`, `biweekly_friday`,
//! `monthly`, ...) and the date arithmetic that turns them into concrete dates.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BaseRecurrence {
    Weekly,
    Biweekly,
    Monthly,
}

impl BaseRecurrence {
    pub fn as_str(self) -> &'static str {
        match self {
            BaseRecurrence::Weekly => "weekly",
            BaseRecurrence::Biweekly => "biweekly",
            BaseRecurrence::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "weekly" => Some(BaseRecurrence::Weekly),
            "biweekly" => Some(BaseRecurrence::Biweekly),
            "monthly" => Some(BaseRecurrence::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for BaseRecurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecurrencePattern {
    pub base: BaseRecurrence,
    pub weekday: Option<Weekday>,
}

impl RecurrencePattern {
    /// Parses tags such as `weekly`, `weekly_friday` or `biweekly_freitag`.
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace(['-', ' '], "_");
        let mut parts = normalized.split('_').filter(|part| !part.is_empty());
        let base = BaseRecurrence::parse(parts.next()?)?;
        let weekday = parts.find_map(parse_weekday);
        Some(Self { base, weekday })
    }
}

/// Strips weekday qualifiers: `weekly_friday` becomes `weekly`.
pub fn base_recurrence(tag: &str) -> Option<BaseRecurrence> {
    RecurrencePattern::parse(tag).map(|pattern| pattern.base)
}

pub fn parse_weekday(name: &str) -> Option<Weekday> {
    let weekday = match name.trim().to_lowercase().as_str() {
        "monday" | "mon" | "montag" => Weekday::Mon,
        "tuesday" | "tue" | "dienstag" => Weekday::Tue,
        "wednesday" | "wed" | "mittwoch" => Weekday::Wed,
        "thursday" | "thu" | "donnerstag" => Weekday::Thu,
        "friday" | "fri" | "freitag" => Weekday::Fri,
        "saturday" | "sat" | "samstag" | "sonnabend" => Weekday::Sat,
        "sunday" | "sun" | "sonntag" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

pub fn german_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Montag",
        Weekday::Tue => "Dienstag",
        Weekday::Wed => "Mittwoch",
        Weekday::Thu => "Donnerstag",
        Weekday::Fri => "Freitag",
        Weekday::Sat => "Samstag",
        Weekday::Sun => "Sonntag",
    }
}

/// First `weekday` strictly after `max(base, today)`.
///
/// A reference date that already falls on `weekday` rolls a full week forward.
pub fn next_weekday(weekday: Weekday, base: NaiveDate, today: NaiveDate) -> NaiveDate {
    let reference = base.max(today);
    let current = reference.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut offset = (target - current).rem_euclid(7);
    if offset == 0 {
        offset = 7;
    }
    reference + Duration::days(offset)
}

/// Resolves a weekday-qualified tag to its next occurrence; `None` when the tag names no weekday.
pub fn calculate_next_occurrence(tag: &str, base: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    let weekday = RecurrencePattern::parse(tag)?.weekday?;
    Some(next_weekday(weekday, base, today))
}
