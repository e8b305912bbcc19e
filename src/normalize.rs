//! Turns validated candidates into storable events: derived city, resolved dates and
//! one record per concrete date.

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::candidate::{Candidate, DEFAULT_EVENT_TIME};
use crate::models::NewEvent;
use crate::recurrence::{self, RecurrencePattern};

const KNOWN_CITIES: &[&str] = &[
    "Berlin",
    "Hamburg",
    "München",
    "Köln",
    "Frankfurt",
    "Stuttgart",
    "Düsseldorf",
    "Leipzig",
    "Dortmund",
    "Essen",
    "Bremen",
    "Dresden",
    "Hannover",
    "Nürnberg",
    "Duisburg",
    "Bochum",
    "Wuppertal",
    "Bielefeld",
    "Bonn",
    "Münster",
    "Mannheim",
    "Karlsruhe",
    "Augsburg",
    "Wiesbaden",
    "Mainz",
    "Aachen",
    "Kiel",
    "Lübeck",
    "Rostock",
    "Potsdam",
    "Freiburg",
    "Heidelberg",
    "Regensburg",
    "Würzburg",
    "Erfurt",
    "Magdeburg",
    "Halle",
    "Saarbrücken",
    "Kassel",
    "Braunschweig",
    "Oldenburg",
    "Osnabrück",
    "Ulm",
    "Göttingen",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Skip {
    #[error("event date {0} predates {1}")]
    Stale(NaiveDate, i32),
}

/// Per-run inputs the normalizer needs besides the candidate itself.
#[derive(Debug, Clone)]
pub struct NormalizeContext<'a> {
    pub search_city: &'a str,
    pub search_date: NaiveDate,
    pub today: NaiveDate,
    pub min_year: i32,
    pub source: &'a str,
}

/// Scans the address for a known city (word-wise, case-insensitive).
pub fn derive_city(address: Option<&str>, fallback: &str) -> String {
    address
        .and_then(|address| {
            let lower = address.to_lowercase();
            let words: Vec<&str> = lower
                .split(|c: char| !c.is_alphanumeric())
                .filter(|word| !word.is_empty())
                .collect();
            KNOWN_CITIES
                .iter()
                .find(|city| words.contains(&city.to_lowercase().as_str()))
        })
        .map(|city| city.to_string())
        .unwrap_or_else(|| fallback.trim().to_string())
}

/// The candidate's primary date: explicit date, else the next weekday occurrence of its
/// pattern, else the search date.
pub fn resolve_date(candidate: &Candidate, ctx: &NormalizeContext<'_>) -> NaiveDate {
    if let Some(date) = candidate.date {
        return date;
    }
    candidate
        .recurring_pattern
        .as_deref()
        .and_then(|tag| recurrence::calculate_next_occurrence(tag, ctx.search_date, ctx.today))
        .unwrap_or(ctx.search_date)
}

/// Normalizes one candidate into one event per date. `group` tags every record expanded
/// from this candidate so series can be linked after insertion.
pub fn normalize(
    candidate: Candidate,
    ctx: &NormalizeContext<'_>,
    group: usize,
) -> Result<Vec<NewEvent>, Skip> {
    let primary_date = resolve_date(&candidate, ctx);

    let mut dates = candidate.multiple_dates.clone();
    dates.sort();
    dates.dedup();
    let listed = dates.len();
    dates.retain(|date| date.year() >= ctx.min_year);
    if listed != dates.len() {
        tracing::debug!(
            title = %candidate.title,
            dropped = listed - dates.len(),
            "dropping stale series dates"
        );
    }

    if dates.is_empty() {
        if primary_date.year() < ctx.min_year {
            return Err(Skip::Stale(primary_date, ctx.min_year));
        }
        if !candidate.multiple_dates.is_empty() {
            // Every listed date was stale.
            return Err(Skip::Stale(candidate.multiple_dates[0], ctx.min_year));
        }
        dates.push(primary_date);
    }

    let city = derive_city(candidate.venue_address.as_deref(), ctx.search_city);
    let base_recurrence = candidate
        .recurring_pattern
        .as_deref()
        .and_then(RecurrencePattern::parse)
        .map(|pattern| pattern.base);

    Ok(dates
        .into_iter()
        .enumerate()
        .map(|(index, date)| NewEvent {
            title: candidate.title.clone(),
            dance_styles: candidate.dance_styles.clone(),
            date,
            time: Some(
                candidate
                    .time
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EVENT_TIME.to_string()),
            ),
            venue_name: candidate.venue_name.clone(),
            address: candidate.venue_address.clone(),
            city: city.clone(),
            venue_type: candidate.venue_type,
            workshop_date: candidate.workshop_date,
            workshop_time: candidate.workshop_time.clone(),
            party_date: candidate.party_date,
            party_time: candidate.party_time.clone(),
            workshops: candidate.workshops.clone(),
            party: candidate.party.clone(),
            description: candidate.description.clone(),
            recurrence: candidate.recurrence.clone(),
            base_recurrence,
            recurring_pattern: candidate.recurring_pattern.clone(),
            source: ctx.source.to_string(),
            is_primary: index == 0,
            group,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::BaseRecurrence;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ctx(search_date: &str) -> NormalizeContext<'static> {
        NormalizeContext {
            search_city: "Berlin",
            search_date: date(search_date),
            today: date("2025-07-01"),
            min_year: 2024,
            source: "https://salsa.de/party",
        }
    }

    fn candidate(raw: serde_json::Value) -> Candidate {
        Candidate::from_value(&raw).unwrap()
    }

    #[test]
    fn city_comes_from_address_or_search() {
        assert_eq!(
            derive_city(Some("Venloer Str. 40, 50672 Köln"), "Berlin"),
            "Köln"
        );
        assert_eq!(derive_city(Some("Hallesches Ufer 2"), " Berlin "), "Berlin");
        assert_eq!(derive_city(None, "Hamburg"), "Hamburg");
    }

    #[test]
    fn weekly_pattern_without_date_resolves_to_next_weekday() {
        let events = normalize(
            candidate(json!({"title": "Salsa Freitag", "recurring_pattern": "weekly_friday"})),
            &ctx("2025-07-07"),
            0,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, date("2025-07-11"));
        assert_eq!(events[0].base_recurrence, Some(BaseRecurrence::Weekly));
        assert_eq!(events[0].recurring_pattern.as_deref(), Some("weekly_friday"));
        assert!(events[0].is_primary);
    }

    #[test]
    fn missing_date_falls_back_to_search_date() {
        let events = normalize(
            candidate(json!({"title": "Salsa Night", "date": "null", "recurring_pattern": "monthly"})),
            &ctx("2025-07-10"),
            0,
        )
        .unwrap();
        assert_eq!(events[0].date, date("2025-07-10"));
        assert_eq!(events[0].base_recurrence, Some(BaseRecurrence::Monthly));
        assert_eq!(events[0].source, "https://salsa.de/party");
        assert_eq!(events[0].city, "Berlin");
        assert_eq!(events[0].time.as_deref(), Some("20:00"));
    }

    #[test]
    fn stale_events_are_skipped() {
        let result = normalize(
            candidate(json!({"title": "Salsa 2019", "date": "2019-05-04"})),
            &ctx("2025-07-10"),
            0,
        );
        assert_eq!(result, Err(Skip::Stale(date("2019-05-04"), 2024)));
    }

    #[test]
    fn multiple_dates_expand_sorted_with_one_primary() {
        let events = normalize(
            candidate(json!({
                "title": "Bachata Sommer",
                "multiple_dates": ["2025-08-15", "2025-08-01", "2025-08-29"]
            })),
            &ctx("2025-07-10"),
            3,
        )
        .unwrap();
        let dates: Vec<NaiveDate> = events.iter().map(|event| event.date).collect();
        assert_eq!(
            dates,
            vec![date("2025-08-01"), date("2025-08-15"), date("2025-08-29")]
        );
        assert_eq!(events.iter().filter(|event| event.is_primary).count(), 1);
        assert!(events[0].is_primary);
        assert!(events.iter().all(|event| event.group == 3));
        assert!(events.iter().all(|event| event.title == "Bachata Sommer"));
    }

    #[test]
    fn stale_series_dates_are_dropped() {
        let events = normalize(
            candidate(json!({
                "title": "Kizomba",
                "multiple_dates": ["2025-09-05", "2023-09-01", "2025-09-05"]
            })),
            &ctx("2025-07-10"),
            0,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, date("2025-09-05"));
        assert!(events[0].is_primary);

        let all_stale = normalize(
            candidate(json!({"title": "Alt", "date": "2025-07-10", "multiple_dates": ["2022-01-07"]})),
            &ctx("2025-07-10"),
            0,
        );
        assert!(matches!(all_stale, Err(Skip::Stale(_, 2024))));
    }
}
