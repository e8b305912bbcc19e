//! Existence and venue-type voting: one vote per (event, user), toggled or switched by
//! repeated actions, with all-time and current-week tallies.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::Store;
use crate::models::{Ballot, ExistenceCounts, ExistenceVote, Tally, VenueCounts, VenueVote};

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("user id is required")]
    MissingUser,
    #[error("invalid event id: {0}")]
    InvalidEvent(i64),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// No previous vote; a row was inserted.
    Cast,
    /// Same type as the previous vote; the row was deleted.
    Withdrawn,
    /// Opposite type; the row was updated to the new type and time.
    Switched,
}

pub fn transition<B: Ballot>(existing: Option<B>, requested: B) -> Transition {
    match existing {
        None => Transition::Cast,
        Some(current) if current == requested => Transition::Withdrawn,
        Some(_) => Transition::Switched,
    }
}

/// Half-open ISO week containing `now`: Monday 00:00 UTC up to the next Monday 00:00 UTC.
pub fn week_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now.date_naive() - Duration::days(days_from_monday);
    let start = monday.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(7))
}

pub fn cast_existence_vote(
    store: &mut Store,
    event_id: i64,
    vote: ExistenceVote,
    user_id: &str,
) -> Result<ExistenceCounts, VoteError> {
    cast_at(store, event_id, vote, user_id, Utc::now()).map(ExistenceCounts::from)
}

pub fn cast_venue_vote(
    store: &mut Store,
    event_id: i64,
    vote: VenueVote,
    user_id: &str,
) -> Result<VenueCounts, VoteError> {
    cast_at(store, event_id, vote, user_id, Utc::now()).map(VenueCounts::from)
}

pub fn cast_at<B: Ballot>(
    store: &mut Store,
    event_id: i64,
    ballot: B,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Tally, VoteError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(VoteError::MissingUser);
    }
    if event_id <= 0 {
        return Err(VoteError::InvalidEvent(event_id));
    }

    match store.cast_ballot(event_id, ballot, user_id, now) {
        Ok((transition, tally)) => {
            tracing::info!(
                event_id,
                table = B::TABLE,
                vote = ballot.as_str(),
                ?transition,
                "vote recorded"
            );
            Ok(tally)
        }
        Err(err) => {
            tracing::error!(event_id, table = B::TABLE, "vote transaction failed: {err}");
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_event;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn store_with_event() -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert_event(
                &sample_event("Salsa Night", "2025-07-11", "https://a.de/x"),
                at("2025-07-01T10:00:00Z"),
            )
            .unwrap();
        (store, id)
    }

    #[test]
    fn week_starts_monday_midnight_utc() {
        let (start, end) = week_bounds(at("2025-07-10T18:30:00Z"));
        assert_eq!(start, at("2025-07-07T00:00:00Z"));
        assert_eq!(end, at("2025-07-14T00:00:00Z"));

        let (start, _) = week_bounds(at("2025-07-13T23:59:59Z"));
        assert_eq!(start, at("2025-07-07T00:00:00Z"));

        let (start, _) = week_bounds(at("2025-07-14T00:00:00Z"));
        assert_eq!(start, at("2025-07-14T00:00:00Z"));
    }

    #[test]
    fn transitions_follow_toggle_law() {
        use ExistenceVote::*;
        assert_eq!(transition(None, Exists), Transition::Cast);
        assert_eq!(transition(Some(Exists), Exists), Transition::Withdrawn);
        assert_eq!(transition(Some(Exists), NotExists), Transition::Switched);
    }

    #[test]
    fn same_vote_twice_withdraws() {
        let (mut store, id) = store_with_event();
        let now = at("2025-07-10T12:00:00Z");

        let tally = cast_at(&mut store, id, ExistenceVote::Exists, "u1", now).unwrap();
        assert_eq!(
            ExistenceCounts::from(tally),
            ExistenceCounts {
                exists: 1,
                notexists: 0,
                week_exists: 1,
                week_not_exists: 0
            }
        );

        let tally = cast_at(&mut store, id, ExistenceVote::Exists, "u1", now).unwrap();
        assert_eq!(ExistenceCounts::from(tally), ExistenceCounts::default());
        assert!(store.votes_for::<ExistenceVote>(id).unwrap().is_empty());
    }

    #[test]
    fn opposite_vote_switches_and_refreshes_timestamp() {
        let (mut store, id) = store_with_event();
        cast_at(
            &mut store,
            id,
            VenueVote::Indoor,
            "u1",
            at("2025-06-02T12:00:00Z"),
        )
        .unwrap();

        let now = at("2025-07-10T12:00:00Z");
        let counts = VenueCounts::from(cast_at(&mut store, id, VenueVote::Outdoor, "u1", now).unwrap());
        assert_eq!(
            counts,
            VenueCounts {
                indoor: 0,
                outdoor: 1,
                week_indoor: 0,
                week_outdoor: 1
            }
        );
        let rows = store.votes_for::<VenueVote>(id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, now);
    }

    #[test]
    fn weekly_counts_only_include_current_week() {
        let (mut store, id) = store_with_event();
        cast_at(&mut store, id, ExistenceVote::Exists, "old", at("2025-07-06T23:59:59Z")).unwrap();
        cast_at(&mut store, id, ExistenceVote::NotExists, "a", at("2025-07-07T00:00:00Z")).unwrap();
        let tally =
            cast_at(&mut store, id, ExistenceVote::Exists, "b", at("2025-07-09T08:00:00Z")).unwrap();

        assert_eq!(
            ExistenceCounts::from(tally),
            ExistenceCounts {
                exists: 2,
                notexists: 1,
                week_exists: 1,
                week_not_exists: 1
            }
        );
    }

    #[test]
    fn one_row_per_user_after_any_sequence() {
        use ExistenceVote::*;
        let (mut store, id) = store_with_event();
        let now = at("2025-07-10T12:00:00Z");
        let sequence = [Exists, NotExists, NotExists, Exists, Exists, Exists, NotExists];

        let mut expected: Option<ExistenceVote> = None;
        for vote in sequence {
            cast_at(&mut store, id, vote, "u1", now).unwrap();
            cast_at(&mut store, id, Exists, "other", now).ok();
            expected = match transition(expected, vote) {
                Transition::Withdrawn => None,
                _ => Some(vote),
            };
            let rows: Vec<_> = store
                .votes_for::<ExistenceVote>(id)
                .unwrap()
                .into_iter()
                .filter(|row| row.user_id == "u1")
                .collect();
            assert!(rows.len() <= 1);
            assert_eq!(rows.first().map(|row| row.kind.as_str()), expected.map(|v| v.as_str()));
        }
    }

    #[test]
    fn blank_user_is_rejected() {
        let (mut store, id) = store_with_event();
        assert!(matches!(
            cast_existence_vote(&mut store, id, ExistenceVote::Exists, "  "),
            Err(VoteError::MissingUser)
        ));
    }
}
