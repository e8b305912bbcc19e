use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::models::{Ballot, Event, NewEvent, Party, Tally, VenueType, VoteRow, Workshop};
use crate::recurrence::BaseRecurrence;
use crate::utils;
use crate::votes::{self, Transition};

const EVENT_COLUMNS: &str = "id, title, dance_styles, date, time, venue_name, address, city, \
     venue_type, workshop_date, workshop_time, party_date, party_time, workshops, party, \
     description, recurrence, base_recurrence, source, trusted, timestamp, original_event_id";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open_default() -> rusqlite::Result<Self> {
        Self::open(&utils::database_path())
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        utils::ensure_parent(path);
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn close(self) -> rusqlite::Result<()> {
        self.conn.close().map_err(|(_, err)| err)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                dance_styles TEXT NOT NULL DEFAULT '[]',
                date TEXT NOT NULL,
                time TEXT,
                venue_name TEXT,
                address TEXT,
                city TEXT,
                venue_type TEXT NOT NULL DEFAULT 'Unspecified',
                workshop_date TEXT,
                workshop_time TEXT,
                party_date TEXT,
                party_time TEXT,
                workshops TEXT,
                party TEXT,
                description TEXT,
                recurrence TEXT,
                base_recurrence TEXT,
                recurring_pattern TEXT,
                source TEXT NOT NULL,
                trusted INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                original_event_id INTEGER REFERENCES events(id)
            );
            CREATE INDEX IF NOT EXISTS events_source_date_title ON events(source, date, title);
            CREATE INDEX IF NOT EXISTS events_original ON events(original_event_id);
            CREATE TABLE IF NOT EXISTS votes(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id),
                type TEXT NOT NULL CHECK(type IN ('exists', 'notexists')),
                date TEXT NOT NULL,
                user_id TEXT NOT NULL,
                UNIQUE(event_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS venue_votes(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id INTEGER NOT NULL REFERENCES events(id),
                type TEXT NOT NULL CHECK(type IN ('indoor', 'outdoor')),
                date TEXT NOT NULL,
                user_id TEXT NOT NULL,
                UNIQUE(event_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS scraped_urls(
                url TEXT PRIMARY KEY,
                last_success INTEGER NOT NULL,
                event_count INTEGER NOT NULL DEFAULT 0,
                last_scraped TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// True when the URL was already covered inside the recency window, either by a stored
    /// event sourced from it or by a successful scrape.
    pub fn recently_scraped(
        &self,
        url: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<bool> {
        let cutoff = now - window;
        let from_events = self
            .conn
            .query_row(
                "SELECT 1 FROM events WHERE source = ?1 AND timestamp > ?2 LIMIT 1",
                params![url, cutoff],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if from_events {
            return Ok(true);
        }
        let from_cache = self
            .conn
            .query_row(
                "SELECT 1 FROM scraped_urls WHERE url = ?1 AND last_success = 1 AND last_scraped > ?2",
                params![url, cutoff],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(from_cache)
    }

    pub fn record_scraped_url(
        &self,
        url: &str,
        success: bool,
        event_count: usize,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO scraped_urls (url, last_success, event_count, last_scraped)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
               last_success = excluded.last_success,
               event_count = excluded.event_count,
               last_scraped = excluded.last_scraped",
            params![url, success, event_count as i64, now],
        )?;
        Ok(())
    }

    /// Existing event with the same (source, date, title), returned as `(id, original_event_id)`.
    pub fn find_duplicate(
        &self,
        source: &str,
        date: NaiveDate,
        title: &str,
    ) -> rusqlite::Result<Option<(i64, Option<i64>)>> {
        self.conn
            .query_row(
                "SELECT id, original_event_id FROM events
                 WHERE source = ?1 AND date = ?2 AND title = ?3
                 ORDER BY id LIMIT 1",
                params![source, date, title],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    pub fn insert_event(&self, event: &NewEvent, now: DateTime<Utc>) -> rusqlite::Result<i64> {
        let styles = to_json(&event.dance_styles)?;
        let workshops = if event.workshops.is_empty() {
            None
        } else {
            Some(to_json(&event.workshops)?)
        };
        let party = event.party.as_ref().map(to_json).transpose()?;
        self.conn.execute(
            "INSERT INTO events (title, dance_styles, date, time, venue_name, address, city,
                venue_type, workshop_date, workshop_time, party_date, party_time, workshops,
                party, description, recurrence, base_recurrence, recurring_pattern, source,
                trusted, timestamp, original_event_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, 0, ?20, NULL)",
            params![
                event.title,
                styles,
                event.date,
                event.time,
                event.venue_name,
                event.address,
                event.city,
                event.venue_type.as_str(),
                event.workshop_date,
                event.workshop_time,
                event.party_date,
                event.party_time,
                workshops,
                party,
                event.description,
                event.recurrence,
                event.base_recurrence.map(BaseRecurrence::as_str),
                event.recurring_pattern,
                event.source,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Points a batch of siblings at their series primary.
    pub fn link_series(&self, primary_id: i64, sibling_ids: &[i64]) -> rusqlite::Result<usize> {
        let mut stmt = self
            .conn
            .prepare("UPDATE events SET original_event_id = ?1 WHERE id = ?2 AND id != ?1")?;
        let mut updated = 0;
        for id in sibling_ids {
            updated += stmt.execute(params![primary_id, id])?;
        }
        Ok(updated)
    }

    pub fn get_event(&self, id: i64) -> rusqlite::Result<Event> {
        self.conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![id],
            event_from_row,
        )
    }

    pub fn count_events(&self) -> rusqlite::Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
    }

    pub fn search_events(&self, city: &str, date: Option<NaiveDate>) -> rusqlite::Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE LOWER(city) = LOWER(?1) AND (?2 IS NULL OR date = ?2)
             ORDER BY date ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![city.trim(), date], event_from_row)?;
        rows.collect()
    }

    /// The primary of `event_id`'s series together with all its siblings, ordered by date.
    pub fn series(&self, event_id: i64) -> rusqlite::Result<Vec<Event>> {
        let event = self.get_event(event_id)?;
        let root = event.original_event_id.unwrap_or(event.id);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE id = ?1 OR original_event_id = ?1
             ORDER BY date ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![root], event_from_row)?;
        rows.collect()
    }

    pub fn votes_for<B: Ballot>(&self, event_id: i64) -> rusqlite::Result<Vec<VoteRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, event_id, type, date, user_id FROM {} WHERE event_id = ?1 ORDER BY id",
            B::TABLE
        ))?;
        let rows = stmt.query_map(params![event_id], |row| {
            Ok(VoteRow {
                id: row.get(0)?,
                event_id: row.get(1)?,
                kind: row.get(2)?,
                date: row.get(3)?,
                user_id: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    /// Applies one vote action and recomputes the tallies inside a single transaction.
    pub fn cast_ballot<B: Ballot>(
        &mut self,
        event_id: i64,
        ballot: B,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<(Transition, Tally)> {
        let table = B::TABLE;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                &format!("SELECT id, type FROM {table} WHERE event_id = ?1 AND user_id = ?2"),
                params![event_id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // The CHECK constraint keeps stored types inside the ballot vocabulary.
        let current = existing.and_then(|(id, kind)| B::from_db(&kind).map(|kind| (id, kind)));
        let transition = votes::transition(current.map(|(_, kind)| kind), ballot);

        match current {
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (event_id, type, date, user_id) VALUES (?1, ?2, ?3, ?4)"
                    ),
                    params![event_id, ballot.as_str(), now, user_id],
                )?;
            }
            Some((id, _)) if transition == Transition::Withdrawn => {
                tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
            }
            Some((id, _)) => {
                tx.execute(
                    &format!("UPDATE {table} SET type = ?1, date = ?2 WHERE id = ?3"),
                    params![ballot.as_str(), now, id],
                )?;
            }
        }

        let (week_start, week_end) = votes::week_bounds(now);
        let mut tally = Tally::default();
        {
            let mut totals = tx.prepare(&format!(
                "SELECT type, COUNT(*) FROM {table} WHERE event_id = ?1 GROUP BY type"
            ))?;
            let rows = totals.query_map(params![event_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (kind, count) = row?;
                if let Some(choice) = B::from_db(&kind) {
                    tally.total[choice.index()] = count;
                }
            }

            let mut week = tx.prepare(&format!(
                "SELECT type, COUNT(*) FROM {table}
                 WHERE event_id = ?1 AND date >= ?2 AND date < ?3 GROUP BY type"
            ))?;
            let rows = week.query_map(params![event_id, week_start, week_end], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (kind, count) = row?;
                if let Some(choice) = B::from_db(&kind) {
                    tally.week[choice.index()] = count;
                }
            }
        }

        tx.commit()?;
        Ok((transition, tally))
    }

    #[cfg(test)]
    pub(crate) fn set_event_timestamp(&self, id: i64, at: DateTime<Utc>) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE events SET timestamp = ?1 WHERE id = ?2",
            params![at, id],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(sql)
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn from_json<T: serde::de::DeserializeOwned>(payload: &str, column: usize) -> rusqlite::Result<T> {
    serde_json::from_str(payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let styles: String = row.get(2)?;
    let venue_type: String = row.get(8)?;
    let workshops: Option<String> = row.get(13)?;
    let party: Option<String> = row.get(14)?;
    let base: Option<String> = row.get(17)?;
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        dance_styles: from_json(&styles, 2)?,
        date: row.get(3)?,
        time: row.get(4)?,
        venue_name: row.get(5)?,
        address: row.get(6)?,
        city: row.get(7)?,
        venue_type: VenueType::parse(&venue_type).unwrap_or_default(),
        workshop_date: row.get(9)?,
        workshop_time: row.get(10)?,
        party_date: row.get(11)?,
        party_time: row.get(12)?,
        workshops: match workshops {
            Some(payload) => from_json::<Vec<Workshop>>(&payload, 13)?,
            None => Vec::new(),
        },
        party: party
            .map(|payload| from_json::<Party>(&payload, 14))
            .transpose()?,
        description: row.get(15)?,
        recurrence: row.get(16)?,
        base_recurrence: base.as_deref().and_then(BaseRecurrence::parse),
        source: row.get(18)?,
        trusted: row.get(19)?,
        collected_at: row.get(20)?,
        original_event_id: row.get(21)?,
    })
}
