//! SQLite storage for subjects, cards and the review log
//!
//! ```text
//! <data_dir>/snapdeck.db
//! ├── subjects      (id, name, is_default, created_at)
//! ├── cards         (scheduling state, timestamps as epoch ms)
//! └── review_log    (one row per grade)
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subject not found: {0}")]
    SubjectNotFound(Uuid),

    #[error("Subject already exists: {0}")]
    DuplicateSubject(String),

    #[error("The default subject cannot be renamed or deleted")]
    CannotModifyDefault,

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Read/write contract the capture session and scheduling engine rely on.
///
/// Every call is atomic; callers never observe a partial update.
pub trait CardStore: Send + Sync {
    // ==================== Subjects ====================

    fn list_subjects(&self) -> Result<Vec<Subject>>;

    fn get_subject(&self, id: Uuid) -> Result<Option<Subject>>;

    fn create_subject(&self, name: &str) -> Result<Subject>;

    fn rename_subject(&self, id: Uuid, name: &str) -> Result<Subject>;

    /// Delete a subject and its cards, returning the image paths that
    /// were referenced by the removed cards
    fn delete_subject(&self, id: Uuid) -> Result<Vec<PathBuf>>;

    /// Map a requested subject onto one that exists, falling back to the
    /// default subject
    fn resolve_subject(&self, id: Option<Uuid>) -> Result<Uuid> {
        match id {
            Some(id) if self.get_subject(id)?.is_some() => Ok(id),
            Some(id) => {
                log::debug!("Unknown subject {}, using default subject", id);
                Ok(DEFAULT_SUBJECT_ID)
            }
            None => Ok(DEFAULT_SUBJECT_ID),
        }
    }

    // ==================== Cards ====================

    fn insert_card(&self, card: &Card) -> Result<()>;

    fn get_card(&self, id: Uuid) -> Result<Option<Card>>;

    /// Write back a card's scheduling state. Returns `false` if the card
    /// no longer exists.
    fn update_card(&self, card: &Card) -> Result<bool>;

    /// Returns `false` if the card did not exist
    fn delete_card(&self, id: Uuid) -> Result<bool>;

    fn list_cards(&self, subject_id: Uuid) -> Result<Vec<Card>>;

    fn count_due(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<usize>;

    /// The due card with the smallest `due_at`, ties broken by `created_at`
    fn next_due(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<Option<Card>>;

    // ==================== Reviews ====================

    fn record_review(&self, record: &ReviewRecord) -> Result<()>;

    fn stats(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<ReviewStats>;
}

fn ts_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn millis_to_ts(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {}", ms)))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::InvalidData(format!("bad id {}: {}", value, e)))
}

/// Raw columns of a `cards` row, converted outside the rusqlite closure so
/// conversion failures surface as `StoreError::InvalidData`
struct CardRow {
    id: String,
    subject_id: String,
    image_path: String,
    created_at: i64,
    state: String,
    due_at: i64,
    interval_days: f64,
    ease: f64,
    reps: u32,
    lapses: u32,
    last_reviewed_at: Option<i64>,
}

const CARD_COLUMNS: &str = "id, subject_id, image_path, created_at, state, due_at, \
                            interval_days, ease, reps, lapses, last_reviewed_at";

impl CardRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            image_path: row.get(2)?,
            created_at: row.get(3)?,
            state: row.get(4)?,
            due_at: row.get(5)?,
            interval_days: row.get(6)?,
            ease: row.get(7)?,
            reps: row.get(8)?,
            lapses: row.get(9)?,
            last_reviewed_at: row.get(10)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let state = CardState::parse(&self.state)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown card state: {}", self.state)))?;
        Ok(Card {
            id: parse_uuid(&self.id)?,
            subject_id: parse_uuid(&self.subject_id)?,
            image_path: PathBuf::from(self.image_path),
            created_at: millis_to_ts(self.created_at)?,
            state,
            due_at: millis_to_ts(self.due_at)?,
            interval_days: self.interval_days,
            ease: self.ease,
            reps: self.reps,
            lapses: self.lapses,
            last_reviewed_at: self.last_reviewed_at.map(millis_to_ts).transpose()?,
        })
    }
}

fn subject_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, bool, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_subject((id, name, is_default, created_at): (String, String, bool, i64)) -> Result<Subject> {
    Ok(Subject {
        id: parse_uuid(&id)?,
        name,
        is_default,
        created_at: millis_to_ts(created_at)?,
    })
}

/// SQLite-backed card store.
///
/// The connection is guarded by a mutex so the store can be shared between
/// the capture session and the scheduling engine.
pub struct SqliteCardStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteCardStore {
    /// Open (or create) the store at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        store.init()?;
        log::info!("Opened card store at {:?}", db_path);
        Ok(store)
    }

    /// A throwaway store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.init()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
                image_path TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                state TEXT NOT NULL,
                due_at INTEGER NOT NULL,
                interval_days REAL NOT NULL DEFAULT 0,
                ease REAL NOT NULL,
                reps INTEGER NOT NULL DEFAULT 0,
                lapses INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS review_log (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                rating TEXT NOT NULL,
                interval_days REAL NOT NULL,
                ease REAL NOT NULL,
                reviewed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cards_subject_due ON cards(subject_id, due_at, created_at);
            CREATE INDEX IF NOT EXISTS idx_review_log_card ON review_log(card_id);
            "#,
        )?;

        let default = Subject::default_subject();
        conn.execute(
            "INSERT OR IGNORE INTO subjects (id, name, is_default, created_at) VALUES (?1, ?2, 1, ?3)",
            params![default.id.to_string(), default.name, ts_to_millis(default.created_at)],
        )?;

        Ok(())
    }

    fn require_mutable_subject(conn: &Connection, id: Uuid) -> Result<()> {
        let is_default: Option<bool> = conn
            .query_row(
                "SELECT is_default FROM subjects WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match is_default {
            None => Err(StoreError::SubjectNotFound(id)),
            Some(true) => Err(StoreError::CannotModifyDefault),
            Some(false) => Ok(()),
        }
    }

    fn name_taken(conn: &Connection, name: &str, except: Option<Uuid>) -> Result<bool> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM subjects WHERE name = ?1 COLLATE NOCASE",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match (existing, except) {
            (Some(found), Some(except)) => found != except.to_string(),
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidData("subject name is empty".to_string()));
    }
    Ok(trimmed.to_string())
}

impl CardStore for SqliteCardStore {
    fn list_subjects(&self) -> Result<Vec<Subject>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, is_default, created_at FROM subjects ORDER BY is_default DESC, name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map([], subject_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_subject).collect()
    }

    fn get_subject(&self, id: Uuid) -> Result<Option<Subject>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, is_default, created_at FROM subjects WHERE id = ?1",
            params![id.to_string()],
            subject_from_row,
        )
        .optional()?
        .map(into_subject)
        .transpose()
    }

    fn create_subject(&self, name: &str) -> Result<Subject> {
        let name = normalize_name(name)?;
        let conn = self.conn()?;
        if Self::name_taken(&conn, &name, None)? {
            return Err(StoreError::DuplicateSubject(name));
        }

        let subject = Subject::new(name);
        conn.execute(
            "INSERT INTO subjects (id, name, is_default, created_at) VALUES (?1, ?2, 0, ?3)",
            params![subject.id.to_string(), subject.name, ts_to_millis(subject.created_at)],
        )?;
        log::info!("Created subject '{}' ({})", subject.name, subject.id);
        Ok(subject)
    }

    fn rename_subject(&self, id: Uuid, name: &str) -> Result<Subject> {
        let name = normalize_name(name)?;
        {
            let conn = self.conn()?;
            Self::require_mutable_subject(&conn, id)?;
            if Self::name_taken(&conn, &name, Some(id))? {
                return Err(StoreError::DuplicateSubject(name));
            }
            conn.execute(
                "UPDATE subjects SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )?;
        }
        self.get_subject(id)?.ok_or(StoreError::SubjectNotFound(id))
    }

    fn delete_subject(&self, id: Uuid) -> Result<Vec<PathBuf>> {
        let mut conn = self.conn()?;
        Self::require_mutable_subject(&conn, id)?;

        let tx = conn.transaction()?;
        let paths = {
            let mut stmt = tx.prepare("SELECT image_path FROM cards WHERE subject_id = ?1")?;
            let paths = stmt
                .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            paths.into_iter().map(PathBuf::from).collect::<Vec<_>>()
        };
        tx.execute(
            "DELETE FROM review_log WHERE card_id IN (SELECT id FROM cards WHERE subject_id = ?1)",
            params![id.to_string()],
        )?;
        tx.execute("DELETE FROM cards WHERE subject_id = ?1", params![id.to_string()])?;
        tx.execute("DELETE FROM subjects WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        log::info!("Deleted subject {} with {} cards", id, paths.len());
        Ok(paths)
    }

    fn insert_card(&self, card: &Card) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO cards ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)", CARD_COLUMNS),
            params![
                card.id.to_string(),
                card.subject_id.to_string(),
                card.image_path.to_string_lossy().into_owned(),
                ts_to_millis(card.created_at),
                card.state.as_str(),
                ts_to_millis(card.due_at),
                card.interval_days,
                card.ease,
                card.reps,
                card.lapses,
                card.last_reviewed_at.map(ts_to_millis),
            ],
        )?;
        Ok(())
    }

    fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLUMNS),
            params![id.to_string()],
            CardRow::from_row,
        )
        .optional()?
        .map(CardRow::into_card)
        .transpose()
    }

    fn update_card(&self, card: &Card) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE cards SET state = ?1, due_at = ?2, interval_days = ?3, ease = ?4, \
             reps = ?5, lapses = ?6, last_reviewed_at = ?7 WHERE id = ?8",
            params![
                card.state.as_str(),
                ts_to_millis(card.due_at),
                card.interval_days,
                card.ease,
                card.reps,
                card.lapses,
                card.last_reviewed_at.map(ts_to_millis),
                card.id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    fn delete_card(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM review_log WHERE card_id = ?1", params![id.to_string()])?;
        let changed = conn.execute("DELETE FROM cards WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    fn list_cards(&self, subject_id: Uuid) -> Result<Vec<Card>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cards WHERE subject_id = ?1 ORDER BY created_at, id",
            CARD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![subject_id.to_string()], CardRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(CardRow::into_card).collect()
    }

    fn count_due(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cards WHERE subject_id = ?1 AND due_at <= ?2",
            params![subject_id.to_string(), ts_to_millis(now)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn next_due(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<Option<Card>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM cards WHERE subject_id = ?1 AND due_at <= ?2 \
                 ORDER BY due_at ASC, created_at ASC LIMIT 1",
                CARD_COLUMNS
            ),
            params![subject_id.to_string(), ts_to_millis(now)],
            CardRow::from_row,
        )
        .optional()?
        .map(CardRow::into_card)
        .transpose()
    }

    fn record_review(&self, record: &ReviewRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO review_log (id, card_id, rating, interval_days, ease, reviewed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.card_id.to_string(),
                record.rating.as_str(),
                record.interval_days,
                record.ease,
                ts_to_millis(record.reviewed_at),
            ],
        )?;
        Ok(())
    }

    fn stats(&self, subject_id: Uuid, now: DateTime<Utc>) -> Result<ReviewStats> {
        let mut stats = ReviewStats::default();
        let cards = self.list_cards(subject_id)?;
        stats.total_cards = cards.len();

        for card in &cards {
            match card.state {
                CardState::New => stats.new_cards += 1,
                CardState::Learning => stats.learning_cards += 1,
                CardState::Review => stats.review_cards += 1,
            }
            if card.is_due(now) {
                stats.due_cards += 1;
            }
        }

        let since = ts_to_millis(now - Duration::days(1));
        let conn = self.conn()?;
        let (reviews, lapses): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(r.rating = 'again'), 0) FROM review_log r \
             JOIN cards c ON c.id = r.card_id \
             WHERE c.subject_id = ?1 AND r.reviewed_at > ?2 AND r.reviewed_at <= ?3",
            params![subject_id.to_string(), since, ts_to_millis(now)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.reviews_today = reviews as usize;
        stats.lapses_today = lapses as usize;

        Ok(stats)
    }
}
