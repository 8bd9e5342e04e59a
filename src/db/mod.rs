pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::{Action, DecisionRecord, RiskLevel};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt decision row {decision_id}: {reason}")]
    Corrupt { decision_id: String, reason: String },
}

/// Inclusive time range over `decided_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Where finished decisions go. Append-only: records are never updated
/// or deleted, corrections arrive as new records.
pub trait DecisionStore: Send + Sync {
    fn append(&self, record: &DecisionRecord) -> Result<(), StoreError>;

    fn query_by_address(
        &self,
        address: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<DecisionRecord>, StoreError>;

    fn query_by_risk_level(&self, level: RiskLevel) -> Result<Vec<DecisionRecord>, StoreError>;

    fn query_by_action(&self, action: Action) -> Result<Vec<DecisionRecord>, StoreError>;

    fn query_by_time_range(&self, range: TimeRange) -> Result<Vec<DecisionRecord>, StoreError>;
}

/// Fixed-width UTC timestamp, so text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        Ok(Self::wrap(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Ok(Self::wrap(Database::open_in_memory()?))
    }

    fn wrap(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, decision_id: &str) -> Result<Option<DecisionRecord>, StoreError> {
        let mut found = self.lock().select("WHERE decision_id = ?1", params![decision_id])?;
        Ok(found.pop())
    }

    /// Records that correct `decision_id`.
    pub fn superseded_by(&self, decision_id: &str) -> Result<Vec<DecisionRecord>, StoreError> {
        self.lock().select("WHERE supersedes = ?1", params![decision_id])
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.lock().count()
    }
}

impl DecisionStore for SharedDatabase {
    fn append(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        self.lock().append(record)
    }

    fn query_by_address(
        &self,
        address: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let db = self.lock();
        match range {
            Some(range) => db.select(
                "WHERE address = ?1 AND decided_at >= ?2 AND decided_at <= ?3",
                params![address, timestamp(range.from), timestamp(range.to)],
            ),
            None => db.select("WHERE address = ?1", params![address]),
        }
    }

    fn query_by_risk_level(&self, level: RiskLevel) -> Result<Vec<DecisionRecord>, StoreError> {
        self.lock().select("WHERE risk_level = ?1", params![level.as_str()])
    }

    fn query_by_action(&self, action: Action) -> Result<Vec<DecisionRecord>, StoreError> {
        self.lock().select("WHERE action = ?1", params![action.as_str()])
    }

    fn query_by_time_range(&self, range: TimeRange) -> Result<Vec<DecisionRecord>, StoreError> {
        self.lock().select(
            "WHERE decided_at >= ?1 AND decided_at <= ?2",
            params![timestamp(range.from), timestamp(range.to)],
        )
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Plain INSERT: a duplicate `decision_id` is an error, never an update.
    pub fn append(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO decisions (decision_id, alert_id, address, risk_level, action,
                                    confidence, risk_score, rule_version, decided_at,
                                    supersedes, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.decision_id,
                record.alert_id,
                record.address,
                record.risk_level.as_str(),
                record.action.as_str(),
                record.confidence,
                record.risk_score,
                record.rule_version as i64,
                timestamp(record.decided_at),
                record.supersedes,
                json,
            ],
        )?;
        Ok(())
    }

    fn select(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<DecisionRecord>, StoreError> {
        let sql = format!(
            "SELECT decision_id, record FROM decisions {filter} ORDER BY decided_at, rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (decision_id, json) = row?;
            records.push(Self::row_to_record(decision_id, &json)?);
        }
        Ok(records)
    }

    fn row_to_record(decision_id: String, json: &str) -> Result<DecisionRecord, StoreError> {
        let record: DecisionRecord = serde_json::from_str(json)?;
        if record.decision_id != decision_id {
            return Err(StoreError::Corrupt {
                reason: format!("payload carries decision_id {}", record.decision_id),
                decision_id,
            });
        }
        Ok(record)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get::<_, i64>(0))?;
        Ok(count as usize)
    }
}
