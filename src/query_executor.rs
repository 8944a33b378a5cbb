use chrono::NaiveDate;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ReportConfig;
use crate::error::ExecutorError;

/// A bound statement parameter. Dates bind as ISO `YYYY-MM-DD` text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SqlParam {
    Text(String),
    Date(NaiveDate),
}

impl SqlParam {
    fn to_sqlite(&self) -> SqliteValue {
        match self {
            SqlParam::Text(text) => SqliteValue::Text(text.clone()),
            SqlParam::Date(date) => SqliteValue::Text(date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<NaiveDate> for SqlParam {
    fn from(value: NaiveDate) -> Self {
        SqlParam::Date(value)
    }
}

/// Name -> value bindings for `:name` placeholders. Ordered so it can be
/// part of a cache key.
pub type QueryParams = BTreeMap<String, SqlParam>;

/// One result cell, independent of the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            SqlValue::Real(value) => Some(value.round() as i64),
            SqlValue::Text(text) => text.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    /// Accepts `YYYY-MM-DD` as well as a `YYYY-MM-DD HH:MM:SS` prefix.
    pub fn as_date(&self) -> Option<NaiveDate> {
        let text = self.as_text()?.trim();
        let day_part = text.get(..10).unwrap_or(text);
        NaiveDate::parse_from_str(day_part, "%Y-%m-%d").ok()
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(_) => SqlValue::Null,
        }
    }
}

pub type QueryRow = Vec<SqlValue>;

/// Executes a parametrized statement against the fact store.
pub trait QueryExecutor {
    fn query(&self, sql: &str, params: &QueryParams) -> Result<Vec<QueryRow>, ExecutorError>;
}

impl<T: QueryExecutor + ?Sized> QueryExecutor for &T {
    fn query(&self, sql: &str, params: &QueryParams) -> Result<Vec<QueryRow>, ExecutorError> {
        (**self).query(sql, params)
    }
}

/// Read-only SQLite-backed executor. Opens a connection per statement.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteExecutor {
    pub fn new(db_path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        SqliteExecutor {
            db_path: db_path.into(),
            busy_timeout,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(config.db_path.clone(), config.busy_timeout())
    }

    fn open(&self) -> Result<Connection, ExecutorError> {
        if !self.db_path.is_file() {
            return Err(ExecutorError::Unavailable(format!(
                "store not found: {}",
                self.db_path.to_string_lossy()
            )));
        }
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

impl QueryExecutor for SqliteExecutor {
    fn query(&self, sql: &str, params: &QueryParams) -> Result<Vec<QueryRow>, ExecutorError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;

        let bound = params
            .iter()
            .map(|(name, value)| (format!(":{name}"), value.to_sqlite()))
            .collect::<Vec<_>>();
        let named = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect::<Vec<_>>();

        debug!(sql = sql.trim(), params = ?params, "executing statement");

        let column_count = stmt.column_count();
        let mut rows = stmt.query(named.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                cells.push(SqlValue::from(row.get_ref(idx)?));
            }
            out.push(cells);
        }
        Ok(out)
    }
}

struct CacheEntry {
    stored_at: Instant,
    rows: Vec<QueryRow>,
}

type CacheKey = (String, QueryParams);

/// Memoizes successful results by `(sql, params)` for a fixed time-to-live.
/// Entries only expire by age and are swept on every insert; failures are
/// never stored.
pub struct CachedExecutor<E> {
    inner: E,
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl<E: QueryExecutor> CachedExecutor<E> {
    pub fn new(inner: E, ttl: Duration) -> Self {
        CachedExecutor {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cached_entries(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn query_with_ttl(
        &self,
        sql: &str,
        params: &QueryParams,
        ttl: Duration,
    ) -> Result<Vec<QueryRow>, ExecutorError> {
        let key = (sql.to_string(), params.clone());
        {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match entries.get(&key) {
                Some(entry) if entry.stored_at.elapsed() < ttl => {
                    debug!(rows = entry.rows.len(), "cache hit");
                    return Ok(entry.rows.clone());
                }
                Some(_) => {
                    debug!("cache entry expired");
                    entries.remove(&key);
                }
                None => {}
            }
        }

        let rows = self.inner.query(sql, params)?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let keep_for = self.ttl.max(ttl);
        entries.retain(|_, entry| entry.stored_at.elapsed() < keep_for);
        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                rows: rows.clone(),
            },
        );
        Ok(rows)
    }
}

impl<E: QueryExecutor> QueryExecutor for CachedExecutor<E> {
    fn query(&self, sql: &str, params: &QueryParams) -> Result<Vec<QueryRow>, ExecutorError> {
        self.query_with_ttl(sql, params, self.ttl)
    }
}
