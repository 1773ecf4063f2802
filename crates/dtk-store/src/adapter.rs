use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::Result;

/// One cell of a result row.
///
/// User queries run against arbitrary schemas, so cells are carried in a
/// small dynamic type and interpreted at the mapping boundary
/// (`query_columns`). Timestamps may arrive as epoch seconds, epoch
/// milliseconds or text.
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

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the cell as a naive UTC instant.
    ///
    /// Integers are epoch seconds, unless large enough to only make sense
    /// as epoch milliseconds. Text accepts the canonical
    /// `YYYY-MM-DD HH:MM:SS` form (with optional fractional seconds),
    /// a bare date, or RFC 3339 (converted to UTC, offset dropped).
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Integer(i) => from_epoch(*i),
            SqlValue::Real(f) => from_epoch(*f as i64),
            SqlValue::Text(s) => parse_timestamp_text(s),
            SqlValue::Null => None,
        }
    }

    pub fn from_timestamp(ts: NaiveDateTime) -> SqlValue {
        SqlValue::Integer(ts.and_utc().timestamp_millis())
    }

    pub fn from_opt_timestamp(ts: Option<NaiveDateTime>) -> SqlValue {
        ts.map(SqlValue::from_timestamp).unwrap_or(SqlValue::Null)
    }

    pub fn from_opt_f64(v: Option<f64>) -> SqlValue {
        v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
    }
}

// Values past this magnitude cannot be epoch seconds for any date the
// engine handles (~year 10000), so treat them as milliseconds.
const EPOCH_MILLIS_CUTOVER: i64 = 253_402_300_800;

fn from_epoch(v: i64) -> Option<NaiveDateTime> {
    let dt = if v.abs() >= EPOCH_MILLIS_CUTOVER {
        chrono::DateTime::from_timestamp_millis(v)
    } else {
        chrono::DateTime::from_timestamp(v, 0)
    };
    dt.map(|d| d.naive_utc())
}

fn parse_timestamp_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_utc())
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        SqlValue::Real(f)
    }
}

/// A result row keyed by column name.
pub type Row = HashMap<String, SqlValue>;

/// Narrow adapter the engine uses for every database interaction.
///
/// Implementations must be safe to share across threads; the engine never
/// holds connections open across suspension points of its own.
pub trait Database: Send + Sync {
    /// Run a query and return all rows, keyed by column name.
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a DDL statement (CREATE TABLE and friends).
    fn execute_ddl(&self, statement: &str) -> Result<()>;

    /// Insert rows into `table`. `columns` names the cells of each row.
    fn insert(&self, table: &str, columns: &[&str], rows: &[Vec<SqlValue>]) -> Result<usize>;

    /// Delete rows matching `where_clause` (bound with `params`).
    fn delete(&self, table: &str, where_clause: &str, params: &[SqlValue]) -> Result<usize>;

    /// Write-or-replace keyed by `unique_keys` (a prefix of `columns`).
    ///
    /// On engines without a deduplicating merge this degenerates to
    /// delete-then-insert per key; SQLite's keyed replace covers both.
    fn upsert(
        &self,
        table: &str,
        unique_keys: &[&str],
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize>;

    /// Whether `table` already exists.
    fn table_exists(&self, table: &str) -> Result<bool>;
}
