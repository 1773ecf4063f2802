use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::adapter::{Database, Row, SqlValue};
use crate::Result;

/// Embedded SQLite adapter.
///
/// SQLite has no deduplicating table engine, so `upsert` uses
/// `INSERT OR REPLACE` keyed on the table's primary key. The connection is
/// serialized behind a mutex; the engine is batch-oriented and never needs
/// concurrent statements on one profile.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a previous statement panicked; the
        // connection itself is still usable for the next batch.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_sql(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

fn bind_params(params: &[SqlValue]) -> Vec<rusqlite::types::Value> {
    params.iter().map(to_sql).collect()
}

impl Database for SqliteDatabase {
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(query)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let bound = bind_params(params);
        let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::with_capacity(column_names.len());
            for (idx, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), from_sql(row.get_ref(idx)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn execute_ddl(&self, statement: &str) -> Result<()> {
        self.lock().execute_batch(statement)?;
        Ok(())
    }

    fn insert(&self, table: &str, columns: &[&str], rows: &[Vec<SqlValue>]) -> Result<usize> {
        self.write_rows("INSERT", table, columns, rows)
    }

    fn delete(&self, table: &str, where_clause: &str, params: &[SqlValue]) -> Result<usize> {
        let conn = self.lock();
        let sql = format!("DELETE FROM {table} WHERE {where_clause}");
        let bound = bind_params(params);
        let affected = conn.execute(&sql, rusqlite::params_from_iter(bound))?;
        Ok(affected)
    }

    fn upsert(
        &self,
        table: &str,
        _unique_keys: &[&str],
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize> {
        // Keyed replace: the unique key is the table's primary key.
        self.write_rows("INSERT OR REPLACE", table, columns, rows)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            rusqlite::params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl SqliteDatabase {
    fn write_rows(
        &self,
        verb: &str,
        table: &str,
        columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "{verb} INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                let bound = bind_params(row);
                written += stmt.execute(rusqlite::params_from_iter(bound))?;
            }
        }
        tx.commit()?;
        Ok(written)
    }
}
