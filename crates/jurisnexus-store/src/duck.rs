//! DuckDB-backed append log.
//!
//! Each log is a table of `(seq, key, payload)` rows with the record
//! serialised as JSON in `payload`. Logs opened from the same
//! [`DuckDb`] handle share one database file.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use duckdb::{Connection, params};
use tracing::info;

use crate::StoreError;
use crate::log::{AppendLog, Keyed};

/// A DuckDB database, in memory or file-backed.
pub struct DuckDb {
    conn: Connection,
}

impl DuckDb {
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Open or create a persistent database at `path`.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened duckdb store");
        Ok(Self { conn })
    }

    /// Open (creating if needed) the log stored in `table`.
    pub fn log<T: Keyed>(&self, table: &str) -> Result<DuckLog<T>, StoreError> {
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::Other(format!("invalid table name: {table}")));
        }
        let conn = self.conn.try_clone()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (seq BIGINT NOT NULL, key VARCHAR NOT NULL, payload VARCHAR NOT NULL)"
        ))?;
        Ok(DuckLog {
            table: table.to_string(),
            conn: Mutex::new(conn),
            _record: PhantomData,
        })
    }
}

pub struct DuckLog<T> {
    table: String,
    conn: Mutex<Connection>,
    _record: PhantomData<fn() -> T>,
}

impl<T> DuckLog<T> {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))
    }

    fn payloads(&self, sql: &str, key: Option<&str>) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match key {
            Some(key) => stmt
                .query_map([key], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

impl<T: Keyed> AppendLog<T> for DuckLog<T> {
    fn append(&self, record: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {t} SELECT COALESCE(MAX(seq), 0) + 1, ?, ? FROM {t}",
                t = self.table
            ),
            params![record.key(), payload],
        )?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<T>, StoreError> {
        let sql = format!("SELECT payload FROM {} ORDER BY seq", self.table);
        self.payloads(&sql, None)?
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }

    fn find(&self, key: &str) -> Result<Vec<T>, StoreError> {
        let sql = format!(
            "SELECT payload FROM {} WHERE key = ? ORDER BY seq",
            self.table
        );
        self.payloads(&sql, Some(key))?
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StoreError::from))
            .collect()
    }
}
