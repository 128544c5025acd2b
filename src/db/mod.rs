pub mod albums;
pub mod backup;
pub mod catalog;
pub mod events;
pub mod fields;
pub mod items;
pub mod migrate;
pub mod query;
pub mod schema;

#[cfg(test)]
pub(crate) mod fixtures;

use rusqlite::config::DbConfig;
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

pub use albums::{Album, Item, MetaField, Picture};
pub use events::StoreEvent;
pub use fields::{FieldType, OptionValue, StarRating, Value};
pub use migrate::{Migration, MigrationStep};
pub use query::{ItemCursor, Query, QueryComponent, QueryOperator};

use crate::error::StoreError;
use events::EventBus;
use schema::SCHEMA;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Number of items a cursor loads per round trip unless configured.
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Handle to one album store file.
///
/// Reads borrow the store immutably, every mutation takes `&mut self`, so a
/// cursor can never observe a half-applied change.
pub struct Database {
    pub(crate) conn: Connection,
    events: EventBus,
    path: Option<PathBuf>,
    page_size: usize,
}

impl Database {
    /// Open (or create) the store at `path`.
    ///
    /// A file that is not a store, or fails the integrity check, is
    /// reported as [`StoreError::CorruptStore`].
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self::from_connection(conn, Some(path.to_path_buf()))?;
        tracing::info!(path = %path.display(), "Opened album store");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        check_integrity(&conn)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // a double-quoted identifier that names no column must be an error,
        // never a string literal
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        let db = Self {
            conn,
            events: EventBus::default(),
            path,
            page_size: DEFAULT_PAGE_SIZE,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Location of the store file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Receive every change made through this handle from now on.
    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&mut self, event: StoreEvent) {
        tracing::debug!(?event, "Store event");
        self.events.publish(event);
    }

    /// Whether a table exists, compared case-insensitively.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        table_exists(&self.conn, name)
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", schema::quote_ident(table));
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

/// Run SQLite's quick check, mapping any finding to `CorruptStore`.
pub(crate) fn check_integrity(conn: &Connection) -> Result<()> {
    let verdict: rusqlite::Result<String> =
        conn.query_row("PRAGMA quick_check", [], |row| row.get(0));
    match verdict {
        Ok(v) if v == "ok" => Ok(()),
        Ok(v) => Err(StoreError::CorruptStore(v)),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            Err(StoreError::CorruptStore(msg.unwrap_or_else(|| e.to_string())))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_creates_catalog() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.table_exists("album_master").unwrap());
        assert!(db.table_exists("ALBUM_MASTER").unwrap());
        assert!(!db.table_exists("books").unwrap());
        assert!(db.path().is_none());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("albums.db");

        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_open_rejects_non_store_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();

        let result = Database::open(&path);

        assert!(matches!(result, Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_unknown_quoted_column_is_an_error() {
        let db = Database::open_in_memory().unwrap();

        let result = db.conn.query_row(
            "SELECT COUNT(*) FROM album_master WHERE \"no_such_column\" = 'x'",
            [],
            |row| row.get::<_, i64>(0),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_page_size_is_at_least_one() {
        let db = Database::open_in_memory().unwrap().with_page_size(0);
        assert_eq!(db.page_size(), 1);
    }
}
