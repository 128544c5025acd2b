//! Whole-store snapshots.

use chrono::{DateTime, Local};
use rusqlite::backup::{Backup, Progress, StepResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use super::events::StoreEvent;
use super::{check_integrity, Database, Result};

/// Default number of pages copied per backup step.
pub const DEFAULT_PAGES_PER_STEP: i32 = 128;

/// File name for a snapshot taken at `now`.
pub fn snapshot_file_name(now: DateTime<Local>) -> String {
    format!("collector-{}.db", now.format("%Y%m%d-%H%M%S"))
}

fn run_to_completion(
    backup: &Backup<'_, '_>,
    pages_per_step: i32,
    on_progress: &mut dyn FnMut(Progress),
) -> Result<()> {
    loop {
        match backup.step(pages_per_step.max(1))? {
            StepResult::Done => {
                on_progress(backup.progress());
                return Ok(());
            }
            StepResult::More => on_progress(backup.progress()),
            _ => std::thread::sleep(Duration::from_millis(50)),
        }
    }
}

impl Database {
    /// Copy the whole store to `path`, replacing any file there.
    pub fn backup_to(
        &self,
        path: &Path,
        pages_per_step: i32,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut target = Connection::open(path)?;
        {
            let backup = Backup::new(&self.conn, &mut target)?;
            run_to_completion(&backup, pages_per_step, &mut on_progress)?;
        }
        tracing::info!(path = %path.display(), "Backed up album store");
        Ok(())
    }

    /// Replace the whole store with the snapshot at `path`.
    ///
    /// The snapshot is checked before anything is overwritten; a corrupt
    /// snapshot leaves the live store untouched.
    pub fn restore_from(
        &mut self,
        path: &Path,
        pages_per_step: i32,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<()> {
        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("snapshot {} does not exist", path.display()),
            )
            .into());
        }

        let source = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        if let Err(e) = check_integrity(&source) {
            tracing::error!(path = %path.display(), error = %e, "Refusing corrupt snapshot");
            return Err(e);
        }

        {
            let backup = Backup::new(&source, &mut self.conn)?;
            run_to_completion(&backup, pages_per_step, &mut on_progress)?;
        }
        if let Err(e) = check_integrity(&self.conn) {
            tracing::error!(error = %e, "Store failed integrity check after restore");
            return Err(e);
        }
        self.initialize()?;

        tracing::info!(path = %path.display(), "Restored album store");
        self.publish(StoreEvent::StoreRestored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use crate::db::{FieldType, Item, MetaField};
    use crate::error::StoreError;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_backup_then_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("snapshots").join("albums.db");
        let mut db = fixtures::populated();
        let books = db.get_item_count("Books").unwrap();

        let mut steps = 0;
        db.backup_to(&snapshot, 1, |_| steps += 1).unwrap();
        assert!(steps > 0);

        db.delete_album("Books").unwrap();
        db.create_album("Games", vec![MetaField::new("Title", FieldType::Text)], false)
            .unwrap();
        let rx = db.subscribe();

        db.restore_from(&snapshot, DEFAULT_PAGES_PER_STEP, |_| {}).unwrap();

        assert_eq!(db.get_item_count("Books").unwrap(), books);
        assert!(!db.album_exists("Games").unwrap());
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::StoreRestored);
    }

    #[test]
    fn test_restore_reports_progress() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("albums.db");
        let db = fixtures::populated();
        db.backup_to(&snapshot, DEFAULT_PAGES_PER_STEP, |_| {}).unwrap();

        let mut target = Database::open_in_memory().unwrap();
        let mut last = None;
        target
            .restore_from(&snapshot, 1, |p| last = Some((p.remaining, p.pagecount)))
            .unwrap();

        let (remaining, pagecount) = last.unwrap();
        assert_eq!(remaining, 0);
        assert!(pagecount > 0);
        assert_eq!(target.list_albums().unwrap().len(), 3);
    }

    #[test]
    fn test_restore_from_corrupt_snapshot_keeps_store() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("broken.db");
        std::fs::write(&snapshot, vec![0x17u8; 4096]).unwrap();
        let mut db = fixtures::populated();

        let result = db.restore_from(&snapshot, DEFAULT_PAGES_PER_STEP, |_| {});

        assert!(matches!(result, Err(StoreError::CorruptStore(_))));
        assert_eq!(db.list_albums().unwrap().len(), 3);
        db.add_item(&Item::new("DVDs").with_value("Title", "Still works"), false)
            .unwrap();
    }

    #[test]
    fn test_restore_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut db = fixtures::populated();

        let result = db.restore_from(&dir.path().join("nope.db"), DEFAULT_PAGES_PER_STEP, |_| {});

        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[test]
    fn test_snapshot_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(snapshot_file_name(at), "collector-20240309-140500.db");
    }
}
