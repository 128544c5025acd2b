//! Background task manager for tracking and controlling concurrent tasks.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{BackgroundTask, TaskCompletionInfo, TaskId, TaskProgress, TaskState, TaskType, TaskUpdate};
use crate::db::Database;
use crate::export::{export_items, ExportFormat, ExportOptions};

/// A store shared between the caller and worker threads.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Manages all background tasks, providing centralized control and status.
pub struct BackgroundTaskManager {
    tasks: HashMap<TaskId, BackgroundTask>,
    /// Order in which tasks were added.
    task_order: Vec<TaskId>,
    handles: HashMap<TaskId, JoinHandle<()>>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            task_order: Vec::new(),
            handles: HashMap::new(),
        }
    }

    /// Register a new background task.
    /// Returns the TaskId and a sender for the task to send updates.
    pub fn register_task(&mut self, task_type: TaskType) -> (TaskId, mpsc::Sender<TaskUpdate>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let task = BackgroundTask::new(task_type, cancel_flag.clone(), rx);
        let id = task.id;

        self.tasks.insert(id, task);
        self.task_order.push(id);

        (id, tx, cancel_flag)
    }

    /// Copy the store to `path` on a worker thread.
    pub fn spawn_backup(&mut self, db: SharedDatabase, path: PathBuf, pages_per_step: i32) -> TaskId {
        let (id, tx, _cancel) = self.register_task(TaskType::Backup);
        tracing::info!(task = id.0, path = %path.display(), "Starting backup");

        let handle = thread::spawn(move || {
            let result = lock(&db).and_then(|db| {
                db.backup_to(&path, pages_per_step, |p| {
                    let _ = tx.send(TaskUpdate::Progress(p.into()));
                })
                .map_err(anyhow::Error::from)
            });
            let _ = tx.send(match result {
                Ok(()) => TaskUpdate::Completed {
                    message: format!("Backed up to {}", path.display()),
                },
                Err(e) => TaskUpdate::Failed { error: format!("{:#}", e) },
            });
        });
        self.handles.insert(id, handle);
        id
    }

    /// Replace the store with the snapshot at `path` on a worker thread.
    pub fn spawn_restore(&mut self, db: SharedDatabase, path: PathBuf, pages_per_step: i32) -> TaskId {
        let (id, tx, _cancel) = self.register_task(TaskType::Restore);
        tracing::info!(task = id.0, path = %path.display(), "Starting restore");

        let handle = thread::spawn(move || {
            let result = lock(&db).and_then(|mut db| {
                db.restore_from(&path, pages_per_step, |p| {
                    let _ = tx.send(TaskUpdate::Progress(p.into()));
                })
                .map_err(anyhow::Error::from)
            });
            let _ = tx.send(match result {
                Ok(()) => TaskUpdate::Completed {
                    message: format!("Restored from {}", path.display()),
                },
                Err(e) => TaskUpdate::Failed { error: format!("{:#}", e) },
            });
        });
        self.handles.insert(id, handle);
        id
    }

    /// Export every item of `album` on a worker thread.
    pub fn spawn_export(
        &mut self,
        db: SharedDatabase,
        album: String,
        path: PathBuf,
        format: ExportFormat,
        options: ExportOptions,
    ) -> TaskId {
        let (id, tx, cancel) = self.register_task(TaskType::Export);
        tracing::info!(task = id.0, album = %album, path = %path.display(), "Starting export");

        let handle = thread::spawn(move || {
            let update = match run_export(&db, &album, &path, format, &options, &tx, &cancel) {
                Ok(Some(count)) => TaskUpdate::Completed {
                    message: format!("Exported {} items of '{}' as {}", count, album, format.name()),
                },
                Ok(None) => TaskUpdate::Cancelled,
                Err(e) => TaskUpdate::Failed { error: format!("{:#}", e) },
            };
            let _ = tx.send(update);
        });
        self.handles.insert(id, handle);
        id
    }

    /// Check if a task of the given type is already running.
    pub fn is_running(&self, task_type: TaskType) -> bool {
        self.tasks.values().any(|t| t.task_type == task_type && t.is_running())
    }

    /// Cancel a specific task by ID.
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        if let Some(task) = self.tasks.get(&id) {
            if task.is_running() {
                task.cancel();
                return true;
            }
        }
        false
    }

    /// Poll all task channels for updates.
    /// Returns completion messages that should be shown to the user.
    pub fn poll_updates(&mut self) -> Vec<TaskCompletionInfo> {
        let mut completed = Vec::new();

        let task_ids: Vec<TaskId> = self.tasks.keys().copied().collect();

        for id in task_ids {
            if let Some(task) = self.tasks.get_mut(&id) {
                loop {
                    let update = match task.receiver.try_recv() {
                        Ok(update) => update,
                        Err(mpsc::TryRecvError::Empty) => break,
                        Err(mpsc::TryRecvError::Disconnected) => {
                            // worker went away without a final report
                            if task.is_running() {
                                TaskUpdate::Failed {
                                    error: "task ended without reporting a result".to_string(),
                                }
                            } else {
                                break;
                            }
                        }
                    };
                    match update {
                        TaskUpdate::Started { total } => {
                            task.progress = Some(TaskProgress::new(0, total));
                        }
                        TaskUpdate::Progress(progress) => {
                            task.progress = Some(progress);
                        }
                        TaskUpdate::Completed { message } => {
                            task.state = TaskState::Completed;
                            completed.push(TaskCompletionInfo {
                                id,
                                task_type: task.task_type,
                                message,
                                success: true,
                            });
                        }
                        TaskUpdate::Cancelled => {
                            task.state = TaskState::Cancelled;
                            completed.push(TaskCompletionInfo {
                                id,
                                task_type: task.task_type,
                                message: "Cancelled".to_string(),
                                success: false,
                            });
                        }
                        TaskUpdate::Failed { error } => {
                            tracing::warn!(task = id.0, task_type = task.task_type.display_name(), error = %error, "Task failed");
                            task.state = TaskState::Failed(error.clone());
                            completed.push(TaskCompletionInfo {
                                id,
                                task_type: task.task_type,
                                message: error,
                                success: false,
                            });
                        }
                    }
                }
            }
        }

        for info in &completed {
            self.tasks.remove(&info.id);
            self.task_order.retain(|id| *id != info.id);
            if let Some(handle) = self.handles.remove(&info.id) {
                let _ = handle.join();
            }
        }

        completed
    }

    /// Block until every spawned worker has finished, then collect results.
    pub fn wait_all(&mut self) -> Vec<TaskCompletionInfo> {
        for (id, handle) in self.handles.drain() {
            if handle.join().is_err() {
                tracing::error!(task = id.0, "Task thread panicked");
            }
        }
        self.poll_updates()
    }

    /// Get all running tasks for display.
    pub fn running_tasks(&self) -> Vec<&BackgroundTask> {
        self.task_order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.is_running())
            .collect()
    }

    /// Check if any tasks are running.
    pub fn has_running_tasks(&self) -> bool {
        self.tasks.values().any(|t| t.is_running())
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(db: &SharedDatabase) -> Result<std::sync::MutexGuard<'_, Database>> {
    db.lock().map_err(|_| anyhow!("album store lock poisoned"))
}

/// Returns `None` when cancelled before the file is written.
fn run_export(
    db: &SharedDatabase,
    album: &str,
    path: &std::path::Path,
    format: ExportFormat,
    options: &ExportOptions,
    tx: &mpsc::Sender<TaskUpdate>,
    cancel: &AtomicBool,
) -> Result<Option<usize>> {
    let guard = lock(db)?;
    let total = guard.get_item_count(album)?.max(0) as usize;
    let _ = tx.send(TaskUpdate::Started { total });

    let fields = guard.get_fields(album)?;
    let mut items = Vec::with_capacity(total);
    for item in guard.select_all(album)? {
        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        items.push(item?);
        let _ = tx.send(TaskUpdate::Progress(TaskProgress::new(items.len(), total)));
    }
    drop(guard);

    Ok(Some(export_items(&fields, &items, path, format, options)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use tempfile::TempDir;

    fn shared() -> SharedDatabase {
        Arc::new(Mutex::new(fixtures::populated()))
    }

    #[test]
    fn test_register_and_poll() {
        let mut manager = BackgroundTaskManager::new();
        let (id, tx, _cancel) = manager.register_task(TaskType::Export);

        assert!(manager.is_running(TaskType::Export));
        assert!(!manager.is_running(TaskType::Backup));

        tx.send(TaskUpdate::Started { total: 4 }).unwrap();
        tx.send(TaskUpdate::Progress(TaskProgress::new(2, 4))).unwrap();
        assert!(manager.poll_updates().is_empty());
        assert_eq!(manager.running_tasks()[0].progress.as_ref().unwrap().percent(), 50);

        tx.send(TaskUpdate::Completed { message: "done".into() }).unwrap();
        let completed = manager.poll_updates();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, id);
        assert!(completed[0].success);
        assert!(!manager.has_running_tasks());
    }

    #[test]
    fn test_cancel_sets_flag() {
        let mut manager = BackgroundTaskManager::new();
        let (id, _tx, cancel) = manager.register_task(TaskType::Export);

        assert!(manager.cancel_task(id));
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_backup_then_restore_in_background() {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("backup.db");
        let db = shared();
        let mut manager = BackgroundTaskManager::new();

        manager.spawn_backup(db.clone(), snapshot.clone(), 1);
        let done = manager.wait_all();
        assert_eq!(done.len(), 1);
        assert!(done[0].success, "{}", done[0].message);
        assert!(snapshot.exists());

        db.lock().unwrap().delete_album("Books").unwrap();
        manager.spawn_restore(db.clone(), snapshot, 16);
        let done = manager.wait_all();
        assert!(done[0].success, "{}", done[0].message);
        assert!(db.lock().unwrap().album_exists("Books").unwrap());
    }

    #[test]
    fn test_restore_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut manager = BackgroundTaskManager::new();

        manager.spawn_restore(shared(), dir.path().join("missing.db"), 16);
        let done = manager.wait_all();

        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
        assert_eq!(done[0].task_type, TaskType::Restore);
    }

    #[test]
    fn test_export_in_background() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("books.csv");
        let mut manager = BackgroundTaskManager::new();

        manager.spawn_export(
            shared(),
            "Books".to_string(),
            path.clone(),
            ExportFormat::Csv,
            ExportOptions::default(),
        );
        let done = manager.wait_all();

        assert!(done[0].success, "{}", done[0].message);
        assert!(done[0].message.starts_with("Exported 9 items"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 10);
    }
}
