//! Background task management for long-running whole-store operations.
//!
//! Backup, restore and export run on worker threads against a shared
//! store and report progress over channels, so a front end can keep
//! polling instead of blocking.

pub mod manager;

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;

pub use manager::{BackgroundTaskManager, SharedDatabase};

/// Unique identifier for a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Backup,
    Restore,
    Export,
}

impl TaskType {
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskType::Backup => "Backup",
            TaskType::Restore => "Restore",
            TaskType::Export => "Export",
        }
    }
}

/// Progress information for a task.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }

    /// Progress of a page copy with `remaining` of `pagecount` pages left.
    pub fn pages(remaining: i32, pagecount: i32) -> Self {
        let total = pagecount.max(0) as usize;
        let remaining = remaining.max(0) as usize;
        TaskProgress::new(total.saturating_sub(remaining), total).with_message("pages")
    }
}

impl From<rusqlite::backup::Progress> for TaskProgress {
    fn from(p: rusqlite::backup::Progress) -> Self {
        TaskProgress::pages(p.remaining, p.pagecount)
    }
}

/// State of a background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Update messages sent from background tasks via channels.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    Started { total: usize },
    Progress(TaskProgress),
    Completed { message: String },
    Cancelled,
    Failed { error: String },
}

/// A running background task with its state and communication channels.
pub struct BackgroundTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub progress: Option<TaskProgress>,
    pub cancel_flag: Arc<AtomicBool>,
    pub receiver: mpsc::Receiver<TaskUpdate>,
}

impl BackgroundTask {
    pub fn new(
        task_type: TaskType,
        cancel_flag: Arc<AtomicBool>,
        receiver: mpsc::Receiver<TaskUpdate>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type,
            state: TaskState::Running,
            progress: None,
            cancel_flag,
            receiver,
        }
    }

    /// Request cancellation. Only exports stop early; backup and restore
    /// always run to completion.
    pub fn cancel(&self) {
        self.cancel_flag
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// Result of polling task updates.
#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
    pub id: TaskId,
    pub task_type: TaskType,
    pub message: String,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(TaskProgress::new(0, 0).percent(), 0);
        assert_eq!(TaskProgress::new(5, 20).percent(), 25);
        assert_eq!(TaskProgress::new(30, 20).percent(), 100);
    }

    #[test]
    fn test_progress_from_backup_pages() {
        let progress = TaskProgress::pages(3, 12);
        assert_eq!(progress.current, 9);
        assert_eq!(progress.total, 12);
    }
}
