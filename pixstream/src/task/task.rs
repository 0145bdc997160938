//! A unit of work in a task chain.
//!
//! The work itself is a closure plus an execution-context declaration; a
//! task that declares [`ExecContext::Background`] runs on the blocking
//! pool, one that declares [`ExecContext::Foreground`] runs on the
//! single-threaded foreground executor.

use crate::task::operation::TaskOperation;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Where a task's closure executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// Run on the background blocking pool.
    Background,
    /// Run on the single-threaded foreground executor.
    Foreground,
}

/// Task lifecycle status. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not yet executed.
    Pending,
    /// Currently executing.
    Running,
    /// `on_execute` has returned.
    Finished,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

/// Progress value published by a running task.
pub type ProgressValue = Box<dyn Any + Send>;

/// Work closure signature: previous payload in, next payload out.
pub type TaskFn = Box<dyn FnOnce(&TaskHandle, TaskOperation) -> TaskOperation + Send>;

/// Progress handler signature; runs on the foreground executor.
pub type ProgressFn = Box<dyn FnMut(ProgressValue) + Send>;

/// State shared between a [`Task`], its [`TaskHandle`] and the manager.
#[derive(Debug, Default)]
pub(crate) struct TaskShared {
    cancelled: AtomicBool,
    // Encoded TaskStatus; fetch_max makes transitions forward-only.
    status: AtomicU8,
}

impl TaskShared {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_status(&self, status: TaskStatus) {
        self.status.fetch_max(status as u8, Ordering::SeqCst);
    }

    pub(crate) fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::SeqCst))
    }
}

/// A unit of work with an identity, an execution context, a cancel flag
/// and a forward-only lifecycle.
pub struct Task {
    id: u32,
    name: Option<String>,
    context: ExecContext,
    shared: Arc<TaskShared>,
    work: TaskFn,
    on_progress: Option<ProgressFn>,
}

impl Task {
    /// Create a task that runs on the background pool.
    pub fn background(
        work: impl FnOnce(&TaskHandle, TaskOperation) -> TaskOperation + Send + 'static,
    ) -> Self {
        Self::new(ExecContext::Background, work)
    }

    /// Create a task that runs on the foreground executor.
    pub fn foreground(
        work: impl FnOnce(&TaskHandle, TaskOperation) -> TaskOperation + Send + 'static,
    ) -> Self {
        Self::new(ExecContext::Foreground, work)
    }

    fn new(
        context: ExecContext,
        work: impl FnOnce(&TaskHandle, TaskOperation) -> TaskOperation + Send + 'static,
    ) -> Self {
        Self {
            id: 0,
            name: None,
            context,
            shared: Arc::new(TaskShared::default()),
            work: Box::new(work),
            on_progress: None,
        }
    }

    /// Attach a name, used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a progress handler.
    ///
    /// Progress values published via [`TaskHandle::publish_progress`] are
    /// delivered to this handler on the foreground executor.
    pub fn with_progress(mut self, handler: impl FnMut(ProgressValue) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(handler));
        self
    }

    /// Task id; assigned by the manager when the task is appended.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    /// Task name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared execution context.
    pub fn context(&self) -> ExecContext {
        self.context
    }

    /// Mark the task cancelled.
    ///
    /// Cancellation is cooperative: the work closure is expected to check
    /// [`TaskHandle::is_cancelled`] and stop early. Once set, the flag
    /// never reverts.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    /// Split the task into the pieces the manager dispatches.
    pub(crate) fn into_parts(self) -> (TaskMeta, Arc<TaskShared>, TaskFn, Option<ProgressFn>) {
        let meta = TaskMeta {
            id: self.id,
            name: self.name,
        };
        (meta, self.shared, self.work, self.on_progress)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("context", &self.context)
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Identifying details kept by the manager after dispatch, for logging.
#[derive(Debug, Clone)]
pub(crate) struct TaskMeta {
    pub id: u32,
    pub name: Option<String>,
}

impl std::fmt::Display for TaskMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "task {} ({name})", self.id),
            None => write!(f, "task {}", self.id),
        }
    }
}

/// Handle passed to a running task's closure.
///
/// Exposes the cooperative cancel flag and progress publishing.
pub struct TaskHandle {
    shared: Arc<TaskShared>,
    progress_tx: Option<mpsc::UnboundedSender<ProgressValue>>,
}

impl TaskHandle {
    pub(crate) fn new(
        shared: Arc<TaskShared>,
        progress_tx: Option<mpsc::UnboundedSender<ProgressValue>>,
    ) -> Self {
        Self {
            shared,
            progress_tx,
        }
    }

    /// Whether this task has been cancelled.
    ///
    /// Long-running work should check this before expensive steps.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Publish an intermediate progress value.
    ///
    /// Delivered to the task's progress handler on the foreground
    /// executor, independent of chain progression. Dropped silently when
    /// the task has no handler.
    pub fn publish_progress(&self, value: impl Any + Send) {
        match &self.progress_tx {
            Some(tx) => {
                let _ = tx.send(Box::new(value));
            }
            None => debug!("progress published by task without a handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::background(|_, op| op);
        assert_eq!(task.id(), 0);
        assert_eq!(task.name(), None);
        assert_eq!(task.context(), ExecContext::Background);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(!task.is_cancelled());
    }

    #[test]
    fn test_task_builder() {
        let task = Task::foreground(|_, op| op).with_name("deliver");
        assert_eq!(task.name(), Some("deliver"));
        assert_eq!(task.context(), ExecContext::Foreground);
    }

    #[test]
    fn test_cancel_flag_never_reverts() {
        let task = Task::background(|_, op| op);
        task.cancel();
        assert!(task.is_cancelled());
        task.cancel();
        assert!(task.is_cancelled());
    }

    #[test]
    fn test_status_transitions_forward_only() {
        let shared = TaskShared::default();
        shared.advance_status(TaskStatus::Running);
        assert_eq!(shared.status(), TaskStatus::Running);

        shared.advance_status(TaskStatus::Finished);
        assert_eq!(shared.status(), TaskStatus::Finished);

        // Regressions are ignored.
        shared.advance_status(TaskStatus::Pending);
        assert_eq!(shared.status(), TaskStatus::Finished);
        shared.advance_status(TaskStatus::Running);
        assert_eq!(shared.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_handle_observes_cancel() {
        let task = Task::background(|_, op| op);
        let (_, shared, _, _) = task.into_parts();
        let handle = TaskHandle::new(Arc::clone(&shared), None);

        assert!(!handle.is_cancelled());
        shared.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_publish_without_handler_is_noop() {
        let handle = TaskHandle::new(Arc::new(TaskShared::default()), None);
        handle.publish_progress(5u32); // must not panic
    }
}
