//! Chain scheduler: runs tasks strictly in append order, alternating
//! between the background pool and the foreground executor.
//!
//! Each task's closure receives the payload produced by the previous task
//! and returns the payload for the next one. The manager owns the context
//! handoff: a continuation never starts before the previous closure has
//! fully returned, whichever context it ran on.

use crate::task::foreground::ForegroundExecutor;
use crate::task::operation::{ChainState, TaskOperation};
use crate::task::task::{ProgressValue, Task, TaskHandle, TaskShared, TaskStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

/// Chain execution state.
///
/// `Idle → Running → {Paused, Finished, Cancelled}`; `Paused → Running`
/// on resume. `Finished` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainStatus {
    /// Created but not yet executed.
    #[default]
    Idle,
    /// Executing tasks.
    Running,
    /// Suspended between tasks, waiting for an external resume.
    Paused,
    /// All tasks ran to completion.
    Finished,
    /// The chain was cancelled before completion.
    Cancelled,
}

impl ChainStatus {
    /// True for `Finished` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Finished => write!(f, "Finished"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Error halting a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A task's closure panicked; the chain does not proceed.
    #[error("task {task} panicked")]
    TaskPanicked {
        /// Display label of the panicking task
        task: String,
    },

    /// The foreground executor shut down while the chain still needed it.
    #[error("foreground executor shut down mid-chain")]
    ForegroundClosed,

    /// `execute()` was called more than once.
    #[error("chain has already been executed")]
    AlreadyStarted,
}

/// Interior state shared by all clones of a [`TaskManager`].
struct ChainShared {
    name: Option<String>,
    queue: Mutex<VecDeque<Task>>,
    next_id: AtomicU32,
    started: AtomicBool,
    cancel_requested: AtomicBool,
    resume: Notify,
    current: Mutex<Option<Arc<TaskShared>>>,
    status_tx: watch::Sender<ChainStatus>,
}

/// Sequencer for an ordered chain of [`Task`]s.
///
/// Cloning yields another handle to the same chain, so control methods
/// (cancel, resume, remove) can be exercised while `execute()` runs.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<ChainShared>,
    foreground: ForegroundExecutor,
}

impl TaskManager {
    /// Create an unnamed chain using the given foreground executor.
    pub fn new(foreground: ForegroundExecutor) -> Self {
        Self::build(None, foreground)
    }

    /// Create a named chain; the name shows up in logs.
    pub fn named(name: impl Into<String>, foreground: ForegroundExecutor) -> Self {
        Self::build(Some(name.into()), foreground)
    }

    fn build(name: Option<String>, foreground: ForegroundExecutor) -> Self {
        let (status_tx, _) = watch::channel(ChainStatus::Idle);
        Self {
            shared: Arc::new(ChainShared {
                name,
                queue: Mutex::new(VecDeque::new()),
                next_id: AtomicU32::new(1),
                started: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                resume: Notify::new(),
                current: Mutex::new(None),
                status_tx,
            }),
            foreground,
        }
    }

    /// Chain name, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Append a task to the chain; returns `self` for chaining.
    ///
    /// Rejected (with a warning) once execution has started.
    pub fn next(&self, mut task: Task) -> &Self {
        if self.shared.started.load(Ordering::SeqCst) {
            warn!(
                chain = self.shared.name.as_deref().unwrap_or("<unnamed>"),
                "task appended after execute(); dropped"
            );
            return self;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        task.set_id(id);
        self.shared.queue.lock().unwrap().push_back(task);
        self
    }

    /// Current chain status.
    pub fn status(&self) -> ChainStatus {
        *self.shared.status_tx.borrow()
    }

    /// Subscribe to chain status changes.
    pub fn watch_status(&self) -> watch::Receiver<ChainStatus> {
        self.shared.status_tx.subscribe()
    }

    /// True once the chain has run all tasks.
    pub fn is_finished(&self) -> bool {
        self.status() == ChainStatus::Finished
    }

    /// Mark the currently running task cancelled.
    ///
    /// Cooperative: the task observes the flag via its handle, or runs to
    /// completion.
    pub fn cancel_current_task(&self) {
        if let Some(current) = self.shared.current.lock().unwrap().as_ref() {
            current.cancel();
        }
    }

    /// Cancel the whole chain.
    ///
    /// The running task gets its cancel flag set; no further task starts.
    /// A paused chain wakes up and terminates.
    pub fn cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_current_task();
        self.shared.resume.notify_one();
    }

    /// Drop all not-yet-run tasks.
    ///
    /// The currently running task finishes (or observes cancellation) but
    /// the chain does not proceed further.
    pub fn remove_tasks(&self) {
        self.shared.queue.lock().unwrap().clear();
    }

    /// Resume a chain paused by a task that set [`ChainState::Pause`].
    pub fn resume(&self) {
        self.shared.resume.notify_one();
    }

    /// Run the chain to completion.
    ///
    /// Tasks execute strictly in append order; `initial` is handed to the
    /// first task and each task's output feeds the next. Returns the last
    /// payload produced, whether the chain finished or was cancelled
    /// part-way.
    pub async fn execute(&self, initial: TaskOperation) -> Result<TaskOperation, ChainError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(ChainError::AlreadyStarted);
        }

        self.set_status(ChainStatus::Running);
        let mut operation = initial;

        loop {
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                self.set_status(ChainStatus::Cancelled);
                return Ok(operation);
            }

            let task = self.shared.queue.lock().unwrap().pop_front();
            let Some(task) = task else {
                self.set_status(ChainStatus::Finished);
                return Ok(operation);
            };

            operation = self.run_task(task, operation).await?;

            if operation.chain_state() == ChainState::Pause {
                operation = self.wait_for_resume(operation).await?;
                if self.status() == ChainStatus::Cancelled {
                    return Ok(operation);
                }
            }
        }
    }

    /// Dispatch one task on its declared context and await its return.
    async fn run_task(
        &self,
        task: Task,
        operation: TaskOperation,
    ) -> Result<TaskOperation, ChainError> {
        use crate::task::task::ExecContext;

        let context = task.context();
        let (meta, shared, work, on_progress) = task.into_parts();

        *self.shared.current.lock().unwrap() = Some(Arc::clone(&shared));
        shared.advance_status(TaskStatus::Running);
        debug!(chain = ?self.shared.name, task = %meta, ?context, "task starting");

        let progress_tx = on_progress.map(|handler| self.spawn_progress_forwarder(handler));
        let handle = TaskHandle::new(Arc::clone(&shared), progress_tx);

        let result = match context {
            ExecContext::Background => tokio::task::spawn_blocking(move || work(&handle, operation))
                .await
                .map_err(|join_err| {
                    warn!(task = %meta, error = %join_err, "background task failed");
                    ChainError::TaskPanicked {
                        task: meta.to_string(),
                    }
                }),
            ExecContext::Foreground => self
                .foreground
                .run(move || work(&handle, operation))
                .await
                .map_err(|_| ChainError::ForegroundClosed),
        };

        shared.advance_status(TaskStatus::Finished);
        *self.shared.current.lock().unwrap() = None;

        match &result {
            Ok(_) => debug!(chain = ?self.shared.name, task = %meta, "task finished"),
            Err(_) => self.set_status(ChainStatus::Cancelled),
        }
        result
    }

    /// Relay progress values to the handler on the foreground executor.
    fn spawn_progress_forwarder(
        &self,
        handler: Box<dyn FnMut(ProgressValue) + Send>,
    ) -> mpsc::UnboundedSender<ProgressValue> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressValue>();
        let foreground = self.foreground.clone();
        let handler = Arc::new(Mutex::new(handler));

        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let handler = Arc::clone(&handler);
                let delivered = foreground
                    .run(move || {
                        if let Ok(mut handler) = handler.lock() {
                            (handler)(value);
                        }
                    })
                    .await;
                if delivered.is_err() {
                    break;
                }
            }
        });

        tx
    }

    /// Park the chain until `resume()` or `cancel()`.
    async fn wait_for_resume(
        &self,
        mut operation: TaskOperation,
    ) -> Result<TaskOperation, ChainError> {
        self.set_status(ChainStatus::Paused);
        debug!(chain = ?self.shared.name, "chain paused");

        loop {
            self.shared.resume.notified().await;
            if self.shared.cancel_requested.load(Ordering::SeqCst) {
                self.set_status(ChainStatus::Cancelled);
                return Ok(operation);
            }
            break;
        }

        operation.set_chain_state(ChainState::Continue);
        self.set_status(ChainStatus::Running);
        debug!(chain = ?self.shared.name, "chain resumed");
        Ok(operation)
    }

    fn set_status(&self, status: ChainStatus) {
        self.shared.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .field("queued", &self.shared.queue.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn manager() -> TaskManager {
        TaskManager::new(ForegroundExecutor::start())
    }

    #[tokio::test]
    async fn test_empty_chain_finishes() {
        let chain = manager();
        let result = chain.execute(TaskOperation::new()).await.unwrap();
        assert!(result.is_empty());
        assert!(chain.is_finished());
    }

    #[tokio::test]
    async fn test_payload_flows_between_tasks() {
        let chain = manager();
        chain
            .next(Task::background(|_, mut op| {
                op.push(10u32);
                op
            }))
            .next(Task::foreground(|_, mut op| {
                let n = op.take::<u32>().unwrap();
                op.push(n * 2);
                op
            }))
            .next(Task::background(|_, mut op| {
                let n = op.take::<u32>().unwrap();
                op.push(n + 1);
                op
            }));

        let mut result = chain.execute(TaskOperation::new()).await.unwrap();
        assert_eq!(result.take::<u32>(), Some(21));
    }

    #[tokio::test]
    async fn test_strict_ordering_across_contexts() {
        let chain = manager();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..6 {
            let log = Arc::clone(&log);
            let record = move |_: &TaskHandle, op: TaskOperation| {
                // Stagger background tasks to give reordering a chance
                // to show up if the manager ever allowed it.
                std::thread::sleep(Duration::from_millis(5));
                log.lock().unwrap().push(i);
                op
            };
            if i % 2 == 0 {
                chain.next(Task::background(record));
            } else {
                chain.next(Task::foreground(record));
            }
        }

        chain.execute(TaskOperation::new()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_task_ids_assigned_in_order() {
        let chain = manager();
        let t1 = Task::background(|_, op| op);
        let t2 = Task::background(|_, op| op);
        chain.next(t1).next(t2);

        let queue = chain.shared.queue.lock().unwrap();
        let ids: Vec<u32> = queue.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_next_after_execute_is_rejected() {
        let chain = manager();
        chain.next(Task::background(|_, op| op));
        chain.execute(TaskOperation::new()).await.unwrap();

        chain.next(Task::background(|_, mut op| {
            op.push(1u32);
            op
        }));
        assert!(chain.shared.queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_twice_errors() {
        let chain = manager();
        chain.execute(TaskOperation::new()).await.unwrap();
        assert!(matches!(
            chain.execute(TaskOperation::new()).await,
            Err(ChainError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_cancel_current_task_is_observed() {
        let chain = manager();
        let observed = Arc::new(AtomicBool::new(false));

        let controller = chain.clone();
        let observed_in_task = Arc::clone(&observed);
        chain.next(Task::background(move |handle, op| {
            controller.cancel_current_task();
            // Flag must be visible inside the same execution.
            observed_in_task.store(handle.is_cancelled(), Ordering::SeqCst);
            op
        }));

        chain.execute(TaskOperation::new()).await.unwrap();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_chain_cancel_skips_remaining_tasks() {
        let chain = manager();
        let ran = Arc::new(AtomicUsize::new(0));

        let controller = chain.clone();
        let ran1 = Arc::clone(&ran);
        chain.next(Task::background(move |_, op| {
            ran1.fetch_add(1, Ordering::SeqCst);
            controller.cancel();
            op
        }));
        let ran2 = Arc::clone(&ran);
        chain.next(Task::background(move |_, op| {
            ran2.fetch_add(1, Ordering::SeqCst);
            op
        }));

        chain.execute(TaskOperation::new()).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(chain.status(), ChainStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_remove_tasks_drops_pending() {
        let chain = manager();
        let ran = Arc::new(AtomicUsize::new(0));

        let controller = chain.clone();
        let ran1 = Arc::clone(&ran);
        chain.next(Task::background(move |_, op| {
            ran1.fetch_add(1, Ordering::SeqCst);
            controller.remove_tasks();
            op
        }));
        for _ in 0..3 {
            let ran_n = Arc::clone(&ran);
            chain.next(Task::background(move |_, op| {
                ran_n.fetch_add(1, Ordering::SeqCst);
                op
            }));
        }

        chain.execute(TaskOperation::new()).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(chain.is_finished());
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let chain = manager();
        let second_ran = Arc::new(AtomicBool::new(false));

        chain.next(Task::background(|_, mut op| {
            op.set_chain_state(ChainState::Pause);
            op
        }));
        let flag = Arc::clone(&second_ran);
        chain.next(Task::background(move |_, op| {
            flag.store(true, Ordering::SeqCst);
            op
        }));

        let controller = chain.clone();
        let exec = tokio::spawn(async move { chain.execute(TaskOperation::new()).await });

        // Wait for the chain to reach Paused.
        let mut status = controller.watch_status();
        while *status.borrow() != ChainStatus::Paused {
            status.changed().await.unwrap();
        }
        assert!(!second_ran.load(Ordering::SeqCst), "task ran during pause");

        controller.resume();
        exec.await.unwrap().unwrap();
        assert!(second_ran.load(Ordering::SeqCst));
        assert!(controller.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_during_pause_terminates() {
        let chain = manager();
        chain.next(Task::background(|_, mut op| {
            op.set_chain_state(ChainState::Pause);
            op
        }));
        let untouched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&untouched);
        chain.next(Task::background(move |_, op| {
            flag.store(true, Ordering::SeqCst);
            op
        }));

        let controller = chain.clone();
        let exec = tokio::spawn(async move { chain.execute(TaskOperation::new()).await });

        let mut status = controller.watch_status();
        while *status.borrow() != ChainStatus::Paused {
            status.changed().await.unwrap();
        }
        controller.cancel();

        exec.await.unwrap().unwrap();
        assert_eq!(controller.status(), ChainStatus::Cancelled);
        assert!(!untouched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_halts_chain() {
        let chain = manager();
        chain.next(Task::background(|_, _| panic!("task blew up")));
        let untouched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&untouched);
        chain.next(Task::background(move |_, op| {
            flag.store(true, Ordering::SeqCst);
            op
        }));

        let result = chain.execute(TaskOperation::new()).await;
        assert!(matches!(result, Err(ChainError::TaskPanicked { .. })));
        assert_eq!(chain.status(), ChainStatus::Cancelled);
        assert!(!untouched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_progress_delivered_to_handler() {
        let chain = manager();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&received);
        chain.next(
            Task::background(|handle, op| {
                for i in 0..3u32 {
                    handle.publish_progress(i);
                }
                op
            })
            .with_progress(move |value| {
                if let Ok(v) = value.downcast::<u32>() {
                    sink.lock().unwrap().push(*v);
                }
            }),
        );

        chain.execute(TaskOperation::new()).await.unwrap();

        // Progress delivery is asynchronous; give the forwarder a moment.
        for _ in 0..50 {
            if received.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_status_watch_sees_transitions() {
        let chain = manager();
        chain.next(Task::background(|_, op| op));

        let mut rx = chain.watch_status();
        assert_eq!(*rx.borrow(), ChainStatus::Idle);

        chain.execute(TaskOperation::new()).await.unwrap();
        // Latest value is terminal.
        assert!(rx.borrow_and_update().is_terminal());
    }
}
