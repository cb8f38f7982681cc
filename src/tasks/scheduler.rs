use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::tasks::{
    HandlerRegistry, SchedulerError, Task, TaskEvent, TaskEventKind, TaskFilter, TaskHandler,
    TaskStatus, TaskType,
};

/// Capacity of the shared task queue. `add_task` fails fast beyond this.
pub const QUEUE_CAPACITY: usize = 100;

/// Per-subscriber event buffer. Events to a full subscriber are dropped.
pub const EVENT_BUFFER: usize = 100;

type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the scheduler handle and its workers.
struct Shared {
    tasks: RwLock<HashMap<String, Task>>,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    subscribers: Mutex<Vec<mpsc::Sender<TaskEvent>>>,
}

impl Shared {
    fn read_tasks(&self) -> RwLockReadGuard<'_, HashMap<String, Task>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tasks(&self) -> RwLockWriteGuard<'_, HashMap<String, Task>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler_for(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_type)
            .cloned()
    }

    fn publish(&self, event: TaskEvent) {
        lock(&self.subscribers).retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(task_id = %event.task_id, kind = ?event.kind, "Event subscriber full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Claims a pending task and runs it to a terminal state.
    async fn run_task(&self, task_id: &str, cancel: &CancellationToken) {
        let task = {
            let mut tasks = self.write_tasks();
            let Some(task) = tasks.get_mut(task_id) else {
                debug!(task_id, "Task removed before it ran");
                return;
            };
            if task.status != TaskStatus::Pending {
                debug!(task_id, status = %task.status, "Skipping task that is no longer pending");
                return;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            task.clone()
        };

        debug!(task_id, task_type = %task.task_type, "Task started");
        self.publish(TaskEvent::from_task(TaskEventKind::Started, &task));

        let outcome = match self.handler_for(task.task_type) {
            None => Err(format!(
                "no handler registered for task type: {}",
                task.task_type
            )),
            Some(handler) => match AssertUnwindSafe(handler.execute(cancel, &task))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => Err(format!("task handler panicked: {}", panic_message(&*panic))),
            },
        };

        let finished = {
            let mut tasks = self.write_tasks();
            let entry = tasks.entry(task.id.clone()).or_insert(task);
            entry.ended_at = Some(Utc::now());
            match outcome {
                Ok(()) => {
                    entry.status = TaskStatus::Completed;
                    entry.error = None;
                }
                Err(message) => {
                    entry.status = TaskStatus::Failed;
                    entry.error = Some(message);
                }
            }
            entry.clone()
        };

        let kind = if finished.status == TaskStatus::Completed {
            debug!(task_id, "Task completed");
            TaskEventKind::Completed
        } else {
            warn!(task_id, error = finished.error.as_deref().unwrap_or(""), "Task failed");
            TaskEventKind::Failed
        };
        self.publish(TaskEvent::from_task(kind, &finished));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

async fn worker_loop(
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
) {
    debug!("Worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = async { queue.lock().await.recv().await } => next,
        };

        match next {
            Some(task_id) => shared.run_task(&task_id, &cancel).await,
            None => break,
        }
    }
    debug!("Worker stopped");
}

/// Resolves once every worker has exited after [`Scheduler::stop`].
#[derive(Clone)]
pub struct ShutdownHandle {
    done: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub async fn wait(&mut self) {
        // A dropped sender means the joiner is gone too.
        let _ = self.done.wait_for(|done| *done).await;
    }

    /// Returns `false` if workers were still running when `timeout` elapsed.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Fixed-size worker pool pulling task ids from one bounded queue.
///
/// Tasks live in an in-memory table for the life of the scheduler; workers
/// claim a task by flipping it from `Pending` to `Running` under the table
/// lock, so a resubmitted id runs at most once. Lifecycle events are
/// best-effort: a slow subscriber loses events rather than stalling workers.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: usize,
    queue_tx: Mutex<Option<mpsc::Sender<String>>>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    state: Mutex<RunState>,
    cancel: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        Self::build(workers, HashMap::new())
    }

    pub fn with_registry(workers: usize, registry: HandlerRegistry) -> Self {
        Self::build(workers, registry.into_map())
    }

    fn build(workers: usize, handlers: HashMap<TaskType, Arc<dyn TaskHandler>>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                tasks: RwLock::new(HashMap::new()),
                handlers: RwLock::new(handlers),
                subscribers: Mutex::new(Vec::new()),
            }),
            workers: workers.max(1),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            state: Mutex::new(RunState::Idle),
            cancel: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            span: info_span!("scheduler"),
        }
    }

    /// Parent span for worker logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == RunState::Running
    }

    pub fn register_handler(&self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let task_type = handler.task_type();
        let mut handlers = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateHandler(task_type));
        }
        handlers.insert(task_type, handler);
        Ok(())
    }

    /// Spawns the workers. Must be called from within a tokio runtime.
    pub fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            RunState::Running => return Err(SchedulerError::AlreadyRunning),
            RunState::Stopped => return Err(SchedulerError::Stopped),
            RunState::Idle => {}
        }

        let cancel = parent.child_token();
        let handles = (0..self.workers)
            .map(|worker_id| {
                let span = info_span!(parent: &self.span, "worker", worker_id);
                tokio::spawn(
                    worker_loop(self.shared.clone(), self.queue_rx.clone(), cancel.clone())
                        .instrument(span),
                )
            })
            .collect();

        *lock(&self.handles) = handles;
        *lock(&self.cancel) = Some(cancel);
        *state = RunState::Running;

        let _enter = self.span.enter();
        info!(workers = self.workers, "Scheduler started");
        Ok(())
    }

    /// Cancels the workers and closes the queue without waiting.
    ///
    /// Handlers already executing run to completion; queued tasks stay
    /// `Pending`. Event streams close once every worker has exited.
    pub fn stop(&self) -> Result<ShutdownHandle> {
        let mut state = lock(&self.state);
        match *state {
            RunState::Idle => return Err(SchedulerError::NotRunning),
            RunState::Stopped => return Err(SchedulerError::Stopped),
            RunState::Running => {}
        }
        *state = RunState::Stopped;

        if let Some(cancel) = lock(&self.cancel).take() {
            cancel.cancel();
        }
        lock(&self.queue_tx).take();

        let handles = std::mem::take(&mut *lock(&self.handles));
        let shared = self.shared.clone();
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(
            async move {
                futures::future::join_all(handles).await;
                lock(&shared.subscribers).clear();
                info!("Scheduler stopped");
                let _ = done_tx.send(true);
            }
            .instrument(self.span.clone()),
        );

        Ok(ShutdownHandle { done: done_rx })
    }

    /// Records the task as `Pending` and enqueues it without blocking.
    ///
    /// A rejected enqueue leaves the task recorded; re-adding the same id
    /// while it is still pending resubmits it.
    pub fn add_task(&self, mut task: Task) -> Result<String> {
        let tx = lock(&self.queue_tx)
            .clone()
            .ok_or(SchedulerError::Stopped)?;

        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        if task.created_at.is_none() {
            task.created_at = Some(Utc::now());
        }
        task.status = TaskStatus::Pending;
        task.started_at = None;
        task.ended_at = None;
        task.error = None;

        let id = task.id.clone();
        {
            let mut tasks = self.shared.write_tasks();
            if let Some(existing) = tasks.get(&id) {
                if existing.status != TaskStatus::Pending {
                    return Err(SchedulerError::DuplicateTask(id));
                }
            }
            tasks.insert(id.clone(), task);
        }

        match tx.try_send(id.clone()) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => {
                warn!(task_id = %id, "Task queue full");
                Err(SchedulerError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SchedulerError::Stopped),
        }
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.shared.read_tasks().get(id).cloned()
    }

    /// Matching tasks, oldest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .shared
            .read_tasks()
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if filter.limit > 0 {
            tasks.truncate(filter.limit);
        }
        tasks
    }

    pub fn running_count(&self) -> usize {
        self.shared
            .read_tasks()
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    pub fn remove_task(&self, id: &str) -> Result<Task> {
        let mut tasks = self.shared.write_tasks();
        match tasks.get(id).map(|t| t.status) {
            None => Err(SchedulerError::TaskNotFound(id.to_string())),
            Some(TaskStatus::Running) => Err(SchedulerError::TaskRunning(id.to_string())),
            Some(_) => tasks
                .remove(id)
                .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string())),
        }
    }

    /// Drops every failed task from the table, returning how many went.
    pub fn clear_failed_tasks(&self) -> usize {
        let mut tasks = self.shared.write_tasks();
        let before = tasks.len();
        tasks.retain(|_, t| t.status != TaskStatus::Failed);
        before - tasks.len()
    }

    /// Opens a new event stream. Subscribing after `stop` yields a stream
    /// that is already closed.
    pub fn subscribe(&self) -> mpsc::Receiver<TaskEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if *lock(&self.state) != RunState::Stopped {
            lock(&self.shared.subscribers).push(tx);
        }
        rx
    }
}
