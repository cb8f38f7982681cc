use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FeedRefresh,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FeedRefresh => "feed_refresh",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work tracked by the scheduler.
///
/// `data` is the handler's payload; its keys are defined per task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Empty until the scheduler assigns one.
    pub id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub data: HashMap<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            id: String::new(),
            task_type,
            status: TaskStatus::Pending,
            data: HashMap::new(),
            created_at: None,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Started,
    Completed,
    Failed,
}

/// Lifecycle notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub data: HashMap<String, Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub(crate) fn from_task(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            kind,
            task_id: task.id.clone(),
            task_type: task.task_type,
            status: task.status,
            data: task.data.clone(),
            error: task.error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TaskEventKind::Completed | TaskEventKind::Failed)
    }
}

/// Filter for [`Scheduler::list_tasks`](crate::tasks::Scheduler::list_tasks).
/// `limit == 0` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub limit: usize,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.task_type.map_or(true, |t| t == task.task_type)
            && self.status.map_or(true, |s| s == task.status)
    }
}

/// Executes tasks of one type. Returning `Err` fails the task with the
/// error's message.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> TaskType;

    async fn execute(&self, cancel: &CancellationToken, task: &Task) -> crate::app::Result<()>;
}
