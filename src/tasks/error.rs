use thiserror::Error;

use crate::tasks::TaskType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("scheduler has been stopped")]
    Stopped,

    #[error("task queue is full")]
    QueueFull,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("cannot remove running task: {0}")]
    TaskRunning(String),

    #[error("handler already registered for task type: {0}")]
    DuplicateHandler(TaskType),

    #[error("task already exists: {0}")]
    DuplicateTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(SchedulerError::QueueFull.to_string(), "task queue is full");
        assert_eq!(
            SchedulerError::DuplicateHandler(TaskType::FeedRefresh).to_string(),
            "handler already registered for task type: feed_refresh"
        );
        assert_eq!(
            SchedulerError::TaskRunning("abc".into()).to_string(),
            "cannot remove running task: abc"
        );
    }
}
