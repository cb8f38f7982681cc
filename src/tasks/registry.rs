use std::collections::HashMap;
use std::sync::Arc;

use crate::tasks::{SchedulerError, TaskHandler, TaskType};

/// Handlers collected before the scheduler is built, so a duplicate binding
/// is caught at construction time instead of at dispatch.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), SchedulerError> {
        let task_type = handler.task_type();
        if self.handlers.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Result<Self, SchedulerError> {
        self.register(handler)?;
        Ok(self)
    }

    pub(crate) fn into_map(self) -> HashMap<TaskType, Arc<dyn TaskHandler>> {
        self.handlers
    }
}
