//! Background task execution: a fixed worker pool over a bounded queue.

pub mod error;
pub mod feed_refresh;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use error::SchedulerError;
pub use feed_refresh::{create_feed_refresh_task, feed_id_of, FeedRefreshHandler};
pub use registry::HandlerRegistry;
pub use scheduler::{Scheduler, ShutdownHandle, EVENT_BUFFER, QUEUE_CAPACITY};
pub use types::{Task, TaskEvent, TaskEventKind, TaskFilter, TaskHandler, TaskStatus, TaskType};
