//! Batch refresh driver: feeds the scheduler at most `max_concurrency`
//! refresh tasks at a time and tops the batch up as tasks finish.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::app::{NewsflowError, Result};
use crate::store::Store;
use crate::tasks::{
    create_feed_refresh_task, feed_id_of, Scheduler, SchedulerError, TaskEvent, TaskEventKind,
    TaskStatus, TaskType,
};

pub const MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// How often tracked tasks are polled in case their events were dropped.
pub const RECONCILE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// Tracks one refresh batch.
///
/// The concurrency cap here is independent of the scheduler's worker count:
/// the cap bounds how many refresh tasks are queued or running on behalf of
/// this orchestrator, the workers bound how many tasks of any kind execute.
pub struct RefreshOrchestrator<S: Store> {
    scheduler: Arc<Scheduler>,
    store: Arc<S>,
    max_concurrency: usize,
    pending: VecDeque<i64>,
    /// feed id -> task id
    refreshing: HashMap<i64, String>,
    summary: BatchSummary,
    span: Span,
}

impl<S: Store> RefreshOrchestrator<S> {
    pub fn new(scheduler: Arc<Scheduler>, store: Arc<S>, max_concurrency: usize) -> Self {
        let span = info_span!("orchestrator");
        let clamped = max_concurrency.clamp(1, MAX_CONCURRENCY);
        if clamped != max_concurrency {
            warn!(
                parent: &span,
                requested = max_concurrency,
                using = clamped,
                "Refresh concurrency out of range"
            );
        }
        if clamped > scheduler.workers() {
            warn!(
                parent: &span,
                concurrency = clamped,
                workers = scheduler.workers(),
                "Refresh concurrency exceeds worker count; extra tasks will wait in the queue"
            );
        }

        Self {
            scheduler,
            store,
            max_concurrency: clamped,
            pending: VecDeque::new(),
            refreshing: HashMap::new(),
            summary: BatchSummary::default(),
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn refreshing_count(&self) -> usize {
        self.refreshing.len()
    }

    pub fn is_refreshing(&self, feed_id: i64) -> bool {
        self.refreshing.contains_key(&feed_id)
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.refreshing.is_empty()
    }

    /// Totals since the last call.
    pub fn take_summary(&mut self) -> BatchSummary {
        std::mem::take(&mut self.summary)
    }

    /// Queues every visible feed that is not already queued or refreshing
    /// and starts the first batch. Returns how many feeds were queued.
    pub fn refresh_all(&mut self) -> Result<usize> {
        let feeds = self.store.list_feeds()?;
        let mut queued = 0;
        for feed in feeds {
            if self.refreshing.contains_key(&feed.id) || self.pending.contains(&feed.id) {
                continue;
            }
            self.pending.push_back(feed.id);
            queued += 1;
        }

        info!(parent: &self.span, queued, pending = self.pending.len(), "Queued feeds for refresh");
        self.start_next_batch();
        Ok(queued)
    }

    /// Submits one feed right away, outside the concurrency cap. Returns
    /// the task id; a feed already refreshing returns its current task.
    pub fn refresh_feed(&mut self, feed_id: i64) -> Result<String> {
        if let Some(task_id) = self.refreshing.get(&feed_id) {
            return Ok(task_id.clone());
        }

        let feed = self
            .store
            .get_feed(feed_id)?
            .ok_or_else(|| NewsflowError::FeedNotFound(feed_id.to_string()))?;

        let mut task = create_feed_refresh_task(feed_id, &feed.url);
        task.id = Uuid::new_v4().to_string();
        let task_id = task.id.clone();
        if let Err(e) = self.scheduler.add_task(task) {
            let _ = self.scheduler.remove_task(&task_id);
            return Err(e.into());
        }
        self.pending.retain(|id| *id != feed_id);
        self.refreshing.insert(feed_id, task_id.clone());

        debug!(parent: &self.span, feed_id, task_id = %task_id, "Submitted single feed refresh");
        Ok(task_id)
    }

    /// Moves feeds from pending to refreshing while under the cap. A full
    /// scheduler queue ends the batch early; the feed goes back to the
    /// front of the pending queue.
    pub fn start_next_batch(&mut self) -> usize {
        let _enter = self.span.enter();
        let mut started = 0;

        while self.refreshing.len() < self.max_concurrency {
            let Some(feed_id) = self.pending.pop_front() else {
                break;
            };

            let feed = match self.store.get_feed(feed_id) {
                Ok(Some(feed)) => feed,
                Ok(None) => {
                    debug!(feed_id, "Feed deleted while queued");
                    continue;
                }
                Err(e) => {
                    error!(feed_id, error = %e, "Failed to load feed for refresh");
                    self.summary.failed += 1;
                    continue;
                }
            };

            let mut task = create_feed_refresh_task(feed_id, &feed.url);
            task.id = Uuid::new_v4().to_string();
            let task_id = task.id.clone();

            match self.scheduler.add_task(task) {
                Ok(_) => {
                    debug!(feed_id, task_id = %task_id, "Refresh task submitted");
                    self.refreshing.insert(feed_id, task_id);
                    started += 1;
                }
                Err(SchedulerError::QueueFull) => {
                    warn!(feed_id, "Scheduler queue full, deferring remaining feeds");
                    // the rejected task stays recorded as pending otherwise
                    let _ = self.scheduler.remove_task(&task_id);
                    self.pending.push_front(feed_id);
                    break;
                }
                Err(e) => {
                    error!(feed_id, error = %e, "Failed to submit refresh task");
                    self.summary.failed += 1;
                }
            }
        }

        started
    }

    /// Applies a scheduler event. Returns `true` once the batch is done.
    pub fn handle_event(&mut self, event: &TaskEvent) -> bool {
        if event.task_type != TaskType::FeedRefresh || !event.is_terminal() {
            return self.is_idle();
        }
        let Some(feed_id) = feed_id_of(&event.data) else {
            return self.is_idle();
        };
        if self.refreshing.get(&feed_id) != Some(&event.task_id) {
            return self.is_idle();
        }

        self.refreshing.remove(&feed_id);
        self.record(feed_id, event.kind == TaskEventKind::Completed, event.error.as_deref());
        self.start_next_batch();
        self.is_idle()
    }

    /// Polls the scheduler for every tracked task and settles the ones that
    /// finished without us seeing their event. Returns `true` once the
    /// batch is done.
    pub fn reconcile(&mut self) -> bool {
        let settled: Vec<(i64, TaskStatus, Option<String>)> = self
            .refreshing
            .iter()
            .filter_map(|(feed_id, task_id)| match self.scheduler.get_task(task_id) {
                Some(task) if task.status.is_terminal() => Some((*feed_id, task.status, task.error)),
                Some(_) => None,
                None => Some((
                    *feed_id,
                    TaskStatus::Failed,
                    Some(format!("task {task_id} disappeared")),
                )),
            })
            .collect();

        if !settled.is_empty() {
            let _enter = self.span.enter();
            debug!(count = settled.len(), "Reconciled finished refresh tasks");
        }
        for (feed_id, status, err) in settled {
            self.refreshing.remove(&feed_id);
            self.record(feed_id, status == TaskStatus::Completed, err.as_deref());
        }

        self.start_next_batch();
        self.is_idle()
    }

    fn record(&mut self, feed_id: i64, completed: bool, err: Option<&str>) {
        let _enter = self.span.enter();
        if completed {
            self.summary.completed += 1;
            debug!(feed_id, "Feed refresh finished");
        } else {
            self.summary.failed += 1;
            warn!(feed_id, error = err.unwrap_or(""), "Feed refresh failed");
        }
    }

    /// Drives the current batch to completion from `events`, reconciling on
    /// a timer. Returns the batch totals.
    ///
    /// If the event stream closes (scheduler stopped) the batch is
    /// abandoned; feeds that never finished are not counted.
    pub async fn run_until_idle(&mut self, events: &mut mpsc::Receiver<TaskEvent>) -> BatchSummary {
        self.start_next_batch();

        let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_idle() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => {
                        if !self.reconcile() {
                            warn!(
                                parent: &self.span,
                                pending = self.pending.len(),
                                refreshing = self.refreshing.len(),
                                "Event stream closed, abandoning refresh batch"
                            );
                            self.pending.clear();
                            self.refreshing.clear();
                        }
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.reconcile();
                }
            }
        }

        let summary = self.take_summary();
        info!(
            parent: &self.span,
            completed = summary.completed,
            failed = summary.failed,
            "Refresh batch finished"
        );
        summary
    }
}
