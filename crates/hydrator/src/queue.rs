//! Background work queues.
//!
//! - [`PriorityJobQueue`] runs hydration jobs one at a time, highest priority
//!   first, after the interaction gate opens
//! - [`IdleTaskQueue`] runs low-value enrichment tasks one at a time in FIFO
//!   order, pausing briefly between them
//!
//! Both deduplicate by identity (job key or task label) across pending and
//! running work, and both are bounded. A panicking job or task is logged and
//! the worker moves on.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

use crate::HydrateError;
use crate::gate::InteractionGate;

/// What happened to a submitted job or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Enqueued {
    Scheduled,
    /// Same identity already pending or running.
    Duplicate,
    /// Rejected because the queue was full.
    Dropped,
}

/// A unit of hydration work.
pub struct HydrationJob {
    /// Dedup identity.
    pub key: String,
    pub label: String,
    pub priority: i32,
    pub run: BoxFuture<'static, Result<(), HydrateError>>,
}

impl std::fmt::Debug for HydrationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydrationJob")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: HydrationJob) -> Enqueued;
}

#[async_trait]
pub trait IdleQueue: Send + Sync {
    async fn enqueue_idle(&self, label: String, task: BoxFuture<'static, ()>) -> Enqueued;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub running: bool,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct JobState {
    pending: Vec<HydrationJob>,
    scheduled: HashSet<String>,
    active: HashSet<String>,
    draining: bool,
    completed: usize,
    failed: usize,
}

struct JobShared {
    state: Mutex<JobState>,
    gate: Arc<dyn InteractionGate>,
    capacity: usize,
    drained: Notify,
}

/// Bounded priority queue with a single worker.
///
/// Jobs of equal priority run in submission order. When full, the
/// lowest-priority, most recently submitted job is dropped.
#[derive(Clone)]
pub struct PriorityJobQueue {
    shared: Arc<JobShared>,
}

impl PriorityJobQueue {
    pub fn new(gate: Arc<dyn InteractionGate>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(JobShared {
                state: Mutex::new(JobState::default()),
                gate,
                capacity: capacity.max(1),
                drained: Notify::new(),
            }),
        }
    }

    /// Drop every pending job. Running jobs finish normally.
    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.pending.clear();
        state.scheduled.clear();
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock().await;
        QueueStats {
            pending: state.pending.len(),
            running: !state.active.is_empty(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Resolve once nothing is pending or running.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.drained.notified();
            {
                let state = self.shared.state.lock().await;
                if !state.draining && state.pending.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl JobQueue for PriorityJobQueue {
    async fn enqueue(&self, job: HydrationJob) -> Enqueued {
        let mut state = self.shared.state.lock().await;
        if state.scheduled.contains(&job.key) || state.active.contains(&job.key) {
            tracing::debug!(key = job.key, "hydrator job already queued");
            return Enqueued::Duplicate;
        }

        let key = job.key.clone();
        let position = state.pending.partition_point(|queued| queued.priority >= job.priority);
        state.scheduled.insert(key.clone());
        state.pending.insert(position, job);

        let mut outcome = Enqueued::Scheduled;
        if state.pending.len() > self.shared.capacity
            && let Some(dropped) = state.pending.pop()
        {
            state.scheduled.remove(&dropped.key);
            tracing::debug!(label = dropped.label, "hydrator dropped job");
            if dropped.key == key {
                outcome = Enqueued::Dropped;
            }
        }

        if !state.draining && !state.pending.is_empty() {
            state.draining = true;
            tokio::spawn(drain_jobs(self.shared.clone()));
        }
        outcome
    }
}

async fn drain_jobs(shared: Arc<JobShared>) {
    loop {
        shared.gate.wait().await;

        let job = {
            let mut state = shared.state.lock().await;
            if state.pending.is_empty() {
                state.draining = false;
                shared.drained.notify_waiters();
                return;
            }
            let job = state.pending.remove(0);
            state.scheduled.remove(&job.key);
            state.active.insert(job.key.clone());
            job
        };

        let HydrationJob { key, label, run, .. } = job;
        let started = Instant::now();
        tracing::debug!(label, "hydrator job start");
        let result = AssertUnwindSafe(run).catch_unwind().await;

        let mut state = shared.state.lock().await;
        state.active.remove(&key);
        match result {
            Ok(Ok(())) => {
                state.completed += 1;
                tracing::debug!(label, elapsed_ms = started.elapsed().as_millis() as u64, "hydrator job complete");
            }
            Ok(Err(e)) => {
                state.failed += 1;
                tracing::warn!(label, error = %e, "hydrator job failed");
            }
            Err(panic) => {
                state.failed += 1;
                tracing::warn!(label, panic = panic_message(panic.as_ref()), "hydrator job panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

struct IdleEntry {
    label: String,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct IdleState {
    pending: VecDeque<IdleEntry>,
    labels: HashSet<String>,
    running: Option<String>,
    draining: bool,
    completed: usize,
    last_label: Option<String>,
}

struct IdleShared {
    state: Mutex<IdleState>,
    gate: Arc<dyn InteractionGate>,
    capacity: usize,
    delay: Duration,
    drained: Notify,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleQueueStats {
    pub pending: usize,
    pub running: bool,
    pub completed: usize,
    pub last_label: Option<String>,
}

/// Bounded FIFO queue for deferred enrichment work.
///
/// When full, the oldest pending task is dropped to make room.
#[derive(Clone)]
pub struct IdleTaskQueue {
    shared: Arc<IdleShared>,
}

impl IdleTaskQueue {
    pub fn new(gate: Arc<dyn InteractionGate>, capacity: usize, delay: Duration) -> Self {
        Self {
            shared: Arc::new(IdleShared {
                state: Mutex::new(IdleState::default()),
                gate,
                capacity: capacity.max(1),
                delay,
                drained: Notify::new(),
            }),
        }
    }

    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.pending.clear();
        let running = state.running.clone();
        state.labels.retain(|label| Some(label) == running.as_ref());
    }

    pub async fn stats(&self) -> IdleQueueStats {
        let state = self.shared.state.lock().await;
        IdleQueueStats {
            pending: state.pending.len(),
            running: state.running.is_some(),
            completed: state.completed,
            last_label: state.last_label.clone(),
        }
    }

    /// Labels of pending tasks, oldest first.
    pub async fn pending_labels(&self) -> Vec<String> {
        let state = self.shared.state.lock().await;
        state.pending.iter().map(|entry| entry.label.clone()).collect()
    }

    pub async fn idle(&self) {
        loop {
            let notified = self.shared.drained.notified();
            {
                let state = self.shared.state.lock().await;
                if !state.draining && state.pending.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl IdleQueue for IdleTaskQueue {
    async fn enqueue_idle(&self, label: String, task: BoxFuture<'static, ()>) -> Enqueued {
        let mut state = self.shared.state.lock().await;
        if state.labels.contains(&label) {
            return Enqueued::Duplicate;
        }

        if state.pending.len() >= self.shared.capacity
            && let Some(dropped) = state.pending.pop_front()
        {
            state.labels.remove(&dropped.label);
            tracing::warn!(dropped = dropped.label, reason = "max-pending", "idle queue dropping pending task");
        }

        state.labels.insert(label.clone());
        tracing::debug!(label, pending = state.pending.len() + 1, "idle queue enqueue");
        state.pending.push_back(IdleEntry { label, task });

        if !state.draining {
            state.draining = true;
            tokio::spawn(drain_idle(self.shared.clone()));
        }
        Enqueued::Scheduled
    }
}

async fn drain_idle(shared: Arc<IdleShared>) {
    loop {
        shared.gate.wait().await;

        let entry = {
            let mut state = shared.state.lock().await;
            match state.pending.pop_front() {
                Some(entry) => {
                    state.running = Some(entry.label.clone());
                    entry
                }
                None => {
                    state.draining = false;
                    shared.drained.notify_waiters();
                    tracing::debug!(completed = state.completed, "idle queue drained");
                    return;
                }
            }
        };

        let started = Instant::now();
        if let Err(panic) = AssertUnwindSafe(entry.task).catch_unwind().await {
            tracing::warn!(label = entry.label, panic = panic_message(panic.as_ref()), "idle task panicked");
        }

        let more = {
            let mut state = shared.state.lock().await;
            state.labels.remove(&entry.label);
            state.running = None;
            state.completed += 1;
            state.last_label = Some(entry.label.clone());
            !state.pending.is_empty()
        };
        tracing::debug!(label = entry.label, elapsed_ms = started.elapsed().as_millis() as u64, "idle task complete");

        if more {
            tokio::time::sleep(shared.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ReadyGate;
    use futures_util::FutureExt;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn job(key: &str, priority: i32, log: &Arc<Mutex<Vec<String>>>) -> HydrationJob {
        let log = log.clone();
        let name = key.to_string();
        HydrationJob {
            key: key.to_string(),
            label: format!("hydrate:{key}"),
            priority,
            run: async move {
                log.lock().await.push(name);
                Ok(())
            }
            .boxed(),
        }
    }

    fn task(label: &str, log: &Arc<Mutex<Vec<String>>>) -> BoxFuture<'static, ()> {
        let log = log.clone();
        let name = label.to_string();
        async move { log.lock().await.push(name) }.boxed()
    }

    #[tokio::test]
    async fn test_jobs_run_by_priority_after_gate_opens() {
        let gate = Arc::new(ReadyGate::default());
        let queue = PriorityJobQueue::new(gate.clone(), 24);
        let log = recorder();

        queue.enqueue(job("low", 1, &log)).await;
        queue.enqueue(job("high-a", 10, &log)).await;
        queue.enqueue(job("mid", 5, &log)).await;
        queue.enqueue(job("high-b", 10, &log)).await;
        tokio::task::yield_now().await;
        assert!(log.lock().await.is_empty());

        gate.open();
        queue.idle().await;
        assert_eq!(*log.lock().await, vec!["high-a", "high-b", "mid", "low"]);
        assert_eq!(queue.stats().await.completed, 4);
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_ignored() {
        let gate = Arc::new(ReadyGate::default());
        let queue = PriorityJobQueue::new(gate.clone(), 24);
        let log = recorder();

        assert_eq!(queue.enqueue(job("profile:self:u1", 10, &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue(job("profile:self:u1", 10, &log)).await, Enqueued::Duplicate);

        gate.open();
        queue.idle().await;
        assert_eq!(log.lock().await.len(), 1);

        assert_eq!(queue.enqueue(job("profile:self:u1", 10, &log)).await, Enqueued::Scheduled);
        queue.idle().await;
        assert_eq!(log.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_running_job_blocks_duplicates() {
        let gate = Arc::new(ReadyGate::new(true));
        let queue = PriorityJobQueue::new(gate, 24);
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());

        let slow = HydrationJob {
            key: "slow".into(),
            label: "slow".into(),
            priority: 1,
            run: {
                let release = release.clone();
                let started = started.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
                .boxed()
            },
        };
        queue.enqueue(slow).await;
        started.notified().await;

        let log = recorder();
        assert_eq!(queue.enqueue(job("slow", 1, &log)).await, Enqueued::Duplicate);
        assert!(queue.stats().await.running);

        release.notify_one();
        queue.idle().await;
        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_lowest_priority() {
        let gate = Arc::new(ReadyGate::default());
        let queue = PriorityJobQueue::new(gate.clone(), 2);
        let log = recorder();

        assert_eq!(queue.enqueue(job("a", 5, &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue(job("b", 1, &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue(job("c", 10, &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue(job("d", 0, &log)).await, Enqueued::Dropped);

        gate.open();
        queue.idle().await;
        assert_eq!(*log.lock().await, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_queue() {
        let gate = Arc::new(ReadyGate::new(true));
        let queue = PriorityJobQueue::new(gate, 24);
        let log = recorder();

        let failing = HydrationJob {
            key: "boom".into(),
            label: "boom".into(),
            priority: 10,
            run: async { Err(HydrateError::Remote("offline".into())) }.boxed(),
        };
        queue.enqueue(failing).await;
        queue.enqueue(job("after", 1, &log)).await;
        queue.idle().await;

        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(*log.lock().await, vec!["after"]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_wedge_queue() {
        let gate = Arc::new(ReadyGate::new(true));
        let queue = PriorityJobQueue::new(gate, 24);
        let log = recorder();

        let panicking = HydrationJob {
            key: "boom".into(),
            label: "boom".into(),
            priority: 10,
            run: async { panic!("decoder blew up") }.boxed(),
        };
        queue.enqueue(panicking).await;
        queue.enqueue(job("after", 1, &log)).await;
        tokio::time::timeout(Duration::from_secs(1), queue.idle()).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert!(!stats.running);
        assert_eq!(*log.lock().await, vec!["after"]);
        assert_eq!(queue.enqueue(job("boom", 1, &log)).await, Enqueued::Scheduled);
    }

    #[tokio::test]
    async fn test_panicking_idle_task_releases_its_label() {
        let gate = Arc::new(ReadyGate::new(true));
        let queue = IdleTaskQueue::new(gate, 12, Duration::from_millis(1));
        let log = recorder();

        queue.enqueue_idle("boom".into(), async { panic!("preview splice failed") }.boxed()).await;
        queue.enqueue_idle("after".into(), task("after", &log)).await;
        tokio::time::timeout(Duration::from_secs(1), queue.idle()).await.unwrap();

        assert_eq!(*log.lock().await, vec!["after"]);
        assert_eq!(queue.stats().await.completed, 2);
        assert_eq!(queue.enqueue_idle("boom".into(), task("boom", &log)).await, Enqueued::Scheduled);
    }

    #[tokio::test]
    async fn test_idle_tasks_run_fifo_and_dedup_by_label() {
        let gate = Arc::new(ReadyGate::default());
        let queue = IdleTaskQueue::new(gate.clone(), 12, Duration::from_millis(1));
        let log = recorder();

        assert_eq!(queue.enqueue_idle("a".into(), task("a", &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue_idle("b".into(), task("b", &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.enqueue_idle("a".into(), task("a-again", &log)).await, Enqueued::Duplicate);
        assert_eq!(queue.pending_labels().await, vec!["a", "b"]);

        gate.open();
        queue.idle().await;
        assert_eq!(*log.lock().await, vec!["a", "b"]);

        let stats = queue.stats().await;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.last_label.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_idle_capacity_drops_oldest() {
        let gate = Arc::new(ReadyGate::default());
        let queue = IdleTaskQueue::new(gate.clone(), 2, Duration::from_millis(1));
        let log = recorder();

        for label in ["first", "second", "third"] {
            assert_eq!(queue.enqueue_idle(label.into(), task(label, &log)).await, Enqueued::Scheduled);
        }
        assert_eq!(queue.pending_labels().await, vec!["second", "third"]);

        assert_eq!(queue.enqueue_idle("first".into(), task("first", &log)).await, Enqueued::Scheduled);
        assert_eq!(queue.pending_labels().await, vec!["third", "first"]);

        gate.open();
        queue.idle().await;
        assert_eq!(*log.lock().await, vec!["third", "first"]);
    }

    #[tokio::test]
    async fn test_clear_drops_pending() {
        let gate = Arc::new(ReadyGate::default());
        let jobs = PriorityJobQueue::new(gate.clone(), 24);
        let idle = IdleTaskQueue::new(gate.clone(), 12, Duration::from_millis(1));
        let log = recorder();

        jobs.enqueue(job("a", 1, &log)).await;
        idle.enqueue_idle("b".into(), task("b", &log)).await;
        jobs.clear().await;
        idle.clear().await;
        assert_eq!(jobs.stats().await.pending, 0);
        assert_eq!(idle.stats().await.pending, 0);

        gate.open();
        jobs.idle().await;
        idle.idle().await;
        assert!(log.lock().await.is_empty());
        assert_eq!(jobs.enqueue(job("a", 1, &log)).await, Enqueued::Scheduled);
    }
}
