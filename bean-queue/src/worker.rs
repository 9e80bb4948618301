use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{
    job::{Job, JobHandle, ListenerLocator},
    Message, MessageEvent, MessageId, MessageState, Priority, QueueConfig, QueueError, QueueResult,
};

/// Entry of the to-execute table
struct JobWrapper {
    sequence: u64,
    message: Arc<Message>,
}

/// What the scan should do after one message step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Capacity reached; abandon the rest of the scan
    Restart,
}

/// Summary of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Messages stepped through
    pub examined: usize,
    /// Scan stopped early because the worker was at capacity
    pub abandoned: bool,
}

/// Counters kept by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    attached: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    deferred: AtomicU64,
}

impl WorkerStats {
    pub fn attached(&self) -> u64 {
        self.attached.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Scans abandoned because every job slot was taken
    pub fn deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }
}

/// Background worker owning one priority partition of one queue.
///
/// All four tables are lock-guarded: `attach` is called by producers while
/// the scan loop reads and removes entries. Lock order is
/// `executing` before `states`; no lock is held across an `.await`.
pub struct QueueWorker {
    queue: String,
    bean_type: String,
    priority: Priority,
    config: QueueConfig,
    locator: Arc<ListenerLocator>,
    to_execute: Mutex<HashMap<MessageId, JobWrapper>>,
    executing: Mutex<HashMap<MessageId, JobHandle>>,
    states: Mutex<HashMap<MessageId, MessageState>>,
    messages: Mutex<HashMap<MessageId, Arc<Message>>>,
    sequence: AtomicU64,
    running: AtomicBool,
    events: broadcast::Sender<MessageEvent>,
    stats: WorkerStats,
}

impl QueueWorker {
    pub fn new(
        queue: impl Into<String>,
        bean_type: impl Into<String>,
        priority: Priority,
        config: QueueConfig,
        locator: Arc<ListenerLocator>,
        events: broadcast::Sender<MessageEvent>,
    ) -> Self {
        Self {
            queue: queue.into(),
            bean_type: bean_type.into(),
            priority,
            config,
            locator,
            to_execute: Mutex::new(HashMap::new()),
            executing: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            running: AtomicBool::new(false),
            events,
            stats: WorkerStats::default(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a message for processing.
    ///
    /// Messages of another priority belong to a sibling worker and are ignored.
    pub fn attach(&self, message: Message) {
        if message.priority != self.priority {
            debug!(
                queue = %self.queue,
                priority = %self.priority,
                message_id = %message.id,
                "Ignoring message for priority {}", message.priority
            );
            return;
        }

        let id = message.id.clone();
        let state = message.state;
        let message = Arc::new(message);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        self.messages.lock().insert(id.clone(), Arc::clone(&message));
        self.states.lock().insert(id.clone(), state);
        self.to_execute.lock().insert(id.clone(), JobWrapper { sequence, message });

        self.stats.attached.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(MessageEvent::Attached {
            message_id: id.clone(),
            queue: self.queue.clone(),
            priority: self.priority,
            at: Utc::now(),
        });
        debug!(queue = %self.queue, priority = %self.priority, message_id = %id, "Message attached");
    }

    /// Current state of a tracked message
    pub fn message_state(&self, id: &MessageId) -> Option<MessageState> {
        self.states.lock().get(id).copied()
    }

    /// Whether the message is present in any tracking table
    pub fn is_tracked(&self, id: &MessageId) -> bool {
        self.executing.lock().contains_key(id)
            || self.to_execute.lock().contains_key(id)
            || self.states.lock().contains_key(id)
            || self.messages.lock().contains_key(id)
    }

    /// Number of jobs currently executing
    pub fn executing_count(&self) -> usize {
        self.executing.lock().len()
    }

    /// Number of messages still tracked
    pub fn pending_count(&self) -> usize {
        self.to_execute.lock().len()
    }

    /// Whether the job of a message has signalled completion
    pub fn is_job_finished(&self, id: &MessageId) -> bool {
        self.executing
            .lock()
            .get_mut(id)
            .map(|handle| handle.is_finished())
            .unwrap_or(false)
    }

    /// Snapshot of the to-execute table in attach order
    fn pending_ids(&self) -> Vec<MessageId> {
        let to_execute = self.to_execute.lock();
        let mut ids: Vec<(u64, MessageId)> = to_execute
            .iter()
            .map(|(id, wrapper)| (wrapper.sequence, id.clone()))
            .collect();
        ids.sort_unstable_by_key(|(sequence, _)| *sequence);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Run one scan synchronously. Must be called inside a tokio runtime
    /// because starting a job spawns a task.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        for id in self.pending_ids() {
            report.examined += 1;
            if self.advance(&id) == Step::Restart {
                report.abandoned = true;
                break;
            }
        }
        report
    }

    /// Apply the state machine to one message
    pub fn advance(&self, id: &MessageId) -> Step {
        let Some(state) = self.message_state(id) else {
            return Step::Continue;
        };

        match state {
            MessageState::Active => {
                self.set_state(id, state, MessageState::ToProcess);
            }
            MessageState::ToProcess => return self.start_job(id),
            MessageState::InProgress | MessageState::Paused => self.check_job(id, state),
            MessageState::Processed | MessageState::Failed => self.remove(id, state),
            MessageState::Unknown => {
                error!(
                    critical = true,
                    queue = %self.queue,
                    message_id = %id,
                    "Message is in unknown state, marking it failed"
                );
                self.set_state(id, state, MessageState::Failed);
            }
        }

        Step::Continue
    }

    fn start_job(&self, id: &MessageId) -> Step {
        let mut executing = self.executing.lock();
        if executing.len() >= self.config.max_jobs {
            info!(
                queue = %self.queue,
                priority = %self.priority,
                max_jobs = self.config.max_jobs,
                "Worker at capacity, restarting scan"
            );
            self.stats.deferred.fetch_add(1, Ordering::Relaxed);
            return Step::Restart;
        }

        let Some(message) = self.messages.lock().get(id).cloned() else {
            drop(executing);
            error!(critical = true, queue = %self.queue, message_id = %id, "Tracked message has no body");
            self.set_state(id, MessageState::ToProcess, MessageState::Failed);
            return Step::Continue;
        };

        let handle = Job::new(message, self.bean_type.clone(), Arc::clone(&self.locator)).spawn();
        executing.insert(id.clone(), handle);
        self.set_state(id, MessageState::ToProcess, MessageState::InProgress);
        debug!(queue = %self.queue, message_id = %id, executing = executing.len(), "Job started");
        Step::Continue
    }

    fn check_job(&self, id: &MessageId, state: MessageState) {
        let outcome = {
            let mut executing = self.executing.lock();
            match executing.get_mut(id) {
                Some(handle) => Ok(handle.poll_outcome().cloned()),
                None => Err(()),
            }
        };

        match outcome {
            Ok(Some(outcome)) => self.set_state(id, state, outcome.state()),
            Ok(None) => {
                debug!(queue = %self.queue, message_id = %id, "Job still running");
            }
            Err(()) => {
                error!(critical = true, queue = %self.queue, message_id = %id, "Running message has no job");
                self.set_state(id, state, MessageState::Failed);
            }
        }
    }

    fn set_state(&self, id: &MessageId, from: MessageState, to: MessageState) {
        if !from.can_transition_to(to) {
            error!(critical = true, message_id = %id, %from, %to, "Refusing backwards state transition");
            return;
        }

        self.states.lock().insert(id.clone(), to);

        match to {
            MessageState::Processed => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            MessageState::Failed => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let _ = self.events.send(MessageEvent::StateChanged {
            message_id: id.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Garbage-collect a message that reached a terminal state
    fn remove(&self, id: &MessageId, final_state: MessageState) {
        self.executing.lock().remove(id);
        self.to_execute.lock().remove(id);
        self.states.lock().remove(id);
        self.messages.lock().remove(id);

        let _ = self.events.send(MessageEvent::Removed {
            message_id: id.clone(),
            final_state,
            at: Utc::now(),
        });
        debug!(queue = %self.queue, message_id = %id, state = %final_state, "Message removed");
    }

    /// Spawn the background loop
    pub fn start(self: &Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = Arc::clone(self);
        let join_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        WorkerHandle {
            worker: Arc::clone(self),
            shutdown_tx,
            join_handle,
        }
    }

    /// Scan until a stop signal arrives; the stop signal is only checked
    /// between scans so the current one always completes.
    #[instrument(skip(self, shutdown_rx), fields(queue = %self.queue, priority = %self.priority))]
    async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        self.running.store(true, Ordering::Release);
        info!("Queue worker started");

        let message_delay = self.priority.polling_delay();

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                break;
            }

            for id in self.pending_ids() {
                let step = self.advance(&id);
                tokio::time::sleep(message_delay).await;
                if step == Step::Restart {
                    break;
                }
            }

            tokio::time::sleep(self.config.idle_delay).await;
        }

        self.running.store(false, Ordering::Release);
        info!("Queue worker stopped");
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    worker: Arc<QueueWorker>,
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn worker(&self) -> &Arc<QueueWorker> {
        &self.worker
    }

    /// Gracefully stop the worker and wait for its loop to exit
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle.await.map_err(|e| QueueError::WorkerStop {
            queue: self.worker.queue.clone(),
            priority: self.worker.priority.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::MessageListener;
    use async_trait::async_trait;
    use bean_core::{BeanRegistry, BeanResult, InvocationContext};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tracing_test::traced_test;

    /// Listener that blocks each message until a permit is released
    struct Gated {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl MessageListener for Gated {
        async fn on_message(&self, _message: &Message, _ctx: &InvocationContext) -> BeanResult<()> {
            self.gate.acquire().await?.forget();
            Ok(())
        }
    }

    fn worker_with(max_jobs: usize) -> (Arc<QueueWorker>, Arc<Semaphore>) {
        worker_at(Priority::Low, max_jobs)
    }

    fn worker_at(priority: Priority, max_jobs: usize) -> (Arc<QueueWorker>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let registry: BeanRegistry<dyn MessageListener> = BeanRegistry::new();
        registry.register("OrderBean", Arc::new(Gated { gate: Arc::clone(&gate) }));
        let (events, _) = broadcast::channel(64);

        let worker = QueueWorker::new(
            "orders",
            "OrderBean",
            priority,
            QueueConfig::default().with_max_jobs(max_jobs),
            Arc::new(registry),
            events,
        );
        (Arc::new(worker), gate)
    }

    fn low(payload: serde_json::Value) -> Message {
        Message::new("orders", payload).with_priority(Priority::Low)
    }

    async fn wait_until_finished(worker: &QueueWorker, id: &MessageId) {
        for _ in 0..200 {
            if worker.is_job_finished(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job for {id} never finished");
    }

    #[tokio::test]
    async fn message_walks_the_happy_path() {
        let (worker, gate) = worker_with(10);
        let message = low(serde_json::json!({"sku": "A-1"}));
        let id = message.id.clone();
        worker.attach(message);
        assert_eq!(worker.message_state(&id), Some(MessageState::Active));

        worker.scan();
        assert_eq!(worker.message_state(&id), Some(MessageState::ToProcess));

        worker.scan();
        assert_eq!(worker.message_state(&id), Some(MessageState::InProgress));
        assert_eq!(worker.executing_count(), 1);

        worker.scan();
        assert_eq!(worker.message_state(&id), Some(MessageState::InProgress));

        gate.add_permits(1);
        wait_until_finished(&worker, &id).await;

        worker.scan();
        assert_eq!(worker.message_state(&id), Some(MessageState::Processed));

        worker.scan();
        assert!(!worker.is_tracked(&id));
        assert_eq!(worker.stats().processed(), 1);
    }

    #[tokio::test]
    async fn capacity_holds_second_message_back() {
        let (worker, gate) = worker_with(1);
        let first = low(serde_json::json!(1));
        let second = low(serde_json::json!(2));
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        worker.attach(first);
        worker.attach(second);

        worker.scan();
        let report = worker.scan();
        assert!(report.abandoned);
        assert_eq!(worker.executing_count(), 1);
        assert_eq!(worker.message_state(&first_id), Some(MessageState::InProgress));
        assert_eq!(worker.message_state(&second_id), Some(MessageState::ToProcess));

        for _ in 0..3 {
            worker.scan();
            assert!(worker.executing_count() <= 1);
            assert_eq!(worker.message_state(&second_id), Some(MessageState::ToProcess));
        }
        assert!(worker.stats().deferred() >= 3);

        gate.add_permits(1);
        wait_until_finished(&worker, &first_id).await;
        worker.scan();
        assert_eq!(worker.message_state(&first_id), Some(MessageState::Processed));

        // first is reaped, then the slot goes to second
        worker.scan();
        assert!(!worker.is_tracked(&first_id));
        assert_eq!(worker.message_state(&second_id), Some(MessageState::InProgress));
        assert_eq!(worker.executing_count(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_state_is_forced_to_failed() {
        let (worker, _gate) = worker_with(10);
        let message = low(serde_json::json!({})).with_state(MessageState::Unknown);
        let id = message.id.clone();
        worker.attach(message);

        worker.scan();
        assert_eq!(worker.message_state(&id), Some(MessageState::Failed));
        assert!(logs_contain("unknown state"));

        worker.scan();
        assert!(!worker.is_tracked(&id));
        assert_eq!(worker.stats().failed(), 1);
    }

    #[tokio::test]
    async fn other_priorities_are_ignored() {
        let (worker, _gate) = worker_with(10);
        let message = Message::new("orders", serde_json::json!({})).with_priority(Priority::High);
        let id = message.id.clone();
        worker.attach(message);

        assert!(!worker.is_tracked(&id));
        assert_eq!(worker.stats().attached(), 0);
    }

    #[tokio::test]
    async fn events_follow_transitions() {
        let (worker, gate) = worker_with(10);
        let mut events = worker.events.subscribe();
        gate.add_permits(1);

        let message = low(serde_json::json!({}));
        let id = message.id.clone();
        worker.attach(message);
        worker.scan();
        worker.scan();
        wait_until_finished(&worker, &id).await;
        worker.scan();
        worker.scan();

        let names: Vec<&'static str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.event_name())
            .collect();
        assert_eq!(
            names,
            vec!["attached", "state_changed", "state_changed", "state_changed", "removed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_processes_and_stops() {
        let (worker, gate) = worker_at(Priority::High, 10);
        gate.add_permits(2);
        let handle = worker.start();

        let a = Message::new("orders", serde_json::json!("a")).with_priority(Priority::High);
        let b = Message::new("orders", serde_json::json!("b")).with_priority(Priority::High);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        worker.attach(a);
        worker.attach(b);

        for _ in 0..400 {
            if !worker.is_tracked(&a_id) && !worker.is_tracked(&b_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(!worker.is_tracked(&a_id));
        assert!(!worker.is_tracked(&b_id));

        handle.shutdown().await.unwrap();
        assert!(!worker.is_running());
    }
}
