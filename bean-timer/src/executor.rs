use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{TaskId, Timer, TimerError, TimerId, TimerResult, TimerService, DEFAULT_TICK_INTERVAL};

/// One pending firing of a timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTask {
    pub execute_at: DateTime<Utc>,
    pub task_id: TaskId,
    pub timer_id: TimerId,
}

type TaskKey = (DateTime<Utc>, TaskId);

/// Shared loop firing due timer tasks for every timer service.
///
/// Services are held weakly and resolved by primary key when a task comes
/// due. Lock order is `tasks` before `scheduled_timers`.
pub struct TimerServiceExecutor {
    tick_interval: Duration,
    services: RwLock<HashMap<String, Weak<TimerService>>>,
    scheduled_timers: Mutex<HashMap<TimerId, String>>,
    tasks: Mutex<BTreeMap<TaskKey, TimerTask>>,
    next_task: AtomicU64,
    wake: Notify,
    running: AtomicBool,
}

impl Default for TimerServiceExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl TimerServiceExecutor {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            services: RwLock::new(HashMap::new()),
            scheduled_timers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(BTreeMap::new()),
            next_task: AtomicU64::new(0),
            wake: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Make a service resolvable by its primary key
    pub fn register_service(&self, service: &Arc<TimerService>) {
        let key = service.primary_key().to_string();
        if self.services.write().insert(key.clone(), Arc::downgrade(service)).is_some() {
            debug!(service = %key, "Timer service replaced");
        }
    }

    pub fn service(&self, key: &str) -> Option<Arc<TimerService>> {
        self.services.read().get(key).and_then(Weak::upgrade)
    }

    /// Queue a firing of `timer` at its next expiration, or right away when
    /// that is already past.
    pub fn schedule(&self, service_key: &str, timer: &Timer) -> TaskId {
        let now = Utc::now();
        let execute_at = timer.next_expiration().map_or(now, |next| next.max(now));
        let task_id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let task = TimerTask {
            execute_at,
            task_id,
            timer_id: timer.id().clone(),
        };

        {
            let mut tasks = self.tasks.lock();
            tasks.insert((execute_at, task_id), task);
            self.scheduled_timers
                .lock()
                .insert(timer.id().clone(), service_key.to_string());
        }

        debug!(timer_id = %timer.id(), %task_id, %execute_at, "Timer task scheduled");
        self.wake.notify_one();
        task_id
    }

    /// Drop every pending task of a timer; returns how many were removed
    pub fn retract(&self, timer_id: &TimerId) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, task| &task.timer_id != timer_id);
        self.scheduled_timers.lock().remove(timer_id);
        before - tasks.len()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Pending tasks in firing order
    pub fn tasks(&self) -> Vec<TimerTask> {
        self.tasks.lock().values().cloned().collect()
    }

    pub fn is_scheduled(&self, timer_id: &TimerId) -> bool {
        self.scheduled_timers.lock().contains_key(timer_id)
    }

    /// Earliest pending firing
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.lock().keys().next().map(|(at, _)| *at)
    }

    fn resolve(&self, task: &TimerTask) -> Option<(Arc<TimerService>, Arc<Timer>)> {
        let key = self.scheduled_timers.lock().get(&task.timer_id).cloned()?;
        let service = self.service(&key)?;
        let timer = service.timer(&task.timer_id)?;
        Some((service, timer))
    }

    fn complete(&self, key: &TaskKey, timer_id: &TimerId) {
        let mut tasks = self.tasks.lock();
        tasks.remove(key);
        if !tasks.values().any(|task| &task.timer_id == timer_id) {
            self.scheduled_timers.lock().remove(timer_id);
        }
    }

    /// Fire every task that is due; returns how many timeouts ran.
    ///
    /// Each timeout is awaited before the next one starts. Tasks retracted by
    /// an earlier callback in the same tick are skipped.
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        let due: Vec<(TaskKey, TimerTask)> = self
            .tasks
            .lock()
            .range(..=(now, TaskId::MAX))
            .map(|(key, task)| (*key, task.clone()))
            .collect();

        let mut fired = 0;
        for (key, task) in due {
            let pending = self.tasks.lock().contains_key(&key);
            if !pending {
                continue;
            }

            match self.resolve(&task) {
                Some((service, timer)) => {
                    service.handle_timeout(timer).await;
                    fired += 1;
                }
                None => {
                    error!(
                        timer_id = %task.timer_id,
                        task_id = %task.task_id,
                        "Timer task has no live service or timer, dropping it"
                    );
                }
            }

            self.complete(&key, &task.timer_id);
        }
        fired
    }

    /// Spawn the executor loop
    pub fn start(self: &Arc<Self>) -> ExecutorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let executor = Arc::clone(self);
        let join_handle = tokio::spawn(async move { executor.run(shutdown_rx).await });

        ExecutorHandle {
            shutdown_tx,
            join_handle,
        }
    }

    #[instrument(skip_all)]
    async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        self.running.store(true, Ordering::Release);
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Timer executor started");

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                break;
            }

            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = self.wake.notified() => {}
                _ = &mut shutdown_rx => break,
            }
        }

        self.running.store(false, Ordering::Release);
        info!("Timer executor stopped");
    }
}

/// Handle for stopping a running executor loop
pub struct ExecutorHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ExecutorHandle {
    pub async fn shutdown(self) -> TimerResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| TimerError::ExecutorStop(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Recurrence, TimerState};
    use chrono::Duration as ChronoDuration;
    use tracing_test::traced_test;

    fn orphan_timer(at: DateTime<Utc>) -> Timer {
        Timer::new(
            "Orphan".into(),
            false,
            at,
            Some(at),
            Recurrence::Once,
            serde_json::Value::Null,
            false,
            None,
            Weak::new(),
        )
    }

    #[test]
    fn tasks_are_ordered_by_due_time() {
        let executor = TimerServiceExecutor::default();
        let later = orphan_timer(Utc::now() + ChronoDuration::hours(2));
        let sooner = orphan_timer(Utc::now() + ChronoDuration::hours(1));

        executor.schedule("Orphan", &later);
        executor.schedule("Orphan", &sooner);

        let order: Vec<TimerId> = executor.tasks().into_iter().map(|t| t.timer_id).collect();
        assert_eq!(order, vec![sooner.id().clone(), later.id().clone()]);
        assert_eq!(executor.next_due(), sooner.next_expiration());
    }

    #[test]
    fn overdue_timer_is_scheduled_for_now() {
        let executor = TimerServiceExecutor::default();
        let overdue = orphan_timer(Utc::now() - ChronoDuration::seconds(30));
        let before = Utc::now();

        executor.schedule("Orphan", &overdue);
        assert!(executor.tasks()[0].execute_at >= before);
    }

    #[test]
    fn retract_removes_every_task_of_a_timer() {
        let executor = TimerServiceExecutor::default();
        let timer = orphan_timer(Utc::now() + ChronoDuration::minutes(5));
        let other = orphan_timer(Utc::now() + ChronoDuration::minutes(5));

        executor.schedule("Orphan", &timer);
        executor.schedule("Orphan", &timer);
        executor.schedule("Orphan", &other);

        assert_eq!(executor.retract(timer.id()), 2);
        assert!(!executor.is_scheduled(timer.id()));
        assert!(executor.is_scheduled(other.id()));
        assert_eq!(executor.pending_tasks(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn unresolvable_tasks_are_dropped() {
        let executor = TimerServiceExecutor::default();
        let timer = orphan_timer(Utc::now() - ChronoDuration::seconds(1));
        let future = orphan_timer(Utc::now() + ChronoDuration::hours(1));
        executor.schedule("Orphan", &timer);
        executor.schedule("Orphan", &future);

        assert_eq!(executor.tick().await, 0);
        assert_eq!(executor.pending_tasks(), 1);
        assert!(!executor.is_scheduled(timer.id()));
        assert!(executor.is_scheduled(future.id()));
        assert_eq!(timer.state(), TimerState::Created);
        assert!(logs_contain("no live service"));
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let executor = Arc::new(TimerServiceExecutor::new(Duration::from_millis(5)));
        let handle = executor.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.is_running());

        handle.shutdown().await.unwrap();
        assert!(!executor.is_running());
    }
}
