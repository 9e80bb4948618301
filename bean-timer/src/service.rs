use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    ScheduleExpression, TaskId, TimedObjectInvoker, Timer, TimerBuilder, TimerConfig, TimerId,
    TimerResult, TimerServiceExecutor, TimerState,
};

/// Timer service of one timed object.
///
/// Owns every timer the object created and hands due timers to its invoker.
pub struct TimerService {
    primary_key: String,
    invoker: Arc<TimedObjectInvoker>,
    executor: Arc<TimerServiceExecutor>,
    config: TimerConfig,
    timers: RwLock<HashMap<TimerId, Arc<Timer>>>,
    started: AtomicBool,
    auto_timers_created: AtomicBool,
    this: Weak<TimerService>,
}

impl TimerService {
    /// Create a service and register it with the executor
    pub fn new(
        invoker: Arc<TimedObjectInvoker>,
        executor: Arc<TimerServiceExecutor>,
        config: TimerConfig,
    ) -> Arc<Self> {
        let service = Arc::new_cyclic(|this| Self {
            primary_key: invoker.bean_type().to_string(),
            invoker,
            executor: Arc::clone(&executor),
            config,
            timers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            auto_timers_created: AtomicBool::new(false),
            this: this.clone(),
        });
        executor.register_service(&service);
        service
    }

    /// Id of the timed object this service belongs to
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn invoker(&self) -> &Arc<TimedObjectInvoker> {
        &self.invoker
    }

    pub fn executor(&self) -> &Arc<TimerServiceExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Build, register and schedule a timer
    pub fn create_timer(&self, builder: TimerBuilder) -> TimerResult<Arc<Timer>> {
        let timer = Arc::new(builder.build(&self.primary_key, self.this.clone())?);
        self.timers.write().insert(timer.id().clone(), Arc::clone(&timer));

        debug!(
            timer_id = %timer.id(),
            timed_object = %self.primary_key,
            next = ?timer.next_expiration(),
            calendar = timer.is_calendar_timer(),
            "Timer created"
        );
        self.schedule_timeout(&timer, true);
        Ok(timer)
    }

    /// Timer that fires once after `delay`
    pub fn create_single_action_timer(
        &self,
        delay: Duration,
        info: serde_json::Value,
        persistent: bool,
    ) -> TimerResult<Arc<Timer>> {
        self.create_timer(
            TimerBuilder::new()
                .initial_delay(delay)
                .info(info)
                .persistent(persistent),
        )
    }

    /// Timer that fires once at `expiration`
    pub fn create_single_action_timer_at(
        &self,
        expiration: DateTime<Utc>,
        info: serde_json::Value,
        persistent: bool,
    ) -> TimerResult<Arc<Timer>> {
        self.create_timer(
            TimerBuilder::new()
                .initial_expiration(expiration)
                .info(info)
                .persistent(persistent),
        )
    }

    /// Timer that fires after `initial_delay`, then every `interval`
    pub fn create_interval_timer(
        &self,
        initial_delay: Duration,
        interval: Duration,
        info: serde_json::Value,
        persistent: bool,
    ) -> TimerResult<Arc<Timer>> {
        self.create_timer(
            TimerBuilder::new()
                .initial_delay(initial_delay)
                .interval(interval)
                .info(info)
                .persistent(persistent),
        )
    }

    /// Timer driven by a calendar schedule. Naming a timeout method makes it
    /// an auto-timer.
    pub fn create_calendar_timer(
        &self,
        schedule: ScheduleExpression,
        info: serde_json::Value,
        persistent: bool,
        timeout_method: Option<&str>,
    ) -> TimerResult<Arc<Timer>> {
        let mut builder = TimerBuilder::new()
            .schedule(schedule)
            .info(info)
            .persistent(persistent);
        if let Some(method) = timeout_method {
            builder = builder.timeout_method(method);
        }
        self.create_timer(builder)
    }

    /// Queue the timer's next expiration on the executor.
    ///
    /// Existing timers that were removed or canceled are skipped, as is any
    /// timer without a next expiration.
    pub fn schedule_timeout(&self, timer: &Timer, is_new_timer: bool) -> Option<TaskId> {
        if !is_new_timer && (!self.timers.read().contains_key(timer.id()) || timer.is_canceled()) {
            return None;
        }
        timer.next_expiration()?;
        Some(self.executor.schedule(&self.primary_key, timer))
    }

    pub fn timer(&self, id: &TimerId) -> Option<Arc<Timer>> {
        self.timers.read().get(id).cloned()
    }

    /// Timers that will still fire
    pub fn timers(&self) -> Vec<Arc<Timer>> {
        self.timers
            .read()
            .values()
            .filter(|timer| timer.is_active())
            .cloned()
            .collect()
    }

    /// Every timer ever created here, canceled and expired ones included
    pub fn all_timers(&self) -> Vec<Arc<Timer>> {
        self.timers.read().values().cloned().collect()
    }

    /// Start accepting timeouts. The first start also creates one auto-timer
    /// per scheduled method; later starts only requeue dormant timers.
    pub fn start(&self) -> TimerResult<()> {
        self.invoker.start()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if !self.auto_timers_created.swap(true, Ordering::AcqRel) {
            for scheduled in &self.invoker.descriptor().scheduled_methods {
                self.create_calendar_timer(
                    scheduled.schedule.clone(),
                    scheduled.info.clone(),
                    scheduled.persistent,
                    Some(&scheduled.method),
                )?;
            }
        }

        let dormant: Vec<Arc<Timer>> = self
            .timers
            .read()
            .values()
            .filter(|timer| !timer.state().is_final() && !self.executor.is_scheduled(timer.id()))
            .cloned()
            .collect();
        for timer in &dormant {
            self.schedule_timeout(timer, false);
        }

        info!(
            timed_object = %self.primary_key,
            timers = self.timers.read().len(),
            requeued = dormant.len(),
            "Timer service started"
        );
        Ok(())
    }

    /// Stop accepting timeouts; pending tasks are retracted until the next start
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        let ids: Vec<TimerId> = self.timers.read().keys().cloned().collect();
        let retracted: usize = ids.iter().map(|id| self.executor.retract(id)).sum();
        info!(timed_object = %self.primary_key, retracted, "Timer service stopped");
    }

    /// Run the timeout of a due timer, retrying failed callbacks, then
    /// advance and requeue it
    pub async fn handle_timeout(&self, timer: Arc<Timer>) {
        let timer_id = timer.id().clone();
        if !self.is_started() {
            debug!(%timer_id, "Timer service stopped, timeout skipped");
            return;
        }
        if timer.state().is_final() {
            debug!(%timer_id, state = %timer.state(), "Timer no longer fires");
            return;
        }
        let Some(fired) = timer.next_expiration() else {
            return;
        };

        timer.set_state(TimerState::InTimeout);
        timer.record_run(Utc::now());

        let mut retries = 0;
        loop {
            match self.invoker.call_timeout(&timer, None).await {
                Ok(()) => break,
                Err(err) if retries < self.config.retry_attempts && !timer.is_canceled() => {
                    retries += 1;
                    timer.set_state(TimerState::RetryTimeout);
                    warn!(%timer_id, attempt = retries, "Retrying failed timeout: {:#}", err);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(err) => {
                    error!(%timer_id, retries, "Timeout failed, giving up on this expiration: {:#}", err);
                    break;
                }
            }
        }

        if timer.is_canceled() {
            debug!(%timer_id, "Timer canceled during its timeout");
            return;
        }

        let next = timer.following_expiration(fired);
        timer.set_next_expiration(next);
        match next {
            Some(next) => {
                timer.set_state(TimerState::Active);
                self.schedule_timeout(&timer, false);
                debug!(%timer_id, %next, "Timer requeued");
            }
            None => {
                timer.set_state(TimerState::Expired);
                debug!(%timer_id, "Timer expired");
            }
        }
    }
}
