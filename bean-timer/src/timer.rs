use std::sync::Weak;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{CalendarExpression, ScheduleExpression, TimerId, TimerService, TimerState};

/// How a timer repeats
#[derive(Debug, Clone)]
pub enum Recurrence {
    /// Fires once
    Once,
    /// Fires every `interval` after the initial expiration
    Interval(Duration),
    /// Fires whenever the calendar schedule matches
    Calendar {
        schedule: ScheduleExpression,
        expression: CalendarExpression,
    },
}

#[derive(Debug)]
struct TimerRuntime {
    state: TimerState,
    next_expiration: Option<DateTime<Utc>>,
    previous_run: Option<DateTime<Utc>>,
}

/// A timer owned by one timer service.
///
/// Immutable configuration lives on the struct; the state and expirations
/// change as the executor fires it and sit behind a lock.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    timed_object_id: String,
    persistent: bool,
    initial_expiration: DateTime<Utc>,
    recurrence: Recurrence,
    info: serde_json::Value,
    auto_timer: bool,
    timeout_method: Option<String>,
    runtime: RwLock<TimerRuntime>,
    service: Weak<TimerService>,
}

impl Timer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        timed_object_id: String,
        persistent: bool,
        initial_expiration: DateTime<Utc>,
        next_expiration: Option<DateTime<Utc>>,
        recurrence: Recurrence,
        info: serde_json::Value,
        auto_timer: bool,
        timeout_method: Option<String>,
        service: Weak<TimerService>,
    ) -> Self {
        let state = if next_expiration.is_some() {
            TimerState::Created
        } else {
            TimerState::Expired
        };

        Self {
            id: TimerId::new(),
            timed_object_id,
            persistent,
            initial_expiration,
            recurrence,
            info,
            auto_timer,
            timeout_method,
            runtime: RwLock::new(TimerRuntime {
                state,
                next_expiration,
                previous_run: None,
            }),
            service,
        }
    }

    pub fn id(&self) -> &TimerId {
        &self.id
    }

    /// Primary key of the timed object that owns this timer
    pub fn timed_object_id(&self) -> &str {
        &self.timed_object_id
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Opaque data the bean attached at creation
    pub fn info(&self) -> &serde_json::Value {
        &self.info
    }

    pub fn initial_expiration(&self) -> DateTime<Utc> {
        self.initial_expiration
    }

    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    /// Interval between firings, `None` for single-action and calendar timers
    pub fn interval(&self) -> Option<Duration> {
        match &self.recurrence {
            Recurrence::Interval(interval) => Some(*interval),
            _ => None,
        }
    }

    pub fn is_calendar_timer(&self) -> bool {
        matches!(self.recurrence, Recurrence::Calendar { .. })
    }

    /// Calendar schedule of a calendar timer
    pub fn schedule(&self) -> Option<&ScheduleExpression> {
        match &self.recurrence {
            Recurrence::Calendar { schedule, .. } => Some(schedule),
            _ => None,
        }
    }

    pub fn is_auto_timer(&self) -> bool {
        self.auto_timer
    }

    pub fn timeout_method(&self) -> Option<&str> {
        self.timeout_method.as_deref()
    }

    pub fn state(&self) -> TimerState {
        self.runtime.read().state
    }

    pub fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.runtime.read().next_expiration
    }

    /// Next time the timer fires; same as [`Timer::next_expiration`]
    pub fn next_timeout(&self) -> Option<DateTime<Utc>> {
        self.next_expiration()
    }

    /// When the last timeout callback started
    pub fn previous_run(&self) -> Option<DateTime<Utc>> {
        self.runtime.read().previous_run
    }

    /// Time until the next expiration, zero when it is already due
    pub fn time_remaining(&self) -> Option<StdDuration> {
        self.next_expiration()
            .map(|next| (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO))
    }

    pub fn is_in_retry(&self) -> bool {
        self.state() == TimerState::RetryTimeout
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TimerState::Canceled
    }

    pub fn is_expired(&self) -> bool {
        self.state() == TimerState::Expired
    }

    /// Whether the timer will still fire: its service is started, it is
    /// neither canceled nor expired, and it is either queued on the executor
    /// or freshly created.
    pub fn is_active(&self) -> bool {
        let Some(service) = self.service.upgrade() else {
            return false;
        };
        let state = self.state();
        service.is_started()
            && !state.is_final()
            && (service.executor().is_scheduled(&self.id) || state == TimerState::Created)
    }

    /// Cancel the timer. It stays known to its service but never fires again;
    /// pending executor tasks are retracted.
    pub fn cancel(&self) {
        {
            let mut runtime = self.runtime.write();
            if runtime.state == TimerState::Canceled {
                return;
            }
            runtime.state = TimerState::Canceled;
        }

        if let Some(service) = self.service.upgrade() {
            let retracted = service.executor().retract(&self.id);
            debug!(timer_id = %self.id, retracted, "Pending timer tasks retracted");
        }
        info!(timer_id = %self.id, timed_object = %self.timed_object_id, "Timer canceled");
    }

    /// Move to `next` unless the timer already reached a final state
    pub(crate) fn set_state(&self, next: TimerState) -> bool {
        let mut runtime = self.runtime.write();
        if runtime.state.is_final() {
            return false;
        }
        runtime.state = next;
        true
    }

    pub(crate) fn record_run(&self, at: DateTime<Utc>) {
        self.runtime.write().previous_run = Some(at);
    }

    pub(crate) fn set_next_expiration(&self, next: Option<DateTime<Utc>>) {
        self.runtime.write().next_expiration = next;
    }

    /// Expiration following `fired`: nothing for single-action timers,
    /// `fired + interval` for interval timers even when that is already
    /// past, the next calendar match after `fired` otherwise.
    pub(crate) fn following_expiration(&self, fired: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.recurrence {
            Recurrence::Once => None,
            Recurrence::Interval(interval) => Some(fired + *interval),
            Recurrence::Calendar { expression, .. } => expression.next_run_date(fired),
        }
    }
}
