use std::sync::Weak;

use chrono::{DateTime, Duration, Utc};

use crate::{
    CalendarExpression, Recurrence, ScheduleExpression, Timer, TimerError, TimerResult,
    TimerService,
};

/// Longest delay or interval a timer accepts
const MAX_SPAN_DAYS: i64 = 36_500;

fn clamp(span: std::time::Duration) -> Duration {
    Duration::from_std(span)
        .unwrap_or_else(|_| Duration::days(MAX_SPAN_DAYS))
        .min(Duration::days(MAX_SPAN_DAYS))
}

/// Builder for timers; the timer service fills in the owner when it
/// registers the result.
#[derive(Debug, Clone, Default)]
pub struct TimerBuilder {
    initial_expiration: Option<DateTime<Utc>>,
    interval: Option<Duration>,
    schedule: Option<ScheduleExpression>,
    info: serde_json::Value,
    persistent: bool,
    timeout_method: Option<String>,
}

impl TimerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// First expiration of a single-action or interval timer
    pub fn initial_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.initial_expiration = Some(at);
        self
    }

    /// First expiration relative to now
    pub fn initial_delay(self, delay: std::time::Duration) -> Self {
        self.initial_expiration(Utc::now() + clamp(delay))
    }

    pub fn interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = Some(clamp(interval));
        self
    }

    pub fn schedule(mut self, schedule: ScheduleExpression) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn info(mut self, info: serde_json::Value) -> Self {
        self.info = info;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Method invoked on expiry; marks the timer as an auto-timer
    pub fn timeout_method(mut self, method: impl Into<String>) -> Self {
        self.timeout_method = Some(method.into());
        self
    }

    pub(crate) fn build(self, timed_object_id: &str, service: Weak<TimerService>) -> TimerResult<Timer> {
        let now = Utc::now();
        let auto_timer = self.timeout_method.is_some();

        let (initial, next, recurrence) = match (self.schedule, self.interval) {
            (Some(schedule), _) => {
                let expression = CalendarExpression::parse(&schedule)?;
                let first = expression.next_run_date(now);
                (first.unwrap_or(now), first, Recurrence::Calendar { schedule, expression })
            }
            (None, Some(interval)) => {
                if interval <= Duration::zero() {
                    return Err(TimerError::InvalidInterval);
                }
                let first = self.initial_expiration.unwrap_or(now);
                (first, Some(first), Recurrence::Interval(interval))
            }
            (None, None) => {
                let first = self.initial_expiration.unwrap_or(now);
                (first, Some(first), Recurrence::Once)
            }
        };

        Ok(Timer::new(
            timed_object_id.to_string(),
            self.persistent,
            initial,
            next,
            recurrence,
            self.info,
            auto_timer,
            self.timeout_method,
            service,
        ))
    }
}
