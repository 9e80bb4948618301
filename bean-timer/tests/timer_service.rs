use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bean_core::{BeanRegistry, BeanResult, InvocationContext};
use bean_timer::{
    ScheduleExpression, ScheduledMethod, TimedObject, TimedObjectDescriptor, Timer, TimerBuilder,
    TimerConfig, TimerError, TimerServiceRegistry, TimerState,
};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;

/// Records every callback; fails the first `failures` of them
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, TimerState)>>,
    failures: AtomicUsize,
    always_fail: bool,
    cancel_on_timeout: bool,
}

impl Recorder {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TimedObject for Recorder {
    async fn timeout(&self, method: &str, timer: &Timer, _ctx: &InvocationContext) -> BeanResult<()> {
        self.calls.lock().push((method.to_string(), timer.state()));
        if self.cancel_on_timeout {
            timer.cancel();
        }
        if self.always_fail {
            anyhow::bail!("report backend unavailable");
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("transient failure");
        }
        Ok(())
    }
}

fn config() -> TimerConfig {
    TimerConfig::default()
        .with_retry_delay(Duration::from_millis(10))
        .with_tick_interval(Duration::from_millis(10))
}

fn registry_with(bean: Arc<Recorder>, descriptor: TimedObjectDescriptor) -> TimerServiceRegistry {
    let beans: BeanRegistry<dyn TimedObject> = BeanRegistry::new();
    beans.register(descriptor.bean_type.clone(), bean);
    let registry = TimerServiceRegistry::new(config(), Arc::new(beans));
    registry.register(descriptor);
    registry
}

#[tokio::test]
async fn single_action_timer_fires_exactly_once() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let due = Utc::now() - ChronoDuration::milliseconds(1);
    let timer = service
        .create_single_action_timer_at(due, serde_json::json!("once"), false)
        .unwrap();
    assert!(timer.is_active());
    assert_eq!(timer.state(), TimerState::Created);
    assert_eq!(timer.next_expiration(), Some(due));

    let executor = registry.executor();
    assert_eq!(executor.tick().await, 1);
    assert_eq!(executor.tick().await, 0);

    assert_eq!(bean.count(), 1);
    assert_eq!(timer.state(), TimerState::Expired);
    assert_eq!(timer.next_expiration(), None);
    assert!(timer.previous_run().is_some());
    assert!(!timer.is_active());
    assert_eq!(executor.pending_tasks(), 0);
    assert!(service.timers().is_empty());
    assert_eq!(service.all_timers().len(), 1);
}

#[tokio::test]
async fn delayed_timer_waits_for_its_delay() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let before = Utc::now();
    let timer = service
        .create_single_action_timer(Duration::from_secs(3600), serde_json::Value::Null, false)
        .unwrap();
    let next = timer.next_expiration().unwrap();
    assert!(next >= before + ChronoDuration::hours(1));
    assert!(next <= Utc::now() + ChronoDuration::hours(1));

    assert_eq!(registry.executor().tick().await, 0);
    assert_eq!(bean.count(), 0);
    assert_eq!(registry.executor().pending_tasks(), 1);
}

#[tokio::test]
async fn interval_timer_catches_up_without_skipping() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let first = Utc::now() - ChronoDuration::milliseconds(3500);
    let timer = service
        .create_timer(
            TimerBuilder::new()
                .initial_expiration(first)
                .interval(Duration::from_secs(1)),
        )
        .unwrap();

    let executor = registry.executor();
    for n in 1..=3 {
        assert_eq!(executor.tick().await, 1);
        assert_eq!(timer.next_expiration(), Some(first + ChronoDuration::seconds(n)));
    }
    assert_eq!(bean.count(), 3);
    assert_eq!(timer.state(), TimerState::Active);
    assert_eq!(timer.interval(), Some(ChronoDuration::seconds(1)));
    assert!(timer.is_active());
}

#[tokio::test]
async fn cancel_retracts_pending_tasks() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let timer = service
        .create_interval_timer(
            Duration::from_secs(3600),
            Duration::from_secs(60),
            serde_json::Value::Null,
            true,
        )
        .unwrap();
    assert_eq!(registry.executor().pending_tasks(), 1);
    assert!(timer.is_persistent());

    timer.cancel();
    assert_eq!(timer.state(), TimerState::Canceled);
    assert_eq!(registry.executor().pending_tasks(), 0);
    assert!(!registry.executor().is_scheduled(timer.id()));
    assert!(!timer.is_active());

    // canceled timers stay known to the service
    assert!(service.timer(timer.id()).is_some());
    assert!(service.timers().is_empty());
    assert_eq!(service.schedule_timeout(&timer, false), None);
}

#[tokio::test]
async fn timer_canceled_in_its_callback_is_not_requeued() {
    let bean = Arc::new(Recorder {
        cancel_on_timeout: true,
        ..Recorder::default()
    });
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let timer = service
        .create_interval_timer(Duration::ZERO, Duration::from_secs(60), serde_json::Value::Null, false)
        .unwrap();

    assert_eq!(registry.executor().tick().await, 1);
    assert_eq!(timer.state(), TimerState::Canceled);
    assert_eq!(registry.executor().pending_tasks(), 0);
    assert_eq!(bean.count(), 1);
}

#[tokio::test]
async fn failed_timeout_is_retried_once() {
    let bean = Arc::new(Recorder::failing(1));
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let timer = service
        .create_single_action_timer(Duration::ZERO, serde_json::Value::Null, false)
        .unwrap();
    registry.executor().tick().await;

    let calls = bean.calls.lock().clone();
    let states: Vec<TimerState> = calls.iter().map(|(_, state)| *state).collect();
    assert_eq!(states, vec![TimerState::InTimeout, TimerState::RetryTimeout]);
    assert_eq!(timer.state(), TimerState::Expired);
}

#[tokio::test]
async fn persistent_failure_does_not_cancel_the_timer() {
    let bean = Arc::new(Recorder {
        always_fail: true,
        ..Recorder::default()
    });
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    let timer = service
        .create_interval_timer(Duration::ZERO, Duration::from_secs(60), serde_json::Value::Null, false)
        .unwrap();
    registry.executor().tick().await;

    assert_eq!(bean.count(), 2);
    assert_eq!(timer.state(), TimerState::Active);
    assert!(registry.executor().is_scheduled(timer.id()));
    assert!(timer.is_active());
}

#[tokio::test]
async fn auto_timers_are_created_once() {
    let bean = Arc::new(Recorder::default());
    let descriptor = TimedObjectDescriptor::new("Reports").with_scheduled_method(
        ScheduledMethod::new("nightly", ScheduleExpression::parse("0 0 12 * * *").unwrap())
            .with_info(serde_json::json!({"kind": "summary"})),
    );
    let registry = registry_with(bean, descriptor);
    let service = registry.lookup("Reports").unwrap();

    service.start().unwrap();
    service.start().unwrap();
    service.stop();
    assert!(service.timers().is_empty());
    assert_eq!(registry.executor().pending_tasks(), 0);
    service.start().unwrap();

    let timers = service.all_timers();
    assert_eq!(timers.len(), 1);
    let auto = &timers[0];
    assert!(auto.is_auto_timer());
    assert!(auto.is_calendar_timer());
    assert_eq!(auto.timeout_method(), Some("nightly"));
    assert_eq!(auto.info()["kind"], "summary");
    assert!(auto.is_active());
    assert_eq!(registry.executor().pending_tasks(), 1);
}

#[tokio::test]
async fn calendar_timer_targets_next_noon() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean, TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();

    let now = Utc::now();
    let timer = service
        .create_calendar_timer(
            ScheduleExpression::parse("0 0 12 * * *").unwrap(),
            serde_json::Value::Null,
            false,
            None,
        )
        .unwrap();

    let next = timer.next_expiration().unwrap();
    assert!(next > now);
    assert!(next - now <= ChronoDuration::days(1));
    assert_eq!((next.hour(), next.minute(), next.second()), (12, 0, 0));
    assert!(!timer.is_auto_timer());
    assert_eq!(timer.schedule().unwrap().to_cron(), "0 0 12 * * * *");

    // the service has not started yet
    assert!(!timer.is_active());
}

#[tokio::test]
async fn bad_timer_requests_fail_fast() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean, TimedObjectDescriptor::new("Reports"));
    let service = registry.lookup("Reports").unwrap();

    let err = service
        .create_calendar_timer(
            ScheduleExpression::parse("0 0 25 * * *").unwrap(),
            serde_json::Value::Null,
            false,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, TimerError::InvalidSchedule { field, .. } if field == "hour"));

    let err = service
        .create_interval_timer(Duration::from_secs(1), Duration::ZERO, serde_json::Value::Null, false)
        .unwrap_err();
    assert_eq!(err, TimerError::InvalidInterval);
    assert!(service.all_timers().is_empty());

    assert!(matches!(registry.lookup("Nobody"), Err(TimerError::ServiceNotFound(_))));
}

#[tokio::test]
async fn timeout_method_resolution() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(
        bean.clone(),
        TimedObjectDescriptor::new("Reports").with_timeout_method("onTimeout"),
    );
    let service = registry.lookup("Reports").unwrap();
    service.start().unwrap();

    service
        .create_single_action_timer(Duration::ZERO, serde_json::Value::Null, false)
        .unwrap();
    registry.executor().tick().await;

    let plain = TimerServiceRegistry::new(config(), {
        let beans: BeanRegistry<dyn TimedObject> = BeanRegistry::new();
        beans.register("Plain", bean.clone());
        Arc::new(beans)
    });
    let plain_service = plain.register(TimedObjectDescriptor::new("Plain"));
    plain_service.start().unwrap();
    plain_service
        .create_single_action_timer(Duration::ZERO, serde_json::Value::Null, false)
        .unwrap();
    plain.executor().tick().await;

    let methods: Vec<String> = bean.calls.lock().iter().map(|(m, _)| m.clone()).collect();
    assert_eq!(methods, vec!["onTimeout".to_string(), "timeout".to_string()]);
}

#[tokio::test]
async fn invalid_descriptor_blocks_start() {
    let bean = Arc::new(Recorder::default());
    let descriptor = TimedObjectDescriptor::new("Reports").with_scheduled_method(ScheduledMethod::new(
        "broken",
        ScheduleExpression::new().month("13"),
    ));
    let registry = registry_with(bean, descriptor);

    assert!(matches!(registry.start(), Err(TimerError::InvalidSchedule { field, .. }) if field == "month"));
    assert!(!registry.lookup("Reports").unwrap().is_started());
}

#[tokio::test]
async fn executor_loop_fires_due_timers() {
    let bean = Arc::new(Recorder::default());
    let registry = registry_with(bean.clone(), TimedObjectDescriptor::new("Reports"));
    registry.start().unwrap();

    let service = registry.lookup("Reports").unwrap();
    service
        .create_single_action_timer(Duration::from_millis(20), serde_json::Value::Null, false)
        .unwrap();

    for _ in 0..200 {
        if bean.count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(bean.count(), 1);
    assert!(registry.executor().is_running());

    registry.stop().await.unwrap();
    assert!(!registry.executor().is_running());
    assert!(!service.is_started());
}

/// Panics inside every callback
struct Exploding;

#[async_trait]
impl TimedObject for Exploding {
    async fn timeout(&self, _method: &str, _timer: &Timer, _ctx: &InvocationContext) -> BeanResult<()> {
        panic!("report renderer crashed");
    }
}

#[tokio::test]
async fn panicking_callback_does_not_stop_the_executor() {
    let recorder = Arc::new(Recorder::default());
    let exploding = Arc::new(Exploding);
    let beans: BeanRegistry<dyn TimedObject> = BeanRegistry::new();
    beans.register("Exploding", exploding.clone());
    beans.register("Reports", recorder.clone());

    let registry = TimerServiceRegistry::new(config(), Arc::new(beans));
    registry.register_all(vec![
        TimedObjectDescriptor::new("Exploding"),
        TimedObjectDescriptor::new("Reports"),
    ]);
    registry.start().unwrap();

    let broken = registry
        .lookup("Exploding")
        .unwrap()
        .create_interval_timer(Duration::ZERO, Duration::from_secs(60), serde_json::Value::Null, false)
        .unwrap();

    for _ in 0..200 {
        if broken.previous_run().is_some() && broken.state() == TimerState::Active {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broken.state(), TimerState::Active);
    assert!(registry.executor().is_scheduled(broken.id()));

    registry
        .lookup("Reports")
        .unwrap()
        .create_single_action_timer(Duration::ZERO, serde_json::Value::Null, false)
        .unwrap();
    for _ in 0..200 {
        if recorder.count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(recorder.count(), 1);
    assert!(registry.executor().is_running());

    // only the interval timer's next firing is left
    for _ in 0..200 {
        if registry.executor().pending_tasks() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.executor().pending_tasks(), 1);
    registry.stop().await.unwrap();
}
