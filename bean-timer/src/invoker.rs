use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bean_core::{BeanError, BeanLocator, BeanResult, InvocationContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{CalendarExpression, ScheduleExpression, Timer, TimerError, TimerResult};

/// Method called when no timer or descriptor names one
pub const DEFAULT_TIMEOUT_METHOD: &str = "timeout";

/// Trait implemented by beans that receive timer callbacks
#[async_trait]
pub trait TimedObject: Send + Sync {
    /// Run `method` for an expired timer; an error triggers a retry
    async fn timeout(&self, method: &str, timer: &Timer, ctx: &InvocationContext) -> BeanResult<()>;
}

/// Bean lookup used to resolve timed objects
pub type TimedObjectLocator = dyn BeanLocator<dyn TimedObject>;

/// A method that runs on a calendar schedule without the bean creating a
/// timer itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMethod {
    pub method: String,
    pub schedule: ScheduleExpression,
    #[serde(default)]
    pub info: serde_json::Value,
    #[serde(default)]
    pub persistent: bool,
}

impl ScheduledMethod {
    pub fn new(method: impl Into<String>, schedule: ScheduleExpression) -> Self {
        Self {
            method: method.into(),
            schedule,
            info: serde_json::Value::Null,
            persistent: false,
        }
    }

    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.info = info;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

/// Timer metadata of one timed-object type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedObjectDescriptor {
    pub bean_type: String,
    /// Method invoked for timers that do not name their own
    #[serde(default)]
    pub timeout_method: Option<String>,
    #[serde(default)]
    pub scheduled_methods: Vec<ScheduledMethod>,
}

impl TimedObjectDescriptor {
    pub fn new(bean_type: impl Into<String>) -> Self {
        Self {
            bean_type: bean_type.into(),
            timeout_method: None,
            scheduled_methods: Vec::new(),
        }
    }

    pub fn with_timeout_method(mut self, method: impl Into<String>) -> Self {
        self.timeout_method = Some(method.into());
        self
    }

    pub fn with_scheduled_method(mut self, method: ScheduledMethod) -> Self {
        self.scheduled_methods.push(method);
        self
    }
}

/// Calls timeout methods on the bean instance behind a descriptor
pub struct TimedObjectInvoker {
    descriptor: TimedObjectDescriptor,
    locator: Arc<TimedObjectLocator>,
    started: AtomicBool,
}

impl TimedObjectInvoker {
    pub fn new(descriptor: TimedObjectDescriptor, locator: Arc<TimedObjectLocator>) -> Self {
        Self {
            descriptor,
            locator,
            started: AtomicBool::new(false),
        }
    }

    pub fn bean_type(&self) -> &str {
        &self.descriptor.bean_type
    }

    pub fn descriptor(&self) -> &TimedObjectDescriptor {
        &self.descriptor
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Validate the descriptor; later calls are no-ops
    pub fn start(&self) -> TimerResult<()> {
        if self.is_started() {
            return Ok(());
        }

        let invalid = |reason: String| TimerError::InvalidDescriptor {
            bean_type: self.descriptor.bean_type.clone(),
            reason,
        };

        if self.descriptor.bean_type.trim().is_empty() {
            return Err(invalid("bean type is empty".into()));
        }
        if matches!(&self.descriptor.timeout_method, Some(m) if m.trim().is_empty()) {
            return Err(invalid("timeout method name is empty".into()));
        }
        for scheduled in &self.descriptor.scheduled_methods {
            if scheduled.method.trim().is_empty() {
                return Err(invalid("scheduled method name is empty".into()));
            }
            CalendarExpression::parse(&scheduled.schedule)?;
        }

        self.started.store(true, Ordering::Release);
        info!(
            bean_type = %self.descriptor.bean_type,
            timeout_method = self.descriptor.timeout_method.as_deref().unwrap_or(DEFAULT_TIMEOUT_METHOD),
            scheduled_methods = self.descriptor.scheduled_methods.len(),
            "Timed object ready"
        );
        Ok(())
    }

    /// Method a timeout of `timer` resolves to when none is given explicitly
    pub fn resolve_method<'a>(&'a self, timer: &'a Timer, method: Option<&'a str>) -> &'a str {
        method
            .or_else(|| timer.timeout_method())
            .or(self.descriptor.timeout_method.as_deref())
            .unwrap_or(DEFAULT_TIMEOUT_METHOD)
    }

    /// Resolve the bean and run the timeout method on its own task; errors
    /// and panics are logged here and handed back to the timer service
    pub async fn call_timeout(&self, timer: &Arc<Timer>, method: Option<&str>) -> BeanResult<()> {
        let method = self.resolve_method(timer, method).to_string();
        let ctx = InvocationContext::detached();
        let bean_type = &self.descriptor.bean_type;

        let bean = self.locator.lookup(bean_type, &ctx).map_err(|err| {
            error!(timer_id = %timer.id(), %bean_type, "Timed object lookup failed: {:#}", err);
            err
        })?;

        let call = {
            let timer = Arc::clone(timer);
            let method = method.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { bean.timeout(&method, &timer, &ctx).await })
        };

        let outcome = match call.await {
            Ok(result) => result,
            Err(join_err) => Err(BeanError::general_error(format!("timeout method '{}' did not complete", method))
                .with_source(join_err.into())
                .into_anyhow()),
        };

        match outcome {
            Ok(()) => {
                debug!(timer_id = %timer.id(), %method, request_id = %ctx.request_id, "Timeout handled");
                Ok(())
            }
            Err(err) => {
                error!(timer_id = %timer.id(), %bean_type, %method, "Timeout method failed: {:#}", err);
                Err(err)
            }
        }
    }
}
