use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    executor::ExecutorHandle, TimedObjectDescriptor, TimedObjectInvoker, TimedObjectLocator,
    TimerConfig, TimerError, TimerResult, TimerService, TimerServiceExecutor,
};

/// Wires one timer service per timed-object type onto a shared executor
pub struct TimerServiceRegistry {
    config: TimerConfig,
    locator: Arc<TimedObjectLocator>,
    executor: Arc<TimerServiceExecutor>,
    services: RwLock<HashMap<String, Arc<TimerService>>>,
    executor_handle: Mutex<Option<ExecutorHandle>>,
}

impl TimerServiceRegistry {
    pub fn new(config: TimerConfig, locator: Arc<TimedObjectLocator>) -> Self {
        let executor = Arc::new(TimerServiceExecutor::new(config.tick_interval));
        Self {
            config,
            locator,
            executor,
            services: RwLock::new(HashMap::new()),
            executor_handle: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<TimerServiceExecutor> {
        &self.executor
    }

    /// Create the invoker and timer service of a timed object
    pub fn register(&self, descriptor: TimedObjectDescriptor) -> Arc<TimerService> {
        let bean_type = descriptor.bean_type.clone();
        let invoker = Arc::new(TimedObjectInvoker::new(descriptor, Arc::clone(&self.locator)));
        let service = TimerService::new(invoker, Arc::clone(&self.executor), self.config.clone());

        if let Some(previous) = self.services.write().insert(bean_type.clone(), Arc::clone(&service)) {
            warn!(%bean_type, "Timed object registered twice, replacing its timer service");
            previous.stop();
        }
        service
    }

    pub fn register_all<I>(&self, descriptors: I)
    where
        I: IntoIterator<Item = TimedObjectDescriptor>,
    {
        for descriptor in descriptors {
            self.register(descriptor);
        }
    }

    pub fn lookup(&self, bean_type: &str) -> TimerResult<Arc<TimerService>> {
        self.services
            .read()
            .get(bean_type)
            .cloned()
            .ok_or_else(|| TimerError::ServiceNotFound(bean_type.to_string()))
    }

    pub fn services(&self) -> Vec<Arc<TimerService>> {
        self.services.read().values().cloned().collect()
    }

    /// Start every service, then the executor loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> TimerResult<()> {
        for service in self.services() {
            service.start()?;
        }

        let mut handle = self.executor_handle.lock();
        if handle.is_none() {
            *handle = Some(self.executor.start());
        }
        info!(services = self.services.read().len(), "Timer services started");
        Ok(())
    }

    /// Stop every service and wait for the executor loop to exit
    pub async fn stop(&self) -> TimerResult<()> {
        for service in self.services() {
            service.stop();
        }

        let handle = self.executor_handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        info!("Timer services stopped");
        Ok(())
    }
}
