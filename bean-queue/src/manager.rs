use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};

use crate::{
    codec::CodecRegistry,
    job::ListenerLocator,
    worker::{QueueWorker, WorkerHandle},
    Message, MessageEvent, MessageId, Priority, QueueConfig, QueueError, QueueResult,
};

/// Queue declaration handed over by the deployment layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    /// Queue name producers address
    pub name: String,
    /// Bean type whose listener consumes the queue
    pub bean_type: String,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, bean_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bean_type: bean_type.into(),
        }
    }
}

/// One worker per priority for a single queue
pub struct QueueWorkerSet {
    descriptor: QueueDescriptor,
    workers: HashMap<Priority, Arc<QueueWorker>>,
}

impl QueueWorkerSet {
    fn new(
        descriptor: QueueDescriptor,
        config: &QueueConfig,
        locator: &Arc<ListenerLocator>,
        events: &broadcast::Sender<MessageEvent>,
    ) -> Self {
        let workers = Priority::all()
            .iter()
            .map(|priority| {
                let worker = QueueWorker::new(
                    descriptor.name.clone(),
                    descriptor.bean_type.clone(),
                    *priority,
                    config.clone(),
                    Arc::clone(locator),
                    events.clone(),
                );
                (*priority, Arc::new(worker))
            })
            .collect();

        Self { descriptor, workers }
    }

    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.descriptor
    }

    /// Worker of one priority partition
    pub fn worker(&self, priority: Priority) -> Option<&Arc<QueueWorker>> {
        self.workers.get(&priority)
    }

    /// Route a message to the worker of its priority
    pub fn attach(&self, message: Message) -> QueueResult<()> {
        let worker = self
            .workers
            .get(&message.priority)
            .ok_or_else(|| QueueError::InvalidPriority(message.priority.to_string()))?;
        worker.attach(message);
        Ok(())
    }
}

/// Registry of queue name to workers, and the producer entry point
pub struct QueueManager {
    config: QueueConfig,
    locator: Arc<ListenerLocator>,
    codecs: CodecRegistry,
    routes: RwLock<HashMap<String, Arc<QueueWorkerSet>>>,
    handles: Mutex<Vec<WorkerHandle>>,
    events: broadcast::Sender<MessageEvent>,
}

impl QueueManager {
    pub fn new(config: QueueConfig, locator: Arc<ListenerLocator>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            locator,
            codecs: CodecRegistry::new(),
            routes: RwLock::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Replace the codec registry used by [`QueueManager::receive`]
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Create and start one worker per priority for a queue.
    ///
    /// Must be called inside a tokio runtime.
    pub fn register_queue(&self, descriptor: QueueDescriptor) -> Arc<QueueWorkerSet> {
        let name = descriptor.name.clone();
        let set = Arc::new(QueueWorkerSet::new(
            descriptor,
            &self.config,
            &self.locator,
            &self.events,
        ));

        {
            let mut handles = self.handles.lock();
            for priority in Priority::all() {
                if let Some(worker) = set.worker(*priority) {
                    handles.push(worker.start());
                }
            }
        }

        let previous = self.routes.write().insert(name.clone(), Arc::clone(&set));
        if previous.is_some() {
            warn!(queue = %name, "Queue registered twice, routing to the new workers");
        }
        info!(queue = %name, bean_type = %set.descriptor().bean_type, "Queue registered");
        set
    }

    /// Register every declared queue
    pub fn register_all<I>(&self, descriptors: I)
    where
        I: IntoIterator<Item = QueueDescriptor>,
    {
        for descriptor in descriptors {
            self.register_queue(descriptor);
        }
    }

    /// Workers currently serving a queue
    pub fn queue(&self, name: &str) -> Option<Arc<QueueWorkerSet>> {
        self.routes.read().get(name).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    /// Route a message by destination, then by priority
    pub fn attach(&self, message: Message) -> QueueResult<()> {
        let set = self
            .queue(&message.destination)
            .ok_or_else(|| QueueError::QueueNotFound(message.destination.clone()))?;
        set.attach(message)
    }

    /// Build a message and attach it; fire and forget
    pub fn submit(
        &self,
        destination: &str,
        priority: Priority,
        payload: serde_json::Value,
        session_id: &str,
    ) -> QueueResult<MessageId> {
        let message = Message::new(destination, payload)
            .with_priority(priority)
            .with_session_id(session_id);
        let id = message.id.clone();
        self.attach(message)?;
        Ok(id)
    }

    /// Decode a transport envelope and attach the message it carries
    pub fn receive(&self, bytes: &[u8]) -> QueueResult<MessageId> {
        let message = self.codecs.decode_envelope(bytes)?.into_message()?;
        let id = message.id.clone();
        self.attach(message)?;
        Ok(id)
    }

    /// Stream of message events from every worker
    pub fn subscribe(&self) -> BroadcastStream<MessageEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Stop every worker; keeps going past workers that fail to stop
    pub async fn stop(&self) -> QueueResult<()> {
        let handles: Vec<WorkerHandle> = std::mem::take(&mut *self.handles.lock());
        let total = handles.len();
        let mut failed = 0;

        for handle in handles {
            if let Err(err) = handle.shutdown().await {
                error!("{}", err);
                failed += 1;
            }
        }

        info!(workers = total, failed, "Queue manager stopped");
        if failed > 0 {
            return Err(QueueError::ShutdownIncomplete { failed });
        }
        Ok(())
    }
}
