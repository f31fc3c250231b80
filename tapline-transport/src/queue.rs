//! Message-queue transport — broker publish on the send side, a polling
//! consumer on the receive side.
//!
//! `QueueSender::send` is fire-and-forget at the transport layer: it
//! serialises the record and publishes to a named topic without waiting
//! for consumer acknowledgment. The consumer acknowledges a message only
//! after the receiver persisted it; a failed persist leaves the message
//! unacknowledged so the broker redelivers (at-least-once). Ordering holds
//! within one topic only.
//!
//! The broker itself sits behind [`MessageBroker`], and the already-built
//! client is injected at construction — no process-wide registry lookups.
//! [`InProcessBroker`] ships for embedding and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tapline_core::pipeline::{Receiver, Sender, join_with_timeout};
use tapline_core::{LogRecord, TaplineError};
use tracing::{debug, error, info};
use uuid::Uuid;

/// One message handed to a consumer. The tag identifies the message for
/// acknowledgment; redelivered messages keep their tag.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: String,
    pub payload: Vec<u8>,
}

/// Broker client surface. The serializer/deserializer pair is the
/// caller's: payloads are opaque bytes here.
pub trait MessageBroker: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TaplineError>;

    /// Take the next message off the topic, waiting up to `timeout`.
    /// The message stays pending (unacknowledged) until `ack` or `nack`.
    fn poll(&self, topic: &str, timeout: Duration) -> Option<Delivery>;

    /// Acknowledge successful processing; the message is gone for good.
    fn ack(&self, topic: &str, tag: &str);

    /// Return an unacknowledged message to the topic for redelivery.
    fn nack(&self, topic: &str, tag: &str);
}

// ── In-process broker ────────────────────────────────────────────────────────

#[derive(Default)]
struct TopicState {
    ready: VecDeque<Delivery>,
    pending: HashMap<String, Delivery>,
}

/// FIFO broker living inside the process. At-least-once: `nack` requeues
/// the message at the front of its topic.
#[derive(Default)]
pub struct InProcessBroker {
    topics: Mutex<HashMap<String, TopicState>>,
    delivered: Condvar,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for delivery on a topic.
    pub fn depth(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|t| t.ready.len()).unwrap_or(0)
    }

    /// Delivered but not yet acknowledged messages on a topic.
    pub fn pending(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|t| t.pending.len()).unwrap_or(0)
    }
}

impl MessageBroker for InProcessBroker {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TaplineError> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.to_string()).or_default().ready.push_back(Delivery {
            tag: Uuid::new_v4().to_string(),
            payload,
        });
        drop(topics);
        self.delivered.notify_all();
        Ok(())
    }

    fn poll(&self, topic: &str, timeout: Duration) -> Option<Delivery> {
        let deadline = Instant::now() + timeout;
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(delivery) = topics
                .get_mut(topic)
                .and_then(|t| t.ready.pop_front())
            {
                topics
                    .entry(topic.to_string())
                    .or_default()
                    .pending
                    .insert(delivery.tag.clone(), delivery.clone());
                return Some(delivery);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .delivered
                .wait_timeout(topics, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            topics = guard;
        }
    }

    fn ack(&self, topic: &str, tag: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = topics.get_mut(topic) {
            t.pending.remove(tag);
        }
    }

    fn nack(&self, topic: &str, tag: &str) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = topics.get_mut(topic) {
            if let Some(delivery) = t.pending.remove(tag) {
                t.ready.push_front(delivery);
            }
        }
        drop(topics);
        self.delivered.notify_all();
    }
}

// ── Sender ───────────────────────────────────────────────────────────────────

/// Publishes each record to the topic and returns immediately. Publish
/// failures are logged, never surfaced to the request path.
pub struct QueueSender {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl QueueSender {
    pub fn new(broker: Arc<dyn MessageBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }
}

impl Sender for QueueSender {
    fn send(&self, record: LogRecord) {
        let payload = match serde_json::to_vec(&record) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, record_id = %record.id, "Failed to serialise audit record; dropped");
                return;
            }
        };
        if let Err(e) = self.broker.publish(&self.topic, payload) {
            error!(error = %e, topic = %self.topic, "Failed to publish audit record; dropped");
        }
    }
}

// ── Consumer ─────────────────────────────────────────────────────────────────

/// Background consumer: polls the topic, persists each record, and acks
/// only after the receiver succeeded. A failed persist is nacked so the
/// broker redelivers it; a payload that fails to deserialise is acked and
/// dropped — redelivering it could never succeed.
pub struct QueueConsumer {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        topic: impl Into<String>,
        receiver: Arc<dyn Receiver>,
        poll_interval: Duration,
    ) -> Result<Self, TaplineError> {
        let topic = topic.into();
        let running = Arc::new(AtomicBool::new(true));
        let consumer = ConsumerLoop {
            broker,
            topic: topic.clone(),
            receiver,
            running: Arc::clone(&running),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        };
        let handle = std::thread::Builder::new()
            .name("audit-queue-consumer".into())
            .spawn(move || consumer.run())
            .map_err(|e| TaplineError::Config(format!("cannot spawn consumer thread: {e}")))?;
        info!(topic = %topic, "Queue consumer started");
        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Same cooperative lifecycle as every other pipeline component:
    /// signal, drain what is already on the topic, bounded join.
    pub fn shutdown(&self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Queue consumer shutting down");
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if !join_with_timeout(handle, timeout) {
                error!("Queue consumer still running after shutdown wait");
            }
        }
    }
}

struct ConsumerLoop {
    broker: Arc<dyn MessageBroker>,
    topic: String,
    receiver: Arc<dyn Receiver>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ConsumerLoop {
    fn run(self) {
        debug!(topic = %self.topic, "Queue consumer loop started");
        loop {
            match self.broker.poll(&self.topic, self.poll_interval) {
                Some(delivery) => self.handle_delivery(delivery),
                // Exit only once shut down AND the topic is drained.
                None => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
        debug!(topic = %self.topic, "Queue consumer loop stopped");
    }

    fn handle_delivery(&self, delivery: Delivery) {
        match serde_json::from_slice::<LogRecord>(&delivery.payload) {
            Ok(record) => match self.receiver.persist(&record) {
                Ok(()) => self.broker.ack(&self.topic, &delivery.tag),
                Err(e) => {
                    error!(
                        error = %e,
                        record_id = %record.id,
                        "Persist failed; leaving message unacknowledged for redelivery"
                    );
                    self.broker.nack(&self.topic, &delivery.tag);
                    // Keep a persistently failing receiver from spinning
                    // the same message at full speed.
                    std::thread::sleep(self.poll_interval);
                }
            },
            Err(e) => {
                error!(error = %e, "Malformed audit payload; acknowledged and dropped");
                self.broker.ack(&self.topic, &delivery.tag);
            }
        }
    }
}
