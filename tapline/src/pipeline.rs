//! Pipeline assembly: pick one receiver variant and one transport variant
//! from configuration, once, at construction. The variant sets are closed
//! — {disk, document} receivers, {ring, queue} transports — and a built
//! pipeline is never re-wired at runtime.

use std::sync::Arc;
use std::time::Duration;
use tapline_core::config::{PipelineConfig, ReceiverKind, TransportKind};
use tapline_core::{Receiver, Sender, TaplineError};
use tapline_store::{DiskReceiver, DocumentStore, DocumentStoreReceiver};
use tapline_transport::{MessageBroker, QueueConsumer, QueueSender, RingBufferSender};
use tracing::info;

/// External clients the configuration may call for. Already connected,
/// injected by the embedding application — the pipeline never resolves
/// them from a global registry.
#[derive(Default)]
pub struct Clients {
    pub broker: Option<Arc<dyn MessageBroker>>,
    pub document_store: Option<Arc<dyn DocumentStore>>,
}

/// A fully wired pipeline: one sender, one receiver, and the queue
/// consumer when the queue transport is selected.
pub struct AuditPipeline {
    sender: Arc<dyn Sender>,
    receiver: Arc<dyn Receiver>,
    consumer: Option<QueueConsumer>,
    shutdown_wait: Duration,
}

impl std::fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditPipeline")
            .field("shutdown_wait", &self.shutdown_wait)
            .finish_non_exhaustive()
    }
}

impl AuditPipeline {
    /// Build the variant pair the configuration names.
    ///
    /// Fatal when a selected variant needs a client that was not injected,
    /// or when a receiver cannot reach its running state.
    pub fn build(config: &PipelineConfig, clients: Clients) -> Result<Self, TaplineError> {
        let receiver: Arc<dyn Receiver> = match config.receiver {
            ReceiverKind::Disk => Arc::new(DiskReceiver::new(&config.disk)?),
            ReceiverKind::Document => {
                let store = clients.document_store.ok_or_else(|| {
                    TaplineError::Config(
                        "document receiver selected but no document store client injected".into(),
                    )
                })?;
                Arc::new(DocumentStoreReceiver::new(
                    store,
                    config.document.collection_prefix.clone(),
                ))
            }
        };

        let mut consumer = None;
        let sender: Arc<dyn Sender> = match config.transport.kind {
            TransportKind::Ring => Arc::new(RingBufferSender::new(
                &config.transport,
                Arc::clone(&receiver),
            )?),
            TransportKind::Queue => {
                let broker = clients.broker.ok_or_else(|| {
                    TaplineError::Config(
                        "queue transport selected but no broker client injected".into(),
                    )
                })?;
                consumer = Some(QueueConsumer::new(
                    Arc::clone(&broker),
                    config.transport.topic.clone(),
                    Arc::clone(&receiver),
                    Duration::from_millis(config.transport.poll_interval_ms.max(1)),
                )?);
                Arc::new(QueueSender::new(broker, config.transport.topic.clone()))
            }
        };

        info!(
            receiver = ?config.receiver,
            transport = ?config.transport.kind,
            "Audit pipeline assembled"
        );

        Ok(Self {
            sender,
            receiver,
            consumer,
            shutdown_wait: Duration::from_millis(config.disk.shutdown_wait_ms),
        })
    }

    /// The transport entry point for the capture stage.
    pub fn sender(&self) -> Arc<dyn Sender> {
        Arc::clone(&self.sender)
    }

    /// Drain and stop every stage, upstream first: sender, then consumer,
    /// then receiver. Each join is bounded by the configured shutdown wait.
    pub fn shutdown(&self) {
        self.sender.shutdown(self.shutdown_wait);
        if let Some(consumer) = &self.consumer {
            consumer.shutdown(self.shutdown_wait);
        }
        self.receiver.shutdown(self.shutdown_wait);
    }
}
