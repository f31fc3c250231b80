//! Tapline — asynchronous request/response audit-log pipeline.
//!
//! The capture stage builds one [`LogRecord`] per HTTP transaction and
//! hands it to a [`Sender`]; a transport (in-process ring buffer or broker
//! topic) carries it to exactly one [`Receiver`] (rotating disk writer or
//! daily document-store collection), which persists it durably. The
//! request path never blocks beyond the transport's documented
//! backpressure policy and never observes pipeline failures.

pub mod pipeline;

pub use pipeline::AuditPipeline;
pub use tapline_core::config::{PipelineConfig, ReceiverKind, TransportKind, WaitStrategy};
pub use tapline_core::{LogRecord, Receiver, Sender, TaplineError};
pub use tapline_store::{DiskReceiver, DocumentStore, DocumentStoreReceiver, InMemoryDocumentStore};
pub use tapline_transport::{InProcessBroker, MessageBroker, QueueConsumer, QueueSender, RingBufferSender};
