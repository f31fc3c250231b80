pub mod queue;
pub mod ring;

pub use queue::{Delivery, InProcessBroker, MessageBroker, QueueConsumer, QueueSender};
pub use ring::RingBufferSender;
