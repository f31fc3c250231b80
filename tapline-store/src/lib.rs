pub mod disk;
pub mod document;

pub use disk::DiskReceiver;
pub use document::{DocumentStore, DocumentStoreReceiver, InMemoryDocumentStore};
