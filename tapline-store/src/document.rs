//! Document store receiver — one logical collection per calendar day.
//!
//! Unlike the disk receiver there is no background thread and no rotation
//! state: the date-suffixed collection name is computed afresh on every
//! call, so "rotation" is implicit. The already-connected store client is
//! injected at construction; nothing is resolved from a global registry at
//! call time.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tapline_core::pipeline::Receiver;
use tapline_core::{LogRecord, TaplineError};
use tracing::debug;

use crate::disk::DateSource;

/// Minimal document database surface the receiver needs. Implemented by
/// real driver adapters and by [`InMemoryDocumentStore`] for embedding and
/// tests.
pub trait DocumentStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    fn ensure_collection(&self, name: &str) -> Result<(), TaplineError>;

    /// Insert one document. No batching, no retry.
    fn insert(&self, collection: &str, document: serde_json::Value) -> Result<(), TaplineError>;
}

/// Receiver that inserts each record into today's collection,
/// `[<prefix>-]<yyyy-MM-dd>`. A failed insert surfaces to the caller.
pub struct DocumentStoreReceiver {
    store: Arc<dyn DocumentStore>,
    prefix: Option<String>,
    date_source: DateSource,
}

impl DocumentStoreReceiver {
    pub fn new(store: Arc<dyn DocumentStore>, prefix: Option<String>) -> Self {
        Self::with_date_source(store, prefix, Arc::new(|| Utc::now().date_naive()))
    }

    pub fn with_date_source(
        store: Arc<dyn DocumentStore>,
        prefix: Option<String>,
        date_source: DateSource,
    ) -> Self {
        Self {
            store,
            prefix,
            date_source,
        }
    }

    fn collection_name(&self, date: NaiveDate) -> String {
        match &self.prefix {
            Some(p) => format!("{p}-{}", date.format("%Y-%m-%d")),
            None => date.format("%Y-%m-%d").to_string(),
        }
    }
}

impl Receiver for DocumentStoreReceiver {
    fn persist(&self, record: &LogRecord) -> Result<(), TaplineError> {
        let name = self.collection_name((self.date_source)());
        self.store.ensure_collection(&name)?;
        let document = serde_json::to_value(record)?;
        self.store.insert(&name, document)?;
        debug!(collection = %name, record_id = %record.id, "Audit record inserted");
        Ok(())
    }
}

/// In-process document store backed by a concurrent map. Keeps insertion
/// order within each collection.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: DashMap<String, Vec<serde_json::Value>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents of a collection, in insertion order. Empty if absent.
    pub fn documents(&self, name: &str) -> Vec<serde_json::Value> {
        self.collections
            .get(name)
            .map(|docs| docs.value().clone())
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn ensure_collection(&self, name: &str) -> Result<(), TaplineError> {
        self.collections.entry(name.to_string()).or_default();
        Ok(())
    }

    fn insert(&self, collection: &str, document: serde_json::Value) -> Result<(), TaplineError> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }
}
