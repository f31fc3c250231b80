use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
///
/// Every value here is handed to a component constructor exactly once;
/// nothing reads configuration at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Which receiver variant persists records.
    #[serde(default = "default_receiver")]
    pub receiver: ReceiverKind,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub disk: DiskSettings,
    #[serde(default)]
    pub document: DocumentSettings,
}

/// Closed set of receiver variants, selected once at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverKind {
    Disk,
    Document,
}

/// Closed set of transport variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ring,
    Queue,
}

/// How a ring-buffer producer waits when the buffer is full.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    /// Park on a condvar until a slot frees up (default).
    #[default]
    Blocking,
    /// Re-check after `thread::yield_now`.
    Yielding,
    /// Busy-spin. Lowest latency, burns a core.
    Spinning,
}

/// Transport settings shared by both sender variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_transport")]
    pub kind: TransportKind,
    /// Ring capacity; rounded up to the next power of two.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub wait: WaitStrategy,
    /// Broker topic for the queue transport.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Queue consumer poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Disk receiver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSettings {
    /// Target directory; created at construction if absent.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Optional file name prefix: `<prefix>-2025-01-15.log`.
    #[serde(default)]
    pub base_prefix: Option<String>,
    /// Bounded queue capacity — producers block when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Writer thread poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Bounded wait for the writer thread to drain on shutdown.
    #[serde(default = "default_shutdown_wait")]
    pub shutdown_wait_ms: u64,
    /// Daily files kept after rotation. 0 = unlimited.
    #[serde(default)]
    pub max_files: usize,
}

/// Document store receiver settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSettings {
    /// Optional collection name prefix: `<prefix>-2025-01-15`.
    #[serde(default)]
    pub collection_prefix: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_receiver() -> ReceiverKind { ReceiverKind::Disk }
fn default_transport() -> TransportKind { TransportKind::Ring }
fn default_buffer_size() -> usize { 1024 }
fn default_topic() -> String { "tapline-audit".into() }
fn default_directory() -> PathBuf { PathBuf::from("logs") }
fn default_queue_capacity() -> usize { 4096 }
fn default_poll_interval() -> u64 { 100 }
fn default_shutdown_wait() -> u64 { 5000 }

// ── Impls ─────────────────────────────────────────────────────

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receiver: default_receiver(),
            transport: TransportSettings::default(),
            disk: DiskSettings::default(),
            document: DocumentSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: default_transport(),
            buffer_size: default_buffer_size(),
            wait: WaitStrategy::default(),
            topic: default_topic(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            base_prefix: None,
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval(),
            shutdown_wait_ms: default_shutdown_wait(),
            max_files: 0,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from YAML file + env overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: PipelineConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TAPLINE_").split("_"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── Default values ────────────────────────────────────────────

    #[test]
    fn default_config_has_expected_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.receiver, ReceiverKind::Disk);
        assert_eq!(cfg.transport.kind, TransportKind::Ring);
        assert_eq!(cfg.transport.buffer_size, 1024);
        assert_eq!(cfg.transport.wait, WaitStrategy::Blocking);
        assert_eq!(cfg.transport.topic, "tapline-audit");
        assert_eq!(cfg.transport.poll_interval_ms, 100);
        assert_eq!(cfg.disk.directory, PathBuf::from("logs"));
        assert_eq!(cfg.disk.queue_capacity, 4096);
        assert_eq!(cfg.disk.poll_interval_ms, 100);
        assert_eq!(cfg.disk.shutdown_wait_ms, 5000);
        assert_eq!(cfg.disk.max_files, 0);
        assert!(cfg.disk.base_prefix.is_none());
        assert!(cfg.document.collection_prefix.is_none());
    }

    // ── YAML loading ──────────────────────────────────────────────

    #[test]
    fn load_parses_yaml_and_fills_defaults() {
        let dir = std::env::temp_dir().join(format!("tapline-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
receiver: document
transport:
  kind: queue
  topic: audit-events
disk:
  directory: /var/log/tapline
  base_prefix: api
  queue_capacity: 128
document:
  collection_prefix: audit
"#
        )
        .unwrap();

        let cfg = PipelineConfig::load(&path).unwrap();
        assert_eq!(cfg.receiver, ReceiverKind::Document);
        assert_eq!(cfg.transport.kind, TransportKind::Queue);
        assert_eq!(cfg.transport.topic, "audit-events");
        // Unset fields fall back to defaults
        assert_eq!(cfg.transport.buffer_size, 1024);
        assert_eq!(cfg.disk.directory, PathBuf::from("/var/log/tapline"));
        assert_eq!(cfg.disk.base_prefix.as_deref(), Some("api"));
        assert_eq!(cfg.disk.queue_capacity, 128);
        assert_eq!(cfg.document.collection_prefix.as_deref(), Some("audit"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wait_strategy_parses_lowercase() {
        let v: WaitStrategy = serde_json::from_str("\"yielding\"").unwrap();
        assert_eq!(v, WaitStrategy::Yielding);
        let v: WaitStrategy = serde_json::from_str("\"spinning\"").unwrap();
        assert_eq!(v, WaitStrategy::Spinning);
    }
}
