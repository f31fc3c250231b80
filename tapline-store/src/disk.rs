//! Disk receiver — bounded queue, dedicated writer thread, daily rotation.
//!
//! `persist` serialises the record to one JSON line and enqueues it on a
//! bounded channel; a single writer thread drains the channel and appends
//! to `<directory>/[<prefix>-]<yyyy-MM-dd>.log`, opening a new file when
//! the date changes. The writer thread is the sole owner of the rotation
//! state, so rotation needs no lock; the only shared structure is the
//! bounded channel itself.
//!
//! Backpressure is deliberate: when the queue is full, `persist` blocks the
//! calling thread until the writer frees a slot. Records are never dropped
//! silently.

use chrono::{NaiveDate, Utc};
use crossbeam_channel::{Receiver as LineReceiver, RecvTimeoutError, Sender as LineSender, bounded};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tapline_core::config::DiskSettings;
use tapline_core::pipeline::{Receiver, join_with_timeout};
use tapline_core::{LogRecord, TaplineError};
use tracing::{debug, error, info, warn};

/// Source of "today" for rotation decisions. Injectable so rotation can be
/// exercised without waiting for a real midnight.
pub type DateSource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Rotating file receiver with a bounded backpressure queue.
///
/// States: Created → Running → ShuttingDown → Stopped. `persist` after
/// shutdown fails fast with [`TaplineError::Closed`].
#[derive(Debug)]
pub struct DiskReceiver {
    tx: LineSender<String>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    current_path: Arc<Mutex<Option<PathBuf>>>,
}

impl DiskReceiver {
    /// Create the receiver, the bounded queue, and the writer thread.
    ///
    /// Fatal if the target directory cannot be created or the thread cannot
    /// be spawned — the receiver never reaches the running state.
    pub fn new(settings: &DiskSettings) -> Result<Self, TaplineError> {
        Self::with_date_source(settings, Arc::new(|| Utc::now().date_naive()))
    }

    /// Like [`DiskReceiver::new`] with an explicit date source.
    pub fn with_date_source(
        settings: &DiskSettings,
        date_source: DateSource,
    ) -> Result<Self, TaplineError> {
        fs::create_dir_all(&settings.directory).map_err(|e| {
            TaplineError::Config(format!(
                "cannot create audit log directory {}: {e}",
                settings.directory.display()
            ))
        })?;

        let (tx, rx) = bounded(settings.queue_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let current_path = Arc::new(Mutex::new(None));

        let writer = WriterLoop {
            rx,
            running: Arc::clone(&running),
            directory: settings.directory.clone(),
            base_prefix: settings.base_prefix.clone(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            max_files: settings.max_files,
            date_source,
            current_path: Arc::clone(&current_path),
        };

        let handle = std::thread::Builder::new()
            .name("audit-disk-writer".into())
            .spawn(move || writer.run())
            .map_err(|e| TaplineError::Config(format!("cannot spawn writer thread: {e}")))?;

        info!(
            directory = %settings.directory.display(),
            capacity = settings.queue_capacity,
            "Disk receiver started"
        );

        Ok(Self {
            tx,
            running,
            handle: Mutex::new(Some(handle)),
            current_path,
        })
    }

    /// Path of the file currently being written, once the writer has
    /// processed at least one record since start or the last rotation.
    pub fn current_file_path(&self) -> Option<PathBuf> {
        self.current_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Receiver for DiskReceiver {
    fn persist(&self, record: &LogRecord) -> Result<(), TaplineError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TaplineError::Closed);
        }
        let line = serde_json::to_string(record)?;
        // Blocks when the queue is full — documented backpressure, not
        // an error. Fails only if the writer thread is gone.
        self.tx.send(line).map_err(|_| TaplineError::Closed)?;
        Ok(())
    }

    /// Signal the writer thread and wait up to `timeout` for it to drain
    /// the queue and exit. Best effort: a writer still alive afterwards is
    /// logged, never force-killed.
    fn shutdown(&self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Disk receiver shutting down");
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if !join_with_timeout(handle, timeout) {
                error!("Audit disk writer still running after shutdown wait");
            }
        }
    }
}

// ── Writer thread ────────────────────────────────────────────────────────────

/// Rotation state — owned exclusively by the writer thread.
struct RotationState {
    current_date: NaiveDate,
    writer: Option<BufWriter<File>>,
}

struct WriterLoop {
    rx: LineReceiver<String>,
    running: Arc<AtomicBool>,
    directory: PathBuf,
    base_prefix: Option<String>,
    poll_interval: Duration,
    max_files: usize,
    date_source: DateSource,
    current_path: Arc<Mutex<Option<PathBuf>>>,
}

impl WriterLoop {
    fn run(self) {
        debug!("Audit disk writer started");
        let mut state = RotationState {
            current_date: NaiveDate::MIN,
            writer: None,
        };

        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(line) => self.write_line(&mut state, &line),
                Err(RecvTimeoutError::Timeout) => {
                    // Exit only once shut down AND drained.
                    if !self.running.load(Ordering::SeqCst) && self.rx.is_empty() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(mut w) = state.writer.take() {
            if let Err(e) = w.flush() {
                error!(error = %e, "Failed to flush audit log on shutdown");
            }
        }
        debug!("Audit disk writer stopped");
    }

    fn write_line(&self, state: &mut RotationState, line: &str) {
        let today = (self.date_source)();
        if state.writer.is_none() || today != state.current_date {
            if let Err(e) = self.rotate(state, today) {
                error!(error = %e, "Failed to rotate audit log; line dropped");
                return;
            }
        }
        let Some(w) = state.writer.as_mut() else {
            return;
        };
        if let Err(e) = w
            .write_all(line.as_bytes())
            .and_then(|()| w.write_all(b"\n"))
        {
            // One bad line must not stop the stream.
            error!(error = %e, "Failed to write audit line");
        }
    }

    /// Flush and close the previous file, open today's in append mode.
    fn rotate(&self, state: &mut RotationState, today: NaiveDate) -> io::Result<()> {
        if let Some(mut old) = state.writer.take() {
            if let Err(e) = old.flush() {
                error!(error = %e, "Failed to flush audit log before rotation");
            }
        }

        let path = daily_file_path(&self.directory, self.base_prefix.as_deref(), today);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        state.writer = Some(BufWriter::new(file));
        state.current_date = today;
        *self
            .current_path
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(path.clone());
        info!(path = %path.display(), "Opened audit log file");

        if self.max_files > 0 {
            if let Err(e) =
                prune_daily_files(&self.directory, self.base_prefix.as_deref(), self.max_files)
            {
                warn!(error = %e, "Failed to prune old audit log files");
            }
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// `logs/api-2025-01-15.log` for prefix `api`, `logs/2025-01-15.log` without.
fn daily_file_path(directory: &Path, prefix: Option<&str>, date: NaiveDate) -> PathBuf {
    let name = match prefix {
        Some(p) => format!("{p}-{}.log", date.format("%Y-%m-%d")),
        None => format!("{}.log", date.format("%Y-%m-%d")),
    };
    directory.join(name)
}

/// Remove old daily files, keeping only the newest `keep`.
fn prune_daily_files(directory: &Path, prefix: Option<&str>, keep: usize) -> io::Result<()> {
    let name_prefix = prefix.map(|p| format!("{p}-")).unwrap_or_default();
    let mut daily_files: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&name_prefix) && name.ends_with(".log") {
            daily_files.push(entry.path());
        }
    }

    // Dates sort lexicographically — newest last.
    daily_files.sort();

    if daily_files.len() > keep {
        let to_remove = daily_files.len() - keep;
        for path in daily_files.iter().take(to_remove) {
            debug!(path = %path.display(), "Pruning old audit log file");
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
