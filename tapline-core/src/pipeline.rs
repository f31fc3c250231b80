//! Transport and persistence contracts.
//!
//! The capture stage hands each finished [`LogRecord`] to a [`Sender`]; some
//! path of buffers, threads, or brokers later, exactly one [`Receiver`]
//! persists it. Both traits share the same cooperative lifecycle: a
//! `shutdown(timeout)` that signals, drains best-effort, and never
//! force-kills a thread.

use crate::error::TaplineError;
use crate::record::LogRecord;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Transport contract, called from request-handling threads.
///
/// `send` must never propagate a transport failure into the caller's
/// request path: implementations may block per their documented
/// backpressure policy, but failures are logged, not returned.
pub trait Sender: Send + Sync {
    /// Hand a record to the transport. The record becomes eligible for
    /// eventual persistence; after shutdown the record is dropped with a
    /// logged warning.
    fn send(&self, record: LogRecord);

    /// Cooperative shutdown: signal, drain buffered records best-effort,
    /// join background threads within `timeout`.
    fn shutdown(&self, timeout: Duration) {
        let _ = timeout;
    }
}

/// Persistence contract. May perform blocking I/O.
///
/// Implementations must tolerate concurrent `persist` calls from multiple
/// consumer threads. Errors surface to the caller, which decides whether
/// the record is redelivered (queue consumer) or logged and dropped
/// (in-process ring handler).
pub trait Receiver: Send + Sync {
    fn persist(&self, record: &LogRecord) -> Result<(), TaplineError>;

    /// Cooperative shutdown, same contract as [`Sender::shutdown`].
    fn shutdown(&self, timeout: Duration) {
        let _ = timeout;
    }
}

/// Bounded join for background pipeline threads.
///
/// Returns `true` once the thread has been joined; `false` if it was still
/// alive at the deadline (the handle is dropped and the thread detaches —
/// callers log the condition, they never force-kill).
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}
