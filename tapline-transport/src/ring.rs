//! In-process ring buffer transport.
//!
//! A fixed array of slots (capacity rounded up to a power of two) is
//! allocated once; producers replace the record held by a slot, never the
//! slot itself. One consumer thread drains slots in publish order and
//! forwards each record to the configured [`Receiver`].
//!
//! Classic ring buffers assume a single producer, but senders here are
//! invoked from many request-handling threads. The chosen answer: every
//! publish is serialised behind the buffer's internal mutex. The critical
//! section is one slot write, so the lock bound is small; a lock-free
//! multi-producer sequence claim was rejected as complexity without a
//! measured need.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tapline_core::config::{TransportSettings, WaitStrategy};
use tapline_core::pipeline::{Receiver, Sender, join_with_timeout};
use tapline_core::{LogRecord, TaplineError};
use tracing::{debug, error, info, warn};

/// How long a parked thread sleeps between shutdown-flag checks.
const PARK_INTERVAL: Duration = Duration::from_millis(50);

/// Ring-buffer sender: bounded, ordered, never drops while running.
///
/// Backpressure on a full buffer follows the configured [`WaitStrategy`];
/// a `persist` failure in the consumer is logged and the loop moves on to
/// the next slot.
pub struct RingBufferSender {
    shared: Arc<RingShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct RingShared {
    state: Mutex<RingState>,
    not_full: Condvar,
    not_empty: Condvar,
    running: AtomicBool,
    wait: WaitStrategy,
}

/// Slot array plus cursors. `head` is the next slot to consume; the next
/// publish goes to `(head + len) & mask`.
struct RingState {
    slots: Box<[Option<LogRecord>]>,
    head: usize,
    len: usize,
    mask: usize,
}

impl RingState {
    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn push(&mut self, record: LogRecord) {
        let tail = (self.head + self.len) & self.mask;
        self.slots[tail] = Some(record);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<LogRecord> {
        if self.len == 0 {
            return None;
        }
        let record = self.slots[self.head].take();
        self.head = (self.head + 1) & self.mask;
        self.len -= 1;
        record
    }
}

impl RingBufferSender {
    /// Allocate the slot array and start the consumer thread.
    pub fn new(
        settings: &TransportSettings,
        receiver: Arc<dyn Receiver>,
    ) -> Result<Self, TaplineError> {
        let capacity = settings.buffer_size.max(2).next_power_of_two();
        let shared = Arc::new(RingShared {
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                mask: capacity - 1,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            wait: settings.wait,
        });

        let consumer_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("audit-ring-consumer".into())
            .spawn(move || consume(consumer_shared, receiver))
            .map_err(|e| TaplineError::Config(format!("cannot spawn consumer thread: {e}")))?;

        info!(capacity, wait = ?settings.wait, "Ring buffer sender started");

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Effective capacity after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.lock_state().slots.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, RingState> {
        self.shared.lock_state()
    }

    /// Returns false if the buffer shut down while the record was waiting
    /// for a slot.
    fn publish(&self, record: LogRecord) -> bool {
        match self.shared.wait {
            WaitStrategy::Blocking => {
                let mut state = self.lock_state();
                while state.is_full() {
                    if !self.shared.running.load(Ordering::SeqCst) {
                        return false;
                    }
                    let (guard, _) = self
                        .shared
                        .not_full
                        .wait_timeout(state, PARK_INTERVAL)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
                state.push(record);
                drop(state);
                self.shared.not_empty.notify_one();
                true
            }
            WaitStrategy::Yielding | WaitStrategy::Spinning => {
                let mut pending = Some(record);
                loop {
                    {
                        let mut state = self.lock_state();
                        if !state.is_full() {
                            if let Some(r) = pending.take() {
                                state.push(r);
                            }
                            drop(state);
                            self.shared.not_empty.notify_one();
                            return true;
                        }
                    }
                    if !self.shared.running.load(Ordering::SeqCst) {
                        return false;
                    }
                    match self.shared.wait {
                        WaitStrategy::Yielding => std::thread::yield_now(),
                        _ => std::hint::spin_loop(),
                    }
                }
            }
        }
    }
}

impl RingShared {
    fn lock_state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Sender for RingBufferSender {
    fn send(&self, record: LogRecord) {
        if !self.shared.running.load(Ordering::SeqCst) {
            warn!(record_id = %record.id, "Ring buffer shut down; audit record dropped");
            return;
        }
        if !self.publish(record) {
            warn!("Ring buffer shut down while waiting for a slot; audit record dropped");
        }
    }

    /// Signal the consumer, let it drain remaining slots, join with a
    /// bounded wait. Best effort, never force-kills.
    fn shutdown(&self, timeout: Duration) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Ring buffer sender shutting down");
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if !join_with_timeout(handle, timeout) {
                error!("Ring consumer still running after shutdown wait");
            }
        }
    }
}

/// Consumer loop: pop in publish order, forward to the receiver, keep going
/// on per-record failures. Exits once shut down AND empty.
fn consume(shared: Arc<RingShared>, receiver: Arc<dyn Receiver>) {
    debug!("Ring consumer started");
    loop {
        let record = {
            let mut state = shared.lock_state();
            loop {
                if let Some(r) = state.pop() {
                    break Some(r);
                }
                if !shared.running.load(Ordering::SeqCst) {
                    break None;
                }
                let (guard, _) = shared
                    .not_empty
                    .wait_timeout(state, PARK_INTERVAL)
                    .unwrap_or_else(|e| e.into_inner());
                state = guard;
            }
        };
        let Some(record) = record else { break };
        shared.not_full.notify_all();
        // persist runs outside the lock — producers keep publishing while
        // the receiver does I/O.
        if let Err(e) = receiver.persist(&record) {
            error!(error = %e, record_id = %record.id, "Audit receiver failed; record dropped");
        }
    }
    debug!("Ring consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(buffer_size: usize, wait: WaitStrategy) -> TransportSettings {
        TransportSettings {
            buffer_size,
            wait,
            ..TransportSettings::default()
        }
    }

    fn record(tag: &str) -> LogRecord {
        let mut r = LogRecord::new("10.0.0.1", "GET", "/");
        r.operation = Some(tag.to_string());
        r
    }

    /// Receiver that appends operation labels, optionally gated so the
    /// consumer can be held mid-record.
    struct CollectingReceiver {
        seen: Mutex<Vec<String>>,
        gate: Option<Arc<(Mutex<bool>, Condvar)>>,
    }

    impl CollectingReceiver {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(gate: Arc<(Mutex<bool>, Condvar)>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                gate: Some(gate),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Receiver for CollectingReceiver {
        fn persist(&self, record: &LogRecord) -> Result<(), TaplineError> {
            if let Some(gate) = &self.gate {
                let (lock, cvar) = &**gate;
                let mut closed = lock.lock().unwrap();
                while *closed {
                    closed = cvar.wait(closed).unwrap();
                }
            }
            let op = record.operation.clone().unwrap_or_default();
            if op.contains("poison") {
                return Err(TaplineError::Store("injected failure".into()));
            }
            self.seen.lock().unwrap().push(op);
            Ok(())
        }
    }

    fn open_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cvar) = &**gate;
        *lock.lock().unwrap() = false;
        cvar.notify_all();
    }

    // ── Capacity ──────────────────────────────────────────────────

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender =
            RingBufferSender::new(&settings(100, WaitStrategy::Blocking), receiver).unwrap();
        assert_eq!(sender.capacity(), 128);
        sender.shutdown(Duration::from_secs(5));
    }

    // ── Ordering ──────────────────────────────────────────────────

    #[test]
    fn consumer_observes_publish_order() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender =
            RingBufferSender::new(&settings(16, WaitStrategy::Blocking), receiver.clone()).unwrap();

        for i in 0..100 {
            sender.send(record(&format!("{i:03}")));
        }
        sender.shutdown(Duration::from_secs(10));

        let seen = receiver.seen();
        assert_eq!(seen.len(), 100);
        for (i, op) in seen.iter().enumerate() {
            assert_eq!(op, &format!("{i:03}"));
        }
    }

    #[test]
    fn per_producer_order_is_preserved_with_concurrent_senders() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender = Arc::new(
            RingBufferSender::new(&settings(8, WaitStrategy::Blocking), receiver.clone()).unwrap(),
        );

        let mut producers = Vec::new();
        for p in 0..4 {
            let sender = Arc::clone(&sender);
            producers.push(std::thread::spawn(move || {
                for i in 0..25 {
                    sender.send(record(&format!("p{p}-{i:02}")));
                }
            }));
        }
        for t in producers {
            t.join().unwrap();
        }
        sender.shutdown(Duration::from_secs(10));

        let seen = receiver.seen();
        assert_eq!(seen.len(), 100);
        for p in 0..4 {
            let mine: Vec<&String> = seen
                .iter()
                .filter(|op| op.starts_with(&format!("p{p}-")))
                .collect();
            assert_eq!(mine.len(), 25);
            for (i, op) in mine.iter().enumerate() {
                assert_eq!(**op, format!("p{p}-{i:02}"));
            }
        }
    }

    // ── Consumer failures ─────────────────────────────────────────

    #[test]
    fn receiver_failure_does_not_stop_the_consumer() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender =
            RingBufferSender::new(&settings(8, WaitStrategy::Blocking), receiver.clone()).unwrap();

        sender.send(record("first"));
        sender.send(record("poison"));
        sender.send(record("second"));
        sender.shutdown(Duration::from_secs(10));

        assert_eq!(receiver.seen(), vec!["first".to_string(), "second".to_string()]);
    }

    // ── Backpressure ──────────────────────────────────────────────

    #[test]
    fn full_buffer_blocks_publisher_until_consumer_frees_a_slot() {
        let gate = Arc::new((Mutex::new(true), Condvar::new()));
        let receiver = Arc::new(CollectingReceiver::gated(Arc::clone(&gate)));
        let sender = Arc::new(
            RingBufferSender::new(&settings(2, WaitStrategy::Blocking), receiver.clone()).unwrap(),
        );

        // Consumer takes the first record and parks in the gate; the next
        // two fill the buffer.
        sender.send(record("0"));
        std::thread::sleep(Duration::from_millis(100));
        sender.send(record("1"));
        sender.send(record("2"));

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);
        let blocked_sender = Arc::clone(&sender);
        let producer = std::thread::spawn(move || {
            blocked_sender.send(record("3")); // must block
            done_flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(150));
        assert!(!done.load(Ordering::SeqCst), "send should block on a full ring");

        open_gate(&gate);
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        sender.shutdown(Duration::from_secs(10));
        assert_eq!(
            receiver.seen(),
            vec!["0".to_string(), "1".to_string(), "2".to_string(), "3".to_string()]
        );
    }

    #[test]
    fn yielding_strategy_delivers_under_contention() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender =
            RingBufferSender::new(&settings(2, WaitStrategy::Yielding), receiver.clone()).unwrap();

        for i in 0..50 {
            sender.send(record(&format!("{i:02}")));
        }
        sender.shutdown(Duration::from_secs(10));
        assert_eq!(receiver.seen().len(), 50);
    }

    // ── Shutdown ──────────────────────────────────────────────────

    #[test]
    fn shutdown_drains_buffered_records() {
        let gate = Arc::new((Mutex::new(true), Condvar::new()));
        let receiver = Arc::new(CollectingReceiver::gated(Arc::clone(&gate)));
        let sender =
            RingBufferSender::new(&settings(8, WaitStrategy::Blocking), receiver.clone()).unwrap();

        for i in 0..5 {
            sender.send(record(&format!("{i}")));
        }
        open_gate(&gate);
        sender.shutdown(Duration::from_secs(10));

        assert_eq!(receiver.seen().len(), 5);
    }

    #[test]
    fn send_after_shutdown_drops_the_record() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender =
            RingBufferSender::new(&settings(8, WaitStrategy::Blocking), receiver.clone()).unwrap();
        sender.send(record("kept"));
        sender.shutdown(Duration::from_secs(10));

        sender.send(record("dropped"));
        assert_eq!(receiver.seen(), vec!["kept".to_string()]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let receiver = Arc::new(CollectingReceiver::new());
        let sender = RingBufferSender::new(&settings(8, WaitStrategy::Blocking), receiver).unwrap();
        sender.shutdown(Duration::from_secs(5));
        sender.shutdown(Duration::from_secs(5));
    }
}
