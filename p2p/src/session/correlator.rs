//! Request/response correlation, per spec §4.4.2: handshake, getheaders and
//! getaddr each have a single in-flight slot (handshake and getaddr
//! coalesce concurrent callers onto the same waiter; getheaders rejects a
//! concurrent duplicate outright), while ping is keyed by its 8-byte
//! nonce and allows any number of concurrent in-flight pings.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

/// Why a correlated request resolved without a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrelatorError {
    /// The request's timeout elapsed.
    Timeout,
    /// The session was disposed while the request was outstanding.
    Disposed,
    /// The caller's cancellation token fired.
    Cancelled,
    /// A concurrent duplicate was rejected because this slot does not
    /// coalesce (getheaders).
    Rejected,
}

/// A single-slot correlator, optionally coalescing concurrent registrants
/// onto the one in-flight request.
pub struct SingleSlot<T: Clone> {
    waiters: Mutex<Vec<oneshot::Sender<Result<T, CorrelatorError>>>>,
}

impl<T: Clone> Default for SingleSlot<T> {
    fn default() -> Self {
        SingleSlot {
            waiters: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> SingleSlot<T> {
    /// Register a new waiter. When `coalesce` is true and a request is
    /// already outstanding, the new caller is appended to the same
    /// waiter list and woken by whatever resolves the existing one. When
    /// `coalesce` is false and a request is already outstanding, returns
    /// `None` — the caller must fail the new request immediately without
    /// disturbing the one in flight.
    pub fn register(&self, coalesce: bool) -> Option<oneshot::Receiver<Result<T, CorrelatorError>>> {
        let mut waiters = self.waiters.lock().expect("correlator mutex poisoned");
        if !waiters.is_empty() && !coalesce {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        Some(rx)
    }

    /// Whether a request is currently outstanding.
    pub fn is_pending(&self) -> bool {
        !self.waiters.lock().expect("correlator mutex poisoned").is_empty()
    }

    /// Resolve every outstanding waiter with `value`.
    pub fn resolve(&self, value: T) {
        let waiters = std::mem::take(&mut *self.waiters.lock().expect("correlator mutex poisoned"));
        for tx in waiters {
            let _ = tx.send(Ok(value.clone()));
        }
    }

    /// Fail every outstanding waiter with `err`.
    pub fn fail(&self, err: CorrelatorError) {
        let waiters = std::mem::take(&mut *self.waiters.lock().expect("correlator mutex poisoned"));
        for tx in waiters {
            let _ = tx.send(Err(err));
        }
    }
}

/// The ping correlator: keyed by the 8-byte nonce carried in `ping`/`pong`,
/// so any number of pings may be outstanding at once.
#[derive(Default)]
pub struct PingSlots {
    pending: Mutex<HashMap<u64, (std::time::Instant, oneshot::Sender<Result<Duration, CorrelatorError>>)>>,
}

impl PingSlots {
    /// Register a new nonce, returning its waiter.
    pub fn register(&self, nonce: u64) -> oneshot::Receiver<Result<Duration, CorrelatorError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("ping mutex poisoned")
            .insert(nonce, (std::time::Instant::now(), tx));
        rx
    }

    /// Resolve the waiter for `nonce`, if one is outstanding, with the
    /// elapsed round-trip time. Returns that duration so the caller can
    /// also emit it as a `Pong` event.
    pub fn resolve(&self, nonce: u64) -> Option<Duration> {
        let (sent_at, tx) = self.pending.lock().expect("ping mutex poisoned").remove(&nonce)?;
        let rtt = sent_at.elapsed();
        let _ = tx.send(Ok(rtt));
        Some(rtt)
    }

    /// Fail every outstanding ping with `err` (used on timeout sweep and
    /// on dispose).
    pub fn fail_all(&self, err: CorrelatorError) {
        let pending = std::mem::take(&mut *self.pending.lock().expect("ping mutex poisoned"));
        for (_, (_, tx)) in pending {
            let _ = tx.send(Err(err));
        }
    }

    /// Fail and remove one nonce's waiter (used on a single ping's
    /// timeout, leaving others outstanding).
    pub fn fail_one(&self, nonce: u64, err: CorrelatorError) {
        if let Some((_, tx)) = self.pending.lock().expect("ping mutex poisoned").remove(&nonce) {
            let _ = tx.send(Err(err));
        }
    }
}
