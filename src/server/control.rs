//! Operator pause/resume gate and the cooperative cancellation token.
//!
//! Cancellation here is cooperative: a worker is never torn down from the
//! outside. Its token is flagged, its socket is shut down so a blocked read
//! returns, and the gate is woken so a paused worker re-checks the token.
//! The blocking read and the gate wait are the only two points a worker can
//! be cancelled at, and it never holds a tree lock at either.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// A shared flag standing in for asynchronous thread cancellation.
///
/// Every clone observes the same flag, so the registry can request
/// cancellation while the worker polls it at its cancellation points.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// creates a token that has not been cancelled
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// requests cancellation, visible to every clone of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// The operator's pause gate.
///
/// While the gate is closed, workers block in [`wait`] between reading a
/// command and interpreting it; commands already past the gate run to
/// completion. The guard-based locking releases the gate mutex on every
/// exit path, including a cancellation observed mid-wait.
///
/// [`wait`]: ClientControl::wait
pub struct ClientControl {
    stopped: Mutex<bool>,
    go: Condvar,
}

impl ClientControl {
    /// creates an open gate
    pub fn new() -> ClientControl {
        ClientControl {
            stopped: Mutex::new(false),
            go: Condvar::new(),
        }
    }

    /// blocks while the gate is closed.
    ///
    /// Returns `false` if `cancel` fired while waiting; the caller must
    /// exit without executing another command.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        let mut stopped = self.stopped.lock();
        while *stopped && !cancel.is_cancelled() {
            self.go.wait(&mut stopped);
        }
        !cancel.is_cancelled()
    }

    /// closes the gate; the next pass through [`wait`] blocks
    ///
    /// [`wait`]: ClientControl::wait
    pub fn stop(&self) {
        *self.stopped.lock() = true;
    }

    /// opens the gate and wakes every waiting worker
    pub fn release(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = false;
        self.go.notify_all();
    }

    /// wakes waiting workers without opening the gate, so cancelled ones
    /// can observe their tokens and exit
    pub fn wake_all(&self) {
        let _stopped = self.stopped.lock();
        self.go.notify_all();
    }
}

impl Default for ClientControl {
    fn default() -> Self {
        Self::new()
    }
}
