//! The shared registry of live workers and the shutdown quiescence barrier.
//!
//! Two locks with a fixed order: the record map sits under one mutex, the
//! active-worker count and its condition under another, and a worker only
//! ever takes them one at a time (map first). Neither is ever held together
//! with a tree lock.

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};

use parking_lot::{Condvar, Mutex};

use super::control::CancelToken;

/// identifier assigned to each worker thread
pub type WorkerId = u64;

/// Per-connection bookkeeping held by the registry.
///
/// The record owns a handle to the client socket and shuts it down when the
/// record is destroyed, so deregistration always severs the connection.
pub struct WorkerRecord {
    stream: TcpStream,
    cancel: CancelToken,
}

impl WorkerRecord {
    /// builds the record for a newly accepted connection
    pub fn new(stream: TcpStream, cancel: CancelToken) -> WorkerRecord {
        WorkerRecord { stream, cancel }
    }

    /// flags the worker's token and shuts its socket down, so a read
    /// blocked on the connection returns immediately
    fn cancel(&self) {
        self.cancel.cancel();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for WorkerRecord {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// The registry of live workers plus the quiescence barrier shutdown waits
/// on.
pub struct Registry {
    records: Mutex<HashMap<WorkerId, WorkerRecord>>,
    active: Mutex<usize>,
    all_gone: Condvar,
}

impl Registry {
    /// creates an empty registry
    pub fn new() -> Registry {
        Registry {
            records: Mutex::new(HashMap::new()),
            active: Mutex::new(0),
            all_gone: Condvar::new(),
        }
    }

    /// adds a worker's record to the registry
    pub fn insert(&self, id: WorkerId, record: WorkerRecord) {
        self.records.lock().insert(id, record);
    }

    /// counts one more active worker
    pub fn incr_active(&self) {
        *self.active.lock() += 1;
    }

    /// Removes the record for `id`, closing its connection, then drops the
    /// active count and broadcasts the quiescence condition when it reaches
    /// zero. Called from every worker exit path.
    pub fn deregister(&self, id: WorkerId) {
        let record = self.records.lock().remove(&id);
        {
            let mut active = self.active.lock();
            *active -= 1;
            if *active == 0 {
                self.all_gone.notify_all();
            }
        }
        drop(record);
    }

    /// Requests cancellation of every registered worker. The registry is
    /// not mutated here; each worker deregisters itself on the way out.
    pub fn cancel_all(&self) {
        let records = self.records.lock();
        for record in records.values() {
            record.cancel();
        }
    }

    /// blocks until the active-worker count reaches zero
    pub fn await_quiescence(&self) {
        let mut active = self.active.lock();
        while *active != 0 {
            self.all_gone.wait(&mut active);
        }
    }

    /// number of registered workers
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// whether the registry holds no workers
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
