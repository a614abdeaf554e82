//! The worker-lifecycle layer and the shared state of one running server.
//!
//! Each accepted connection gets its own worker thread. A worker admits
//! itself, registers in the shared [`registry`], then loops reading one
//! command, passing the pause gate, interpreting it, and writing the reply.
//! A drop guard deregisters it on every exit path, and the control plane
//! reaches running workers only through their cancel tokens.

pub mod console;
pub mod control;
pub mod listener;
pub mod registry;
pub mod signal;

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::command::{interpret_command, REPLY_LEN};
use crate::db::Database;
use crate::error::Result;
use control::{CancelToken, ClientControl};
use listener::{read_command, send_reply};
use registry::{Registry, WorkerId, WorkerRecord};

/// Shared state of one running server: the database, the worker registry,
/// the pause gate, and the accept flag.
///
/// The lock families here are ordered accept-flag, then registry, then the
/// active count; the gate and the tree locks stand alone. No thread ever
/// holds locks from two families at once except a registering worker, which
/// follows that fixed order.
pub struct Server {
    db: Database,
    registry: Registry,
    gate: ClientControl,
    accepting: Mutex<bool>,
    next_worker_id: AtomicU64,
}

impl Server {
    /// creates a server with an empty database that admits new workers
    pub fn new() -> Arc<Server> {
        Arc::new(Server {
            db: Database::new(),
            registry: Registry::new(),
            gate: ClientControl::new(),
            accepting: Mutex::new(true),
            next_worker_id: AtomicU64::new(0),
        })
    }

    /// the shared database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// spawns the worker thread for a newly accepted connection
    ///
    /// # Errors
    /// returns an error if the stream cannot be cloned for the worker's
    /// record or the thread cannot be spawned
    pub fn spawn_worker(self: &Arc<Server>, stream: TcpStream) -> Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let record = WorkerRecord::new(stream.try_clone()?, cancel.clone());
        let server = Arc::clone(self);
        thread::Builder::new()
            .name(format!("client-{id}"))
            .spawn(move || run_client(server, id, record, stream, cancel))?;
        Ok(())
    }

    /// closes the pause gate; in-flight commands finish first
    pub fn stop_clients(&self) {
        self.gate.stop();
    }

    /// opens the pause gate and wakes every paused worker
    pub fn release_clients(&self) {
        self.gate.release();
    }

    /// Cancels every registered worker. The registry itself is untouched;
    /// workers deregister through their cleanup guards as they exit.
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
        // paused workers re-check their tokens once woken
        self.gate.wake_all();
    }

    /// refuses admission to workers spawned from now on
    pub fn stop_accepting(&self) {
        *self.accepting.lock() = false;
    }

    /// blocks until every registered worker has deregistered
    pub fn await_quiescence(&self) {
        self.registry.await_quiescence();
    }

    /// whether the registry holds no workers
    pub fn registry_is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

/// body of one worker thread, from admission to cleanup
fn run_client(
    server: Arc<Server>,
    id: WorkerId,
    record: WorkerRecord,
    stream: TcpStream,
    cancel: CancelToken,
) {
    // Admission and registration happen under the accept-flag lock, so a
    // shutdown that clears the flag can never slip between them and strand
    // an uncancellable worker in the registry.
    {
        let accepting = server.accepting.lock();
        if !*accepting {
            debug!(id, "connection refused, server no longer accepting");
            return; // the record drops here, closing the connection
        }
        server.registry.insert(id, record);
        server.registry.incr_active();
    }
    let _cleanup = WorkerCleanup {
        server: &server,
        id,
    };

    let reader = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            error!(id, "cannot clone client stream: {err}");
            return;
        }
    };
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(stream);
    let mut line = String::new();

    loop {
        match read_command(&mut reader, &mut line) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                if !cancel.is_cancelled() {
                    debug!(id, "read failed: {err}");
                }
                break;
            }
        }
        // the pause gate doubles as a cancellation point
        if !server.gate.wait(&cancel) {
            break;
        }
        let Some(reply) = interpret_command(&server.db, &line, &cancel, REPLY_LEN) else {
            break;
        };
        if let Err(err) = send_reply(&mut writer, &reply) {
            if !cancel.is_cancelled() {
                debug!(id, "write failed: {err}");
            }
            break;
        }
    }
}

/// Deregistration guard armed once a worker is registered.
///
/// Dropping it removes the record, drops the active count, and closes the
/// connection; it runs on normal exit, cancellation, and panic alike.
struct WorkerCleanup<'a> {
    server: &'a Server,
    id: WorkerId,
}

impl Drop for WorkerCleanup<'_> {
    fn drop(&mut self) {
        self.server.registry.deregister(self.id);
        debug!(id = self.id, "worker deregistered");
    }
}
