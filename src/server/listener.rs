//! The communication boundary: the accept-loop thread and the line framing
//! used on client connections.

use std::io::{self, BufRead, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::Server;

/// reads one newline-terminated command into `line`, returning `false` on
/// end-of-stream
pub(crate) fn read_command<R: BufRead>(reader: &mut R, line: &mut String) -> io::Result<bool> {
    line.clear();
    Ok(reader.read_line(line)? != 0)
}

/// writes one reply line and flushes it to the client
pub(crate) fn send_reply<W: Write>(writer: &mut W, reply: &str) -> io::Result<()> {
    writer.write_all(reply.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// The accept-loop thread handing new connections to the worker layer.
pub struct Listener {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl Listener {
    /// spawns the accept loop over an already-bound socket
    ///
    /// # Errors
    /// returns an error if the socket's address cannot be read or the
    /// thread cannot be spawned
    pub fn spawn(server: Arc<Server>, listener: TcpListener) -> io::Result<Listener> {
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || accept_loop(server, listener, flag))?;
        Ok(Listener {
            handle,
            stop,
            local_addr,
        })
    }

    /// the address the listener is bound to; useful when port 0 was asked
    /// for
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the accept loop and joins its thread.
    ///
    /// A thread blocked in `accept` cannot be interrupted directly, so a
    /// loopback wake-up connection is made after the stop flag goes up; the
    /// admission check refuses that connection before it can register.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        let wake = SocketAddr::from(([127, 0, 0, 1], self.local_addr.port()));
        match TcpStream::connect(wake) {
            Ok(stream) => drop(stream),
            Err(err) => error!("listener wake-up connection failed: {err}"),
        }
        if self.handle.join().is_err() {
            error!("listener thread panicked");
        }
    }
}

fn accept_loop(server: Arc<Server>, listener: TcpListener, stop: Arc<AtomicBool>) {
    loop {
        let conn = listener.accept();
        if stop.load(Ordering::Acquire) {
            break;
        }
        match conn {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                if let Err(err) = server.spawn_worker(stream) {
                    error!("failed to start a worker: {err:?}");
                }
            }
            Err(err) => error!("connection failed: {err}"),
        }
    }
    debug!("listener stopped");
}
