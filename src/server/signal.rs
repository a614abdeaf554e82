//! Process signal plumbing: the SIGINT monitor thread and the mask it
//! relies on.
//!
//! SIGINT is blocked process-wide before any thread is spawned, so the
//! monitor's synchronous `sigwait` is the only place the signal is ever
//! delivered. An interrupt cancels every registered worker but leaves the
//! listener and the operator console running. SIGPIPE is ignored so writes
//! to disconnected clients surface as plain I/O errors inside the worker.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::thread::JoinHandleExt;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::Server;

/// Blocks SIGINT for the whole process and ignores SIGPIPE.
///
/// Must run on the main thread before any other thread exists; the mask is
/// inherited, which is what funnels SIGINT to the monitor's `sigwait`.
///
/// # Errors
/// returns the underlying OS error if the mask or disposition cannot be
/// installed
pub fn install_process_mask() -> io::Result<()> {
    let set = sigint_set();
    let err = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if err != 0 {
        return Err(io::Error::from_raw_os_error(err));
    }
    if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// a signal set holding only SIGINT
fn sigint_set() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGINT);
        set.assume_init()
    }
}

/// The dedicated thread that owns SIGINT delivery.
///
/// On each interrupt it announces itself on stdout and cancels every
/// registered worker; the server keeps accepting new connections.
pub struct SignalMonitor {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl SignalMonitor {
    /// spawns the monitor thread
    ///
    /// # Errors
    /// returns an error if the thread cannot be spawned
    pub fn spawn(server: Arc<Server>) -> io::Result<SignalMonitor> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("sigint-monitor".to_string())
            .spawn(move || monitor(server, flag))?;
        Ok(SignalMonitor { handle, shutdown })
    }

    /// Stops the monitor and joins it.
    ///
    /// The shutdown flag goes up first, then a directed SIGINT nudges the
    /// thread out of `sigwait`; it sees the flag and exits without
    /// announcing an interrupt.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = unsafe { libc::pthread_kill(self.handle.as_pthread_t(), libc::SIGINT) };
        if self.handle.join().is_err() {
            error!("signal monitor thread panicked");
        }
    }
}

fn monitor(server: Arc<Server>, shutdown: Arc<AtomicBool>) {
    let set = sigint_set();
    loop {
        let mut sig: libc::c_int = 0;
        let err = unsafe { libc::sigwait(&set, &mut sig) };
        if err != 0 {
            // per the error-handling policy, a broken signal plane is fatal
            eprintln!("sigwait: {}", io::Error::from_raw_os_error(err));
            process::exit(1);
        }
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        println!("SIGINT received, cancelling all clients");
        server.cancel_all();
    }
    debug!("signal monitor stopped");
}
