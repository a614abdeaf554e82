//! this binary starts the treedb server
//! usage: `treedb-server <PORT>`
//!
//! Clients speak the one-command-per-line protocol over TCP; the operator
//! drives the console on standard input (`p [PATH]`, `s`, `g`, EOF to shut
//! down). SIGINT cancels every connected client without stopping the
//! server.

use std::io;
use std::net::TcpListener;
use std::process::exit;
use std::sync::Arc;

use clap::{crate_version, Arg, Command};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use treedb::server::console;
use treedb::server::listener::Listener;
use treedb::server::signal::{install_process_mask, SignalMonitor};
use treedb::server::Server;
use treedb::{DbError, Result};

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    port: u16,
}

impl Opt {
    /// validates the `port` parameter
    /// # Errors
    /// returns [`DbError::Parsing`] if the port is not a number in range
    fn build(port: &str) -> Result<Opt> {
        let port = port
            .parse::<u16>()
            .map_err(|_| DbError::Parsing(format!("could not parse {} into a TCP port", port)))?;
        Ok(Opt { port })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = Command::new("treedb-server")
        .version(crate_version!())
        .about("a multi-threaded, in-memory key/value database server")
        .arg(
            Arg::new("port")
                .value_name("PORT")
                .help("the TCP port the server listens on")
                .required(true),
        )
        .try_get_matches();
    let matches = match matches {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{err}");
            exit(1);
        }
    };

    let port = matches
        .get_one::<String>("port")
        .map(String::as_str)
        .unwrap_or_default();
    let opt = match Opt::build(port) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    // the signal mask must be in place before any thread exists, so every
    // thread inherits it and only the monitor consumes SIGINT
    install_process_mask()?;

    let server = Server::new();
    let tcp = TcpListener::bind(("0.0.0.0", opt.port))?;
    info!("treedb-server {}", env!("CARGO_PKG_VERSION"));
    info!("listening on {}", tcp.local_addr()?);

    let monitor = SignalMonitor::spawn(Arc::clone(&server))?;
    let listener = Listener::spawn(Arc::clone(&server), tcp)?;

    // the operator console runs on the main thread until end-of-input
    console::run(&server, io::stdin().lock())?;

    // Shutdown, in load-bearing order: stop the signal plane, refuse new
    // workers, cancel the rest, wait for quiescence, then free the tree and
    // join the listener.
    monitor.shutdown();
    server.stop_accepting();
    server.cancel_all();
    server.await_quiescence();
    assert!(server.registry_is_empty());
    server.db().clear();
    listener.shutdown();

    info!("graceful shutdown complete");
    Ok(())
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        // log to stderr so stdout stays free for operator output
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
