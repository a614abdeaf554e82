//! The operator console: a line loop over standard input (or any reader)
//! driving snapshots, pause, and resume.

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::sync::Arc;

use tracing::warn;

use super::Server;

/// Runs the operator console until end-of-input.
///
/// The first whitespace-separated token of each line selects the command:
/// `p [PATH]` snapshots the database to PATH (created or truncated) or to
/// stdout when no path is given, `s` pauses all client workers at their
/// next gate pass, `g` resumes them. Blank lines and unknown commands are
/// ignored. Returning means the operator closed the console and the caller
/// should run the shutdown sequence.
///
/// # Errors
/// returns an error only if reading from `input` itself fails
pub fn run<R: BufRead>(server: &Arc<Server>, input: R) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            None => continue,
            Some("p") => snapshot(server, tokens.next()),
            Some("s") => {
                println!("stopping all clients");
                server.stop_clients();
            }
            Some("g") => {
                println!("releasing all clients");
                server.release_clients();
            }
            Some(_) => continue,
        }
    }
    Ok(())
}

/// writes a snapshot to `path`, or to stdout when no path was given; a file
/// that cannot be created is logged and the snapshot skipped
fn snapshot(server: &Arc<Server>, path: Option<&str>) {
    let result = match path {
        None => server.db().snapshot(&mut io::stdout().lock()),
        Some(path) => match File::create(path) {
            Ok(file) => {
                let mut out = BufWriter::new(file);
                server.db().snapshot(&mut out).and_then(|()| out.flush())
            }
            Err(err) => {
                warn!(path, "cannot create snapshot file: {err}");
                return;
            }
        },
    };
    if let Err(err) = result {
        warn!("snapshot failed: {err}");
    }
}
