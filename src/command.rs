//! The client command grammar and its interpreter.
//!
//! One command per line; the first byte selects the verb and the remainder
//! is split into whitespace-separated tokens, so `q apple` and `qapple`
//! query the same key. Replies are fixed strings, or the stored value for a
//! successful query, truncated to the caller's reply length.

use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::db::{Database, MAX_ENTRY_LEN};
use crate::server::control::CancelToken;

/// longest accepted command line, in bytes; longer lines are consumed and
/// answered with the ill-formed reply
pub const MAX_COMMAND_LEN: usize = 1024;

/// reply buffer length used by the server's workers
pub const REPLY_LEN: usize = 256;

const ILL_FORMED: &str = "ill-formed command";
const NOT_FOUND: &str = "not found";
const ADDED: &str = "added";
const ALREADY_PRESENT: &str = "already in database";
const REMOVED: &str = "removed";
const NOT_PRESENT: &str = "not in database";
const FILE_PROCESSED: &str = "file processed";
const BAD_FILE: &str = "bad file name";

/// Interprets one client command line and produces the reply, truncated to
/// `reply_len` bytes.
///
/// Returns `None` when `cancel` fired inside a long-running `f` command;
/// the caller must exit without replying.
pub fn interpret_command(
    db: &Database,
    line: &str,
    cancel: &CancelToken,
    reply_len: usize,
) -> Option<String> {
    Some(clamp(run_command(db, line, cancel)?, reply_len))
}

fn run_command(db: &Database, line: &str, cancel: &CancelToken) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() <= 1 || line.len() > MAX_COMMAND_LEN || !line.is_char_boundary(1) {
        return Some(ILL_FORMED.to_string());
    }
    let (verb, rest) = line.split_at(1);
    let mut tokens = rest.split_whitespace();

    let reply = match verb {
        "q" => match arg(tokens.next()) {
            Some(key) => db.query(key).unwrap_or_else(|| NOT_FOUND.to_string()),
            None => ILL_FORMED.to_string(),
        },
        "a" => match (arg(tokens.next()), arg(tokens.next())) {
            (Some(key), Some(value)) => match db.insert(key, value) {
                Ok(true) => ADDED.to_string(),
                Ok(false) => ALREADY_PRESENT.to_string(),
                // a resource failure must not read as a duplicate key
                Err(_) => ILL_FORMED.to_string(),
            },
            _ => ILL_FORMED.to_string(),
        },
        "d" => match arg(tokens.next()) {
            Some(key) => {
                if db.remove(key) {
                    REMOVED.to_string()
                } else {
                    NOT_PRESENT.to_string()
                }
            }
            None => ILL_FORMED.to_string(),
        },
        "f" => match arg(tokens.next()) {
            Some(path) => return process_file(db, path, cancel),
            None => ILL_FORMED.to_string(),
        },
        _ => ILL_FORMED.to_string(),
    };
    Some(reply)
}

/// validates one argument token; anything past the entry size limit is a
/// grammar violation
fn arg(token: Option<&str>) -> Option<&str> {
    token.filter(|t| t.len() <= MAX_ENTRY_LEN)
}

/// Interprets every line of the file at `path`, discarding the per-line
/// replies. This is the one long-running command, so the worker's cancel
/// token is checked between lines; `None` means the worker must exit.
fn process_file(db: &Database, path: &str, cancel: &CancelToken) -> Option<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Some(BAD_FILE.to_string()),
    };
    for line in BufReader::new(file).lines() {
        if cancel.is_cancelled() {
            return None;
        }
        let Ok(line) = line else {
            break;
        };
        // nested `f` commands recurse; a cancellation inside propagates out
        run_command(db, &line, cancel)?;
    }
    Some(FILE_PROCESSED.to_string())
}

/// truncates a reply to `len` bytes on a character boundary
fn clamp(mut reply: String, len: usize) -> String {
    if reply.len() > len {
        let mut end = len;
        while !reply.is_char_boundary(end) {
            end -= 1;
        }
        reply.truncate(end);
    }
    reply
}
