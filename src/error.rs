use std::io;
use thiserror::Error;

use crate::db::MAX_ENTRY_LEN;

/// type alias for all operations on the database that could fail with a [`DbError`]
pub type Result<T> = std::result::Result<T, DbError>;

/// Error variants used by the database and server.
/// It wraps any lower level errors from third party crates
#[derive(Error)]
pub enum DbError {
    /// variant for errors caused by std::io
    #[error("IO error")]
    Io {
        /// source of the IO Error
        #[from]
        source: io::Error,
    },

    /// variant for a key or value exceeding the per-entry size limit
    #[error("key or value exceeds {MAX_ENTRY_LEN} bytes")]
    EntryTooLong,

    /// variant for errors when parsing strings to some other type
    #[error("{}", .0)]
    Parsing(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
