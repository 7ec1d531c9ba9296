//! Error types for `Accorcia` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `Accorcia` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration loading failures, tagged with the offending file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
