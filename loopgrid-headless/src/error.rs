use std::path::PathBuf;

use loopgrid_core::LooperError;
use thiserror::Error;

/// Errors raised by the headless runner.
#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("script line {line}: {message}")]
    Script { line: usize, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid runner config: {0}")]
    Config(String),

    #[error("synthetic camera failed: {0}")]
    Camera(String),

    #[error(transparent)]
    Looper(#[from] LooperError),
}
