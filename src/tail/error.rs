// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Read-path errors. Everything except `Io` is a deliberate close condition
/// the worker maps to a close-cause log line; `FlushTimeout` is an internal
/// sentinel consumed by the multiline assembler and never escapes the stack.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("detected file being truncated")]
    Truncated,

    #[error("file was renamed")]
    Renamed,

    #[error("file was removed")]
    Removed,

    #[error("file inactive")]
    Inactive,

    #[error("reader closed")]
    Closed,

    #[error("end of file reached")]
    Eof,

    #[error("multiline flush timeout")]
    FlushTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Setup, configuration and registry errors.
#[derive(Error, Debug)]
pub enum TailError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("worker setup failed: {0}")]
    Setup(String),

    #[error("scanner limit reached")]
    ScannerLimit,

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TailError>;
