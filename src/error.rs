//! Error types for the MPU simulator

use std::path::PathBuf;

use thiserror::Error;

/// Result type for simulator operations
pub type SimResult<T> = Result<T, SimError>;

/// Errors that abort a single simulated operation.
///
/// All of these are raised before any simulation work begins.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid shape: {message}")]
    InvalidShape { message: String },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Channel count {channels} is not divisible by group count {groups}")]
    GroupMismatch { channels: usize, groups: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },
}

impl SimError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SimError::InvalidConfig { message: msg.into() }
    }

    pub fn invalid_shape(msg: impl Into<String>) -> Self {
        SimError::InvalidShape { message: msg.into() }
    }

    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        SimError::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config_parse(msg: impl Into<String>) -> Self {
        SimError::ConfigParse { message: msg.into() }
    }
}

/// Failure to persist a statistics row.
///
/// Never fatal to the operation that produced the row; the façade reports it
/// as a warning next to the computed tensor.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Cannot create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Log file handle for {path} was poisoned by a panicking writer")]
    Poisoned { path: PathBuf },
}

impl LogError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            LogError::CreateDir { path, .. }
            | LogError::Open { path, .. }
            | LogError::Write { path, .. }
            | LogError::Poisoned { path } => path,
        }
    }
}
