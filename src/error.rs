use thiserror::Error;

use crate::keys::Key;
use crate::timing::Status;

#[derive(Error, Debug)]
pub enum SheetError {
    /// A raw note could not be turned into a `NoteEvent`. Nothing is loaded.
    #[error("Malformed sheet at note {index}: {reason}")]
    MalformedSheet { index: usize, reason: String },

    #[error("Sheet contains no notes")]
    Empty,

    #[error("Invalid sheet JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read sheet: {0}")]
    Io(#[from] std::io::Error),
}

impl SheetError {
    pub fn malformed(index: usize, reason: impl Into<String>) -> Self {
        SheetError::MalformedSheet {
            index,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Cannot {command} while {from:?}")]
    InvalidTransition { from: Status, command: &'static str },

    #[error("No piece has been started")]
    NoPiece,

    #[error("Tempo factor must be finite and positive, got {0}")]
    InvalidTempo(f64),

    #[error("Seek position must be a finite number of milliseconds, got {0}")]
    InvalidPosition(f64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmitterError {
    #[error("Input device unavailable")]
    DeviceUnavailable,

    #[error("Key {key} rejected: {reason}")]
    Rejected { key: Key, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Config value `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}
