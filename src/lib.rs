//! Auto-performs instrument sheets by emitting timed key presses, holding
//! long notes for their full length and tapping short ones.

pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod keys;
pub mod sheet;
pub mod timing;
pub mod transport;

pub use config::{PausePolicy, PlayerConfig};
pub use emitter::{KeyEmitter, RecordingEmitter, TracingEmitter};
pub use error::{ConfigError, EmitterError, SheetError, TransportError};
pub use events::{KeyAction, KeyMessage, PlaybackUpdate, StatusSnapshot, StopReason};
pub use keys::{KEY_COUNT, Key, KeyLayout};
pub use sheet::Sheet;
pub use timing::{
    Articulation, MAX_TIME_MS, NoteEvent, Piece, RawNote, Status, SustainClassifier,
};
pub use transport::Transport;
