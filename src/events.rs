use std::time::{Duration, Instant};

use crate::keys::Key;
use crate::timing::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMessage {
    Press,
    Release,
}

/// A key action as seen by an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAction {
    pub key: Key,
    pub message: KeyMessage,
}

/// A key action together with when it was emitted.
#[derive(Debug, Clone)]
pub struct TimedAction {
    pub at: Instant,
    pub action: KeyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Finished,
    Replaced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUpdate {
    Started { events: usize },
    Paused { cursor: usize },
    Resumed { cursor: usize },
    Seeked { cursor: usize, position_ms: f64 },
    TempoChanged { tempo_factor: f64 },
    Stopped { reason: StopReason },
    Drift { cursor: usize, late: Duration },
}

/// Read-only view of the transport for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub status: Status,
    pub cursor: usize,
    /// Position in piece time.
    pub elapsed: Duration,
    pub tempo_factor: f64,
    pub held_keys: usize,
}
