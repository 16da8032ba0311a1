use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::keys::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Idle,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Replay,
    Pause,
    Resume,
    Stop,
    Seek,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Replay => "replay",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Seek => "seek",
        }
    }
}

impl Status {
    /// Whether `command` is legal in this state. Starting a piece is always
    /// allowed: it implicitly stops whatever is playing.
    pub fn accepts(self, command: Command) -> bool {
        use Command::*;
        use Status::*;
        match (self, command) {
            (_, Start) => true,
            (Idle, Replay) => false,
            (_, Replay) => true,
            (Playing, Pause) => true,
            (Paused, Resume) => true,
            (Playing | Paused, Stop | Seek) => true,
            _ => false,
        }
    }

    pub fn check(self, command: Command) -> Result<(), TransportError> {
        if self.accepts(command) {
            Ok(())
        } else {
            Err(TransportError::InvalidTransition {
                from: self,
                command: command.name(),
            })
        }
    }
}

/// Converts piece milliseconds at `tempo_factor` into wall time. `None` when
/// the result does not fit a `Duration`.
pub fn wall_offset(piece_ms: f64, tempo_factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(piece_ms / 1000.0 / tempo_factor).ok()
}

/// A key that is currently down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveKey {
    pub release_at: Instant,
    /// Pressed for a sustained note rather than a tap.
    pub sustained: bool,
}

/// Everything the dispatch loop and the transport share.
#[derive(Debug)]
pub struct PlaybackState {
    pub status: Status,
    /// Next unfired event.
    pub cursor: usize,
    /// Wall-clock instant corresponding to piece time zero.
    pub clock_origin: Instant,
    /// Set while paused.
    pub paused_at: Option<Instant>,
    /// Keys currently down and when they are due to be released.
    pub active_holds: HashMap<Key, ActiveKey>,
    /// Holds to re-press on resume under the re-arm pause policy.
    pub suspended_holds: Vec<(Key, Duration)>,
    pub tempo_factor: f64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            status: Status::Idle,
            cursor: 0,
            clock_origin: Instant::now(),
            paused_at: None,
            active_holds: HashMap::new(),
            suspended_holds: Vec::new(),
            tempo_factor: 1.0,
        }
    }

    /// Wall-clock instant at which piece time `piece_ms` is due, or `None`
    /// if it lies beyond what an `Instant` can represent.
    pub fn fire_time(&self, piece_ms: f64) -> Option<Instant> {
        wall_offset(piece_ms, self.tempo_factor)
            .and_then(|offset| self.clock_origin.checked_add(offset))
    }

    /// Current position in piece time.
    pub fn position_ms(&self, now: Instant) -> f64 {
        let reference = match (self.status, self.paused_at) {
            (Status::Paused, Some(at)) => at,
            _ => now,
        };
        reference.saturating_duration_since(self.clock_origin).as_secs_f64()
            * 1000.0
            * self.tempo_factor
    }

    /// Moves the origin so that `piece_ms` maps to `at`.
    pub fn anchor(&mut self, piece_ms: f64, at: Instant) {
        self.clock_origin = wall_offset(piece_ms, self.tempo_factor)
            .and_then(|offset| at.checked_sub(offset))
            .unwrap_or(at);
    }

    /// Next pending release, earliest first, ties broken by key index.
    pub fn next_release(&self) -> Option<(Key, Instant)> {
        self.active_holds
            .iter()
            .map(|(&key, active)| (key, active.release_at))
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use Command::*;
        use Status::*;

        assert!(Idle.accepts(Start));
        assert!(!Idle.accepts(Stop));
        assert!(!Idle.accepts(Resume));
        assert!(!Idle.accepts(Pause));
        assert!(!Idle.accepts(Replay));
        assert!(Playing.accepts(Pause));
        assert!(!Playing.accepts(Resume));
        assert!(Paused.accepts(Resume));
        assert!(!Paused.accepts(Pause));
        assert!(Paused.accepts(Stop));
        assert!(Playing.accepts(Seek));
        assert!(!Stopped.accepts(Stop));
        assert!(!Stopped.accepts(Seek));
        assert!(Stopped.accepts(Start));
        assert!(Stopped.accepts(Replay));
    }

    #[test]
    fn check_reports_state_and_command() {
        let err = Status::Idle.check(Command::Stop).unwrap_err();
        assert_eq!(
            err,
            TransportError::InvalidTransition {
                from: Status::Idle,
                command: "stop"
            }
        );
    }

    #[test]
    fn tempo_scales_fire_times() {
        let mut state = PlaybackState::new();
        state.tempo_factor = 2.0;
        let origin = state.clock_origin;

        assert_eq!(
            state.fire_time(1000.0).map(|at| at - origin),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn unrepresentable_times_do_not_panic() {
        let mut state = PlaybackState::new();
        assert_eq!(state.fire_time(1e30), None);
        assert_eq!(state.fire_time(f64::INFINITY), None);

        let now = Instant::now();
        state.anchor(f64::INFINITY, now);
        assert_eq!(state.clock_origin, now);
    }

    #[test]
    fn anchor_preserves_position() {
        let mut state = PlaybackState::new();
        state.status = Status::Playing;
        let now = Instant::now() + Duration::from_secs(10);
        state.anchor(4000.0, now);
        state.tempo_factor = 2.0;
        state.anchor(4000.0, now);

        assert!((state.position_ms(now) - 4000.0).abs() < 1e-6);
    }
}
