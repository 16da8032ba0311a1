use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::{PausePolicy, PlayerConfig};
use crate::emitter::KeyEmitter;
use crate::error::TransportError;
use crate::events::{PlaybackUpdate, StatusSnapshot, StopReason};
use crate::timing::{
    ActiveKey, Command, Engine, Piece, PlaybackState, Shared, Status, SustainClassifier, Wake,
    dispatch_loop,
};

pub const MIN_TEMPO: f64 = 0.1;
pub const MAX_TEMPO: f64 = 5.0;

const UPDATE_CAPACITY: usize = 256;

/// Play/pause/stop control over a single piece at a time.
///
/// Owns the dispatch thread and all key-press state. Every command runs
/// synchronously: when it returns, the keys it had to release are released.
pub struct Transport {
    engine: Arc<Engine>,
    wake_tx: Sender<Wake>,
    update_rx: Receiver<PlaybackUpdate>,
    classifier: SustainClassifier,
    worker: Option<JoinHandle<()>>,
}

impl Transport {
    /// Spawns the dispatch thread. Fails only if the thread cannot be created.
    pub fn new(emitter: impl KeyEmitter + 'static, config: &PlayerConfig) -> io::Result<Self> {
        let (wake_tx, wake_rx) = crossbeam::channel::unbounded();
        let (update_tx, update_rx) = crossbeam::channel::bounded(UPDATE_CAPACITY);

        let engine = Arc::new(Engine::new(Shared {
            state: PlaybackState::new(),
            piece: None,
            emitter: Box::new(emitter),
            config: config.playback.clone(),
            updates: update_tx,
        }));

        let worker_engine = engine.clone();
        let worker = std::thread::Builder::new()
            .name("autohold-dispatch".into())
            .spawn(move || dispatch_loop(worker_engine, wake_rx))?;

        Ok(Self {
            engine,
            wake_tx,
            update_rx,
            classifier: SustainClassifier::from(&config.sustain),
            worker: Some(worker),
        })
    }

    fn poke(&self) {
        let _ = self.wake_tx.send(Wake::Poke);
    }

    /// Starts `piece` from the beginning, stopping anything already playing.
    /// Unclassified pieces are classified first.
    pub fn start(&self, mut piece: Piece) {
        if !piece.is_classified() {
            let report = self.classifier.classify(&mut piece);
            debug!(?report, "classified piece");
        }

        let mut shared = self.engine.shared.lock();
        if matches!(shared.state.status, Status::Playing | Status::Paused) {
            shared.release_all();
            shared.notify(PlaybackUpdate::Stopped {
                reason: StopReason::Replaced,
            });
        }
        info!(events = piece.len(), tempo = piece.tempo_factor(), "starting piece");
        shared.begin(Arc::new(piece), Instant::now());
        drop(shared);
        self.poke();
    }

    /// Restarts the most recently started piece from the beginning.
    pub fn replay(&self) -> Result<(), TransportError> {
        let mut shared = self.engine.shared.lock();
        shared.state.status.check(Command::Replay)?;
        let piece = shared.piece.clone().ok_or(TransportError::NoPiece)?;
        info!("replaying piece");
        shared.begin(piece, Instant::now());
        drop(shared);
        self.poke();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), TransportError> {
        let mut shared = self.engine.shared.lock();
        shared.state.status.check(Command::Pause)?;
        let now = Instant::now();

        if shared.config.pause_policy == PausePolicy::Rearm {
            // Taps are never pressed again.
            let mut remaining: Vec<_> = shared
                .state
                .active_holds
                .iter()
                .filter(|(_, active)| active.sustained)
                .map(|(&key, active)| (key, active.release_at.saturating_duration_since(now)))
                .collect();
            remaining.sort_by_key(|&(key, _)| key);
            shared.state.suspended_holds = remaining;
        }
        shared.release_all();
        shared.state.status = Status::Paused;
        shared.state.paused_at = Some(now);

        let cursor = shared.state.cursor;
        info!(cursor, "paused");
        shared.notify(PlaybackUpdate::Paused { cursor });
        drop(shared);
        self.poke();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), TransportError> {
        let mut shared = self.engine.shared.lock();
        shared.state.status.check(Command::Resume)?;
        let now = Instant::now();

        if let Some(paused_at) = shared.state.paused_at.take() {
            shared.state.clock_origin += now.saturating_duration_since(paused_at);
        }
        shared.state.status = Status::Playing;

        let rearm = std::mem::take(&mut shared.state.suspended_holds);
        for (key, remaining) in rearm {
            if remaining.is_zero() {
                continue;
            }
            let Some(release_at) = now.checked_add(remaining) else {
                continue;
            };
            shared.press(key);
            shared.state.active_holds.insert(
                key,
                ActiveKey {
                    release_at,
                    sustained: true,
                },
            );
        }

        let cursor = shared.state.cursor;
        info!(cursor, "resumed");
        shared.notify(PlaybackUpdate::Resumed { cursor });
        drop(shared);
        self.poke();
        Ok(())
    }

    /// Stops playback. No key is held once this returns.
    pub fn stop(&self) -> Result<(), TransportError> {
        let mut shared = self.engine.shared.lock();
        shared.state.status.check(Command::Stop)?;
        halt(&mut shared);
        info!("stopped");
        shared.notify(PlaybackUpdate::Stopped {
            reason: StopReason::Requested,
        });
        drop(shared);
        self.engine.stopped.notify_all();
        self.poke();
        Ok(())
    }

    /// Moves playback to piece time `time_ms`, releasing held keys. The next
    /// note played is the first with an onset at or after `time_ms`. Negative
    /// times seek to the start; non-finite ones are rejected.
    pub fn seek(&self, time_ms: f64) -> Result<(), TransportError> {
        if !time_ms.is_finite() {
            return Err(TransportError::InvalidPosition(time_ms));
        }
        let mut shared = self.engine.shared.lock();
        shared.state.status.check(Command::Seek)?;
        let Some(piece) = shared.piece.clone() else {
            return Err(TransportError::NoPiece);
        };
        let time_ms = time_ms.max(0.0);

        shared.release_all();
        shared.state.suspended_holds.clear();
        shared.state.cursor = piece.cursor_at(time_ms);
        let anchor_at = shared.state.paused_at.unwrap_or_else(Instant::now);
        shared.state.anchor(time_ms, anchor_at);

        let cursor = shared.state.cursor;
        info!(cursor, position_ms = time_ms, "seeked");
        shared.notify(PlaybackUpdate::Seeked {
            cursor,
            position_ms: time_ms,
        });
        drop(shared);
        self.poke();
        Ok(())
    }

    /// Changes playback speed, keeping the current position. Clamped to
    /// `MIN_TEMPO..=MAX_TEMPO`. Keys already held keep their release times.
    pub fn set_tempo(&self, tempo_factor: f64) -> Result<(), TransportError> {
        if !tempo_factor.is_finite() || tempo_factor <= 0.0 {
            return Err(TransportError::InvalidTempo(tempo_factor));
        }
        let tempo_factor = tempo_factor.clamp(MIN_TEMPO, MAX_TEMPO);

        let mut shared = self.engine.shared.lock();
        let now = Instant::now();
        let position = shared.state.position_ms(now);
        let anchor_at = shared.state.paused_at.unwrap_or(now);
        shared.state.tempo_factor = tempo_factor;
        if matches!(shared.state.status, Status::Playing | Status::Paused) {
            shared.state.anchor(position, anchor_at);
        }

        info!(tempo_factor, "tempo changed");
        shared.notify(PlaybackUpdate::TempoChanged { tempo_factor });
        drop(shared);
        self.poke();
        Ok(())
    }

    pub fn status(&self) -> StatusSnapshot {
        let shared = self.engine.shared.lock();
        let state = &shared.state;
        let elapsed = match state.status {
            Status::Playing | Status::Paused => {
                Duration::try_from_secs_f64(state.position_ms(Instant::now()) / 1000.0)
                    .unwrap_or(Duration::MAX)
            }
            Status::Idle | Status::Stopped => Duration::ZERO,
        };
        StatusSnapshot {
            status: state.status,
            cursor: state.cursor,
            elapsed,
            tempo_factor: state.tempo_factor,
            held_keys: state.active_holds.len(),
        }
    }

    /// Stream of transport updates. Clones compete for the same updates.
    pub fn updates(&self) -> Receiver<PlaybackUpdate> {
        self.update_rx.clone()
    }

    /// Blocks until playback is stopped or `timeout` elapses. Returns whether
    /// the transport is stopped.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.engine.shared.lock();
        while shared.state.status != Status::Stopped {
            if self
                .engine
                .stopped
                .wait_until(&mut shared, deadline)
                .timed_out()
            {
                return shared.state.status == Status::Stopped;
            }
        }
        true
    }
}

/// Releases everything and parks the state in `Stopped`.
fn halt(shared: &mut Shared) {
    shared.release_all();
    shared.state.suspended_holds.clear();
    shared.state.paused_at = None;
    shared.state.status = Status::Stopped;
}

impl Drop for Transport {
    fn drop(&mut self) {
        {
            let mut shared = self.engine.shared.lock();
            if matches!(shared.state.status, Status::Playing | Status::Paused) {
                halt(&mut shared);
            }
        }
        let _ = self.wake_tx.send(Wake::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                warn!(error = ?e, "dispatch thread panicked");
            }
        }
    }
}
