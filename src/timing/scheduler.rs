use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::state_machine::wall_offset;
use super::{ActiveKey, Articulation, Piece, PlaybackState, Status};
use crate::config::PlaybackConfig;
use crate::emitter::KeyEmitter;
use crate::events::{PlaybackUpdate, StopReason};
use crate::keys::Key;

/// Messages that interrupt the dispatch loop's suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Transport state changed; recompute the next deadline.
    Poke,
    Shutdown,
}

/// Outcome of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// An action was emitted; call again immediately.
    Fired,
    /// Nothing is due before this instant.
    Wait(Instant),
    /// Not playing; wait for a transport command.
    Idle,
    /// The piece ran out and playback stopped.
    Finished,
}

/// State shared by the transport and the dispatch loop. All key actions
/// happen with this locked, so transitions and dispatch never interleave.
pub struct Shared {
    pub state: PlaybackState,
    pub piece: Option<Arc<Piece>>,
    pub emitter: Box<dyn KeyEmitter>,
    pub config: PlaybackConfig,
    pub updates: Sender<PlaybackUpdate>,
}

pub struct Engine {
    pub shared: Mutex<Shared>,
    /// Signalled on every transition into `Stopped`.
    pub stopped: Condvar,
}

impl Engine {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared: Mutex::new(shared),
            stopped: Condvar::new(),
        }
    }
}

impl Shared {
    pub fn notify(&self, update: PlaybackUpdate) {
        // Observers that fall behind miss updates rather than stall playback.
        let _ = self.updates.try_send(update);
    }

    /// Presses `key`. A failed press is still recorded by the caller as held
    /// so that its paired release is attempted.
    pub fn press(&mut self, key: Key) {
        if let Err(e) = self.emitter.press(key) {
            warn!(%key, error = %e, "key press failed");
        }
    }

    pub fn release(&mut self, key: Key) {
        self.state.active_holds.remove(&key);
        if let Err(e) = self.emitter.release(key) {
            warn!(%key, error = %e, "key release failed");
        }
    }

    /// Releases every held key, in key order.
    pub fn release_all(&mut self) {
        let mut keys: Vec<Key> = self.state.active_holds.keys().copied().collect();
        keys.sort();
        for key in keys {
            self.release(key);
        }
    }

    /// Resets state to play `piece` from the top, first onset due after the
    /// configured start delay.
    pub fn begin(&mut self, piece: Arc<Piece>, now: Instant) {
        self.release_all();
        self.state.status = Status::Playing;
        self.state.cursor = 0;
        self.state.tempo_factor = piece.tempo_factor();
        self.state.clock_origin = now.checked_add(self.config.start_delay()).unwrap_or(now);
        self.state.paused_at = None;
        self.state.suspended_holds.clear();
        self.notify(PlaybackUpdate::Started {
            events: piece.len(),
        });
        self.piece = Some(piece);
    }

    /// Performs the next due action, or reports how long to wait for it.
    pub fn step(&mut self, now: Instant) -> Step {
        if self.state.status != Status::Playing {
            return Step::Idle;
        }
        let Some(piece) = self.piece.clone() else {
            return Step::Idle;
        };

        // An onset too far out for an `Instant` is never due.
        let next_press = piece
            .events()
            .get(self.state.cursor)
            .and_then(|event| self.state.fire_time(event.onset_ms));
        let next_release = self.state.next_release();

        match (next_release, next_press) {
            (None, None) => {
                self.finish();
                Step::Finished
            }
            (Some((key, at)), press) if press.is_none_or(|p| at <= p) => {
                if at > now {
                    return Step::Wait(at);
                }
                self.release(key);
                Step::Fired
            }
            (_, Some(fire_at)) => {
                if fire_at > now {
                    return Step::Wait(fire_at);
                }
                self.fire(&piece, fire_at, now);
                Step::Fired
            }
            // Guarded arm above covers every release without a press.
            (Some(_), None) => Step::Idle,
        }
    }

    fn fire(&mut self, piece: &Piece, fire_at: Instant, now: Instant) {
        let cursor = self.state.cursor;
        let event = &piece.events()[cursor];

        let late = now.saturating_duration_since(fire_at);
        if late > self.config.drift_tolerance() {
            warn!(
                cursor,
                late_ms = late.as_secs_f64() * 1000.0,
                "playback fell behind, firing overdue note"
            );
            self.notify(PlaybackUpdate::Drift { cursor, late });
        }

        if self.state.active_holds.contains_key(&event.key) {
            debug!(key = %event.key, "releasing before re-press");
            self.release(event.key);
        }
        self.press(event.key);

        let tap_end = now.checked_add(self.config.tap()).unwrap_or(now);
        let release_at = match event.articulation {
            Some(Articulation::Hold { effective_ms }) => {
                wall_offset(effective_ms, self.state.tempo_factor)
                    .and_then(|hold| fire_at.checked_add(hold))
                    .map_or(tap_end, |end| end.max(tap_end))
            }
            Some(Articulation::Tap) | None => tap_end,
        };
        self.state.active_holds.insert(
            event.key,
            ActiveKey {
                release_at,
                sustained: event.is_sustained(),
            },
        );
        self.state.cursor += 1;
    }

    fn finish(&mut self) {
        self.release_all();
        self.state.status = Status::Stopped;
        info!(events = self.state.cursor, "piece finished");
        self.notify(PlaybackUpdate::Stopped {
            reason: StopReason::Finished,
        });
    }
}

/// Body of the dispatch thread. Runs until a `Wake::Shutdown` arrives or the
/// transport is dropped.
pub fn dispatch_loop(engine: Arc<Engine>, wake_rx: Receiver<Wake>) {
    loop {
        let wait = {
            let mut shared = engine.shared.lock();
            let poll = shared.config.poll_interval();
            loop {
                match shared.step(Instant::now()) {
                    Step::Fired => continue,
                    Step::Wait(at) => {
                        break Some(at.saturating_duration_since(Instant::now()).min(poll));
                    }
                    Step::Finished => {
                        engine.stopped.notify_all();
                        break None;
                    }
                    Step::Idle => break None,
                }
            }
        };

        let message = match wait {
            Some(timeout) => match wake_rx.recv_timeout(timeout) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Wake::Shutdown),
            },
            None => Some(wake_rx.recv().unwrap_or(Wake::Shutdown)),
        };

        if message == Some(Wake::Shutdown) {
            debug!("dispatch loop shutting down");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::emitter::RecordingEmitter;
    use crate::events::KeyMessage;
    use crate::timing::{RawNote, SustainClassifier};

    fn shared(emitter: &RecordingEmitter) -> Shared {
        shared_with_updates(emitter).0
    }

    fn shared_with_updates(emitter: &RecordingEmitter) -> (Shared, Receiver<PlaybackUpdate>) {
        let (updates, update_rx) = crossbeam::channel::bounded(16);
        let shared = Shared {
            state: PlaybackState::new(),
            piece: None,
            emitter: Box::new(emitter.clone()),
            config: PlaybackConfig {
                start_delay_ms: 0.0,
                ..Default::default()
            },
            updates,
        };
        (shared, update_rx)
    }

    fn classified(notes: &[(usize, f64, f64)]) -> Arc<Piece> {
        classified_at(notes, 1.0)
    }

    fn classified_at(notes: &[(usize, f64, f64)], tempo_factor: f64) -> Arc<Piece> {
        let raw = notes
            .iter()
            .map(|&(key, onset, duration)| RawNote::new(key, onset, duration))
            .collect();
        let mut piece = Piece::from_raw(raw, tempo_factor).unwrap();
        SustainClassifier::default().classify(&mut piece);
        Arc::new(piece)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn waits_until(step: Step, expected: Instant) -> bool {
        match step {
            Step::Wait(at) => {
                let diff = if at > expected { at - expected } else { expected - at };
                diff < Duration::from_micros(10)
            }
            _ => false,
        }
    }

    fn messages(emitter: &RecordingEmitter) -> Vec<(usize, KeyMessage)> {
        emitter
            .actions()
            .iter()
            .map(|t| (t.action.key.index(), t.action.message))
            .collect()
    }

    #[test]
    fn steps_through_presses_and_releases_in_time_order() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        shared.begin(classified(&[(0, 0.0, 300.0), (1, 100.0, 0.0)]), t0);

        assert_eq!(shared.step(t0), Step::Fired);
        assert!(waits_until(shared.step(t0), t0 + ms(100)));
        assert_eq!(shared.step(t0 + ms(100)), Step::Fired);
        assert!(waits_until(shared.step(t0 + ms(100)), t0 + ms(140)));
        assert_eq!(shared.step(t0 + ms(140)), Step::Fired);
        assert!(waits_until(shared.step(t0 + ms(140)), t0 + ms(300)));
        assert_eq!(shared.step(t0 + ms(301)), Step::Fired);
        assert_eq!(shared.step(t0 + ms(301)), Step::Finished);
        assert_eq!(shared.state.status, Status::Stopped);

        assert_eq!(
            messages(&emitter),
            vec![
                (0, KeyMessage::Press),
                (1, KeyMessage::Press),
                (1, KeyMessage::Release),
                (0, KeyMessage::Release),
            ]
        );
    }

    #[test]
    fn overdue_notes_all_fire_without_skipping() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        shared.begin(classified(&[(0, 0.0, 0.0), (1, 10.0, 0.0), (2, 20.0, 0.0)]), t0);

        let late = t0 + ms(500);
        while shared.step(late) == Step::Fired {}

        let presses = messages(&emitter)
            .into_iter()
            .filter(|(_, m)| *m == KeyMessage::Press)
            .count();
        assert_eq!(presses, 3);
    }

    #[test]
    fn release_precedes_press_on_same_key() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        // The tap on key 4 outlasts the gap to its next onset.
        shared.begin(classified(&[(4, 0.0, 0.0), (4, 30.0, 0.0)]), t0);

        assert_eq!(shared.step(t0), Step::Fired);
        assert_eq!(shared.step(t0 + ms(30)), Step::Fired);

        assert_eq!(
            messages(&emitter),
            vec![
                (4, KeyMessage::Press),
                (4, KeyMessage::Release),
                (4, KeyMessage::Press),
            ]
        );
    }

    #[test]
    fn releases_win_ties_with_presses() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        shared.begin(classified(&[(0, 0.0, 0.0), (1, 40.0, 0.0)]), t0);

        shared.step(t0);
        assert_eq!(shared.step(t0 + ms(40)), Step::Fired);
        assert_eq!(
            messages(&emitter).last(),
            Some(&(0, KeyMessage::Release))
        );
    }

    #[test]
    fn late_press_reports_drift() {
        let emitter = RecordingEmitter::new();
        let (mut shared, update_rx) = shared_with_updates(&emitter);
        let t0 = Instant::now();
        shared.begin(classified(&[(0, 0.0, 0.0), (1, 50.0, 0.0)]), t0);

        // On time: no drift.
        assert_eq!(shared.step(t0), Step::Fired);
        // 100ms past the second onset, well over the 15ms tolerance.
        while shared.step(t0 + ms(150)) == Step::Fired {}
        assert_eq!(shared.state.cursor, 2);

        let drifts: Vec<_> = update_rx
            .try_iter()
            .filter_map(|update| match update {
                PlaybackUpdate::Drift { cursor, late } => Some((cursor, late)),
                _ => None,
            })
            .collect();
        assert_eq!(drifts.len(), 1);
        let (cursor, late) = drifts[0];
        assert_eq!(cursor, 1);
        assert!(late >= ms(99) && late <= ms(101), "late by {late:?}");
    }

    #[test]
    fn holds_record_whether_they_are_sustained() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        shared.begin(classified(&[(0, 0.0, 300.0), (1, 0.0, 0.0)]), t0);

        assert_eq!(shared.step(t0), Step::Fired);
        assert_eq!(shared.step(t0), Step::Fired);

        let sustained = |index| shared.state.active_holds[&Key::new(index).unwrap()].sustained;
        assert!(sustained(0));
        assert!(!sustained(1));
    }

    #[test]
    fn unrepresentable_times_do_not_stop_the_loop() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        let t0 = Instant::now();
        // At this tempo every non-zero time overflows an `Instant`.
        shared.begin(classified_at(&[(0, 0.0, 300.0), (1, 1000.0, 0.0)], 1e-30), t0);

        assert_eq!(shared.step(t0), Step::Fired);
        // The hold falls back to a tap and the far onset is never due.
        assert!(waits_until(shared.step(t0), t0 + ms(40)));
        assert_eq!(shared.step(t0 + ms(40)), Step::Fired);
        assert_eq!(shared.step(t0 + ms(40)), Step::Finished);

        assert_eq!(
            messages(&emitter),
            vec![(0, KeyMessage::Press), (0, KeyMessage::Release)]
        );
    }

    #[test]
    fn idle_when_not_playing() {
        let emitter = RecordingEmitter::new();
        let mut shared = shared(&emitter);
        assert_eq!(shared.step(Instant::now()), Step::Idle);
    }
}
