use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use crate::error::EmitterError;
use crate::events::{KeyAction, KeyMessage, TimedAction};
use crate::keys::{Key, KeyLayout};

/// The capability that actually presses keys in the host game.
///
/// Both calls must be fast and safe to repeat. Timing is never the emitter's
/// concern; it is called exactly when an action is due.
pub trait KeyEmitter: Send {
    fn press(&mut self, key: Key) -> Result<(), EmitterError>;
    fn release(&mut self, key: Key) -> Result<(), EmitterError>;
}

impl<E: KeyEmitter + ?Sized> KeyEmitter for Box<E> {
    fn press(&mut self, key: Key) -> Result<(), EmitterError> {
        (**self).press(key)
    }

    fn release(&mut self, key: Key) -> Result<(), EmitterError> {
        (**self).release(key)
    }
}

/// Logs every action with its keyboard character. Used for dry runs.
pub struct TracingEmitter {
    layout: KeyLayout,
}

impl TracingEmitter {
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }
}

impl KeyEmitter for TracingEmitter {
    fn press(&mut self, key: Key) -> Result<(), EmitterError> {
        let ch = self.layout.char_for(key).ok_or_else(|| EmitterError::Rejected {
            key,
            reason: "no keyboard binding".into(),
        })?;
        info!(%key, %ch, "press");
        Ok(())
    }

    fn release(&mut self, key: Key) -> Result<(), EmitterError> {
        let ch = self.layout.char_for(key).ok_or_else(|| EmitterError::Rejected {
            key,
            reason: "no keyboard binding".into(),
        })?;
        info!(%key, %ch, "release");
        Ok(())
    }
}

/// Records every action with a timestamp. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    log: Arc<Mutex<Vec<TimedAction>>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<TimedAction> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    /// Keys pressed and not yet released according to the log.
    pub fn held_keys(&self) -> Vec<Key> {
        let mut held: Vec<Key> = Vec::new();
        for timed in self.log.lock().iter() {
            match timed.action.message {
                KeyMessage::Press => {
                    if !held.contains(&timed.action.key) {
                        held.push(timed.action.key);
                    }
                }
                KeyMessage::Release => held.retain(|&k| k != timed.action.key),
            }
        }
        held
    }

    fn record(&self, key: Key, message: KeyMessage) {
        self.log.lock().push(TimedAction {
            at: Instant::now(),
            action: KeyAction { key, message },
        });
    }
}

impl KeyEmitter for RecordingEmitter {
    fn press(&mut self, key: Key) -> Result<(), EmitterError> {
        self.record(key, KeyMessage::Press);
        Ok(())
    }

    fn release(&mut self, key: Key) -> Result<(), EmitterError> {
        self.record(key, KeyMessage::Release);
        Ok(())
    }
}
