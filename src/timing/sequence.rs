use serde::{Deserialize, Serialize};

use crate::error::SheetError;
use crate::keys::Key;

/// Latest onset and longest duration a piece may contain: one day.
pub const MAX_TIME_MS: f64 = 86_400_000.0;

fn check_time(index: usize, what: &str, value: f64) -> Result<(), SheetError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SheetError::malformed(
            index,
            format!("{what} {value} is not a non-negative number"),
        ));
    }
    if value > MAX_TIME_MS {
        return Err(SheetError::malformed(
            index,
            format!("{what} {value} exceeds {MAX_TIME_MS} ms"),
        ));
    }
    Ok(())
}

/// A note as delivered by a sheet loader, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNote {
    pub key: usize,
    pub onset_ms: f64,
    pub duration_ms: f64,
}

impl RawNote {
    pub fn new(key: usize, onset_ms: f64, duration_ms: f64) -> Self {
        Self {
            key,
            onset_ms,
            duration_ms,
        }
    }
}

/// How a note is to be played, decided by the sustain classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Articulation {
    /// Released after the configured tap length.
    Tap,
    /// Held for `effective_ms` of piece time.
    Hold { effective_ms: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub key: Key,
    /// Milliseconds from piece start.
    pub onset_ms: f64,
    /// Authored duration in milliseconds.
    pub nominal_ms: f64,
    /// `None` until the piece has been classified.
    pub articulation: Option<Articulation>,
}

impl NoteEvent {
    pub fn is_sustained(&self) -> bool {
        matches!(self.articulation, Some(Articulation::Hold { .. }))
    }

    pub fn effective_ms(&self) -> Option<f64> {
        match self.articulation {
            Some(Articulation::Hold { effective_ms }) => Some(effective_ms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub(crate) events: Vec<NoteEvent>,
    pub(crate) tempo_factor: f64,
}

impl Piece {
    /// Validates and sorts raw notes. Ties keep their sheet order.
    pub fn from_raw(raw: Vec<RawNote>, tempo_factor: f64) -> Result<Self, SheetError> {
        if !tempo_factor.is_finite() || tempo_factor <= 0.0 {
            return Err(SheetError::malformed(
                0,
                format!("tempo factor {tempo_factor} must be finite and positive"),
            ));
        }

        let mut events = Vec::with_capacity(raw.len());
        for (index, note) in raw.into_iter().enumerate() {
            let key = Key::new(note.key)
                .ok_or_else(|| SheetError::malformed(index, format!("unknown key {}", note.key)))?;
            check_time(index, "onset", note.onset_ms)?;
            check_time(index, "duration", note.duration_ms)?;
            events.push(NoteEvent {
                key,
                onset_ms: note.onset_ms,
                nominal_ms: note.duration_ms,
                articulation: None,
            });
        }

        // Vec::sort_by is stable; onsets are finite so total_cmp agrees with <.
        events.sort_by(|a, b| a.onset_ms.total_cmp(&b.onset_ms));

        Ok(Self {
            events,
            tempo_factor,
        })
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn tempo_factor(&self) -> f64 {
        self.tempo_factor
    }

    pub fn is_classified(&self) -> bool {
        self.events.iter().all(|e| e.articulation.is_some())
    }

    /// Index of the first event with `onset_ms >= time_ms`.
    pub fn cursor_at(&self, time_ms: f64) -> usize {
        self.events.partition_point(|e| e.onset_ms < time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_stably_by_onset() {
        let piece = Piece::from_raw(
            vec![
                RawNote::new(3, 200.0, 0.0),
                RawNote::new(1, 0.0, 0.0),
                RawNote::new(4, 200.0, 0.0),
                RawNote::new(2, 200.0, 0.0),
            ],
            1.0,
        )
        .unwrap();

        let keys: Vec<usize> = piece.events().iter().map(|e| e.key.index()).collect();
        assert_eq!(keys, vec![1, 3, 4, 2]);
        assert!(!piece.is_classified());
    }

    #[test]
    fn rejects_unknown_key() {
        let err = Piece::from_raw(vec![RawNote::new(0, 0.0, 0.0), RawNote::new(15, 10.0, 0.0)], 1.0)
            .unwrap_err();
        assert!(matches!(err, SheetError::MalformedSheet { index: 1, .. }));
    }

    #[test]
    fn rejects_negative_or_non_finite_times() {
        for raw in [
            RawNote::new(0, -1.0, 0.0),
            RawNote::new(0, f64::NAN, 0.0),
            RawNote::new(0, 0.0, -5.0),
            RawNote::new(0, 0.0, f64::INFINITY),
        ] {
            let err = Piece::from_raw(vec![raw], 1.0).unwrap_err();
            assert!(matches!(err, SheetError::MalformedSheet { index: 0, .. }));
        }
    }

    #[test]
    fn rejects_times_beyond_a_day() {
        let err = Piece::from_raw(vec![RawNote::new(0, 0.0, 0.0), RawNote::new(2, 1e30, 0.0)], 1.0)
            .unwrap_err();
        assert!(matches!(err, SheetError::MalformedSheet { index: 1, .. }));

        let err = Piece::from_raw(vec![RawNote::new(0, 0.0, MAX_TIME_MS * 2.0)], 1.0).unwrap_err();
        assert!(matches!(err, SheetError::MalformedSheet { index: 0, .. }));

        assert!(Piece::from_raw(vec![RawNote::new(0, MAX_TIME_MS, MAX_TIME_MS)], 1.0).is_ok());
    }

    #[test]
    fn rejects_bad_tempo() {
        assert!(Piece::from_raw(vec![], 0.0).is_err());
        assert!(Piece::from_raw(vec![], f64::NAN).is_err());
    }

    #[test]
    fn cursor_at_finds_first_event_at_or_after() {
        let piece = Piece::from_raw(
            vec![
                RawNote::new(0, 0.0, 0.0),
                RawNote::new(1, 100.0, 0.0),
                RawNote::new(2, 200.0, 0.0),
            ],
            1.0,
        )
        .unwrap();
        assert_eq!(piece.cursor_at(0.0), 0);
        assert_eq!(piece.cursor_at(100.0), 1);
        assert_eq!(piece.cursor_at(150.0), 2);
        assert_eq!(piece.cursor_at(1000.0), 3);
    }
}
