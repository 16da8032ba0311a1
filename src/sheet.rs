//! Sky-style JSON sheets.
//!
//! A sheet is either an object with a `songNotes` array, an array whose
//! first element is such an object, or a bare array of notes. Each note has
//! a `time` in milliseconds, a `key` such as `"1Key5"`, and optionally a
//! `hold` (or `duration`) in milliseconds. Notes without a duration get one
//! inferred from the gap to the next onset.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::InferenceConfig;
use crate::error::SheetError;
use crate::keys::Key;
use crate::timing::{Piece, RawNote};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SheetNote {
    pub time: f64,
    pub key: String,
    #[serde(default, alias = "duration")]
    pub hold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SongDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bpm: Option<f64>,
    #[serde(rename = "songNotes")]
    song_notes: Vec<SheetNote>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SheetFile {
    Song(SongDocument),
    Songs(Vec<SongDocument>),
    Notes(Vec<SheetNote>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: Option<String>,
    pub bpm: Option<f64>,
    pub notes: Vec<SheetNote>,
}

impl Sheet {
    pub fn from_json(json: &str) -> Result<Self, SheetError> {
        let file: SheetFile = serde_json::from_str(json)?;
        let sheet: Sheet = match file {
            SheetFile::Song(doc) => doc.into(),
            SheetFile::Songs(docs) => docs.into_iter().next().ok_or(SheetError::Empty)?.into(),
            SheetFile::Notes(notes) => Sheet {
                name: None,
                bpm: None,
                notes,
            },
        };
        if sheet.notes.is_empty() {
            return Err(SheetError::Empty);
        }
        Ok(sheet)
    }

    pub fn load(path: &Path) -> Result<Self, SheetError> {
        let json = fs::read_to_string(path)?;
        let mut sheet = Self::from_json(&json)?;
        if sheet.name.is_none() {
            sheet.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        Ok(sheet)
    }

    /// Resolves key names and fills in missing durations.
    pub fn to_raw(&self, inference: &InferenceConfig) -> Result<Vec<RawNote>, SheetError> {
        let mut keys = Vec::with_capacity(self.notes.len());
        for (index, note) in self.notes.iter().enumerate() {
            let key: Key = note
                .key
                .parse()
                .map_err(|reason: String| SheetError::malformed(index, reason))?;
            if !note.time.is_finite() || note.time < 0.0 {
                return Err(SheetError::malformed(
                    index,
                    format!("time {} is not a non-negative number", note.time),
                ));
            }
            keys.push(key);
        }

        let mut onsets: Vec<f64> = self.notes.iter().map(|n| n.time).collect();
        onsets.sort_by(f64::total_cmp);
        onsets.dedup();

        let raw = self
            .notes
            .iter()
            .zip(keys)
            .map(|(note, key)| {
                let duration = note
                    .hold
                    .unwrap_or_else(|| inferred_hold(&onsets, note.time, inference));
                RawNote::new(key.index(), note.time, duration)
            })
            .collect();

        Ok(raw)
    }

    pub fn to_piece(
        &self,
        inference: &InferenceConfig,
        tempo_factor: f64,
    ) -> Result<Piece, SheetError> {
        Piece::from_raw(self.to_raw(inference)?, tempo_factor)
    }
}

impl From<SongDocument> for Sheet {
    fn from(doc: SongDocument) -> Self {
        Sheet {
            name: doc.name,
            bpm: doc.bpm,
            notes: doc.song_notes,
        }
    }
}

/// Hold for a note at `time`, from the gap to the next distinct onset of any
/// key. `onsets` is sorted and deduplicated.
fn inferred_hold(onsets: &[f64], time: f64, inference: &InferenceConfig) -> f64 {
    let next = onsets.get(onsets.partition_point(|&t| t <= time)).copied();
    match next {
        Some(next) => {
            let gap = next - time;
            (gap * inference.hold_ratio)
                .max(inference.min_auto_hold_ms)
                .min(gap + inference.allow_overlap_ms)
        }
        None => inference.default_hold_ms.max(inference.min_auto_hold_ms),
    }
}
