use std::collections::HashMap;

use tracing::debug;

use super::{Articulation, Piece};
use crate::config::SustainConfig;
use crate::keys::Key;

/// Decides per note whether it is held or tapped.
///
/// Works per key in onset order. A note whose authored duration reaches
/// `min_sustain_ms` is held, but never past `next_onset - guard_ms` of the
/// next note on the same key. Notes on the same key closer than `guard_ms`
/// cannot be separated by a release, so they are merged into one note
/// spanning both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SustainClassifier {
    pub min_sustain_ms: f64,
    pub guard_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyReport {
    pub held: usize,
    pub tapped: usize,
    pub merged: usize,
}

impl From<&SustainConfig> for SustainClassifier {
    fn from(config: &SustainConfig) -> Self {
        Self {
            min_sustain_ms: config.min_sustain_ms,
            guard_ms: config.guard_ms,
        }
    }
}

impl Default for SustainClassifier {
    fn default() -> Self {
        Self::from(&SustainConfig::default())
    }
}

impl SustainClassifier {
    pub fn classify(&self, piece: &mut Piece) -> ClassifyReport {
        let events = &mut piece.events;

        let mut by_key: HashMap<Key, Vec<usize>> = HashMap::new();
        for (idx, event) in events.iter().enumerate() {
            by_key.entry(event.key).or_default().push(idx);
        }

        let mut keep = vec![true; events.len()];
        let mut report = ClassifyReport::default();

        for (key, group) in by_key {
            let mut survivors: Vec<usize> = Vec::with_capacity(group.len());

            for idx in group {
                if let Some(&current) = survivors.last() {
                    let gap = events[idx].onset_ms - events[current].onset_ms;
                    if gap <= self.guard_ms {
                        let current_end = events[current].onset_ms + events[current].nominal_ms;
                        let note_end = events[idx].onset_ms + events[idx].nominal_ms;
                        events[current].nominal_ms =
                            current_end.max(note_end) - events[current].onset_ms;
                        keep[idx] = false;
                        report.merged += 1;
                        debug!(
                            %key,
                            onset_ms = events[idx].onset_ms,
                            "merged note into overlapping note on the same key"
                        );
                        continue;
                    }
                }
                survivors.push(idx);
            }

            for (pos, &idx) in survivors.iter().enumerate() {
                let next_onset = survivors.get(pos + 1).map(|&next| events[next].onset_ms);
                let event = &mut events[idx];

                if event.nominal_ms >= self.min_sustain_ms {
                    let effective_ms = match next_onset {
                        Some(next) => event.nominal_ms.min(next - event.onset_ms - self.guard_ms),
                        None => event.nominal_ms,
                    };
                    event.articulation = Some(Articulation::Hold { effective_ms });
                    report.held += 1;
                } else {
                    event.articulation = Some(Articulation::Tap);
                    report.tapped += 1;
                }
            }
        }

        let mut flags = keep.into_iter();
        events.retain(|_| flags.next().unwrap_or(true));

        report
    }
}
