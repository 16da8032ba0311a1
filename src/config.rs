use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::keys::{KEY_COUNT, KeyLayout};
use crate::timing::MAX_TIME_MS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SustainConfig {
    /// Authored durations below this are played as taps.
    pub min_sustain_ms: f64,
    /// Gap left between a release and the next press of the same key.
    pub guard_ms: f64,
}

impl Default for SustainConfig {
    fn default() -> Self {
        Self {
            min_sustain_ms: 150.0,
            guard_ms: 20.0,
        }
    }
}

/// What happens to keys that were being held when playback is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PausePolicy {
    /// Released holds stay released.
    #[default]
    EndHolds,
    /// Released holds are pressed again on resume for their remaining time.
    Rearm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tap_ms: f64,
    pub poll_interval_ms: f64,
    pub start_delay_ms: f64,
    pub drift_tolerance_ms: f64,
    pub pause_policy: PausePolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tap_ms: 40.0,
            poll_interval_ms: 5.0,
            start_delay_ms: 100.0,
            drift_tolerance_ms: 15.0,
            pause_policy: PausePolicy::EndHolds,
        }
    }
}

/// Unset or out-of-range values read as zero; `validate` rejects them.
fn millis(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or_default()
}

impl PlaybackConfig {
    pub fn tap(&self) -> Duration {
        millis(self.tap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        millis(self.start_delay_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        millis(self.drift_tolerance_ms)
    }
}

/// Hold lengths for sheets that only record onsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub hold_ratio: f64,
    pub min_auto_hold_ms: f64,
    pub allow_overlap_ms: f64,
    pub default_hold_ms: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            hold_ratio: 0.9,
            min_auto_hold_ms: 750.0,
            allow_overlap_ms: 20.0,
            default_hold_ms: 600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sustain: SustainConfig,
    pub playback: PlaybackConfig,
    pub inference: InferenceConfig,
    pub layout: KeyLayout,
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not a non-negative number"),
        });
    }
    if value > MAX_TIME_MS {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} exceeds {MAX_TIME_MS}"),
        });
    }
    Ok(())
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("sustain.min_sustain_ms", self.sustain.min_sustain_ms)?;
        non_negative("sustain.guard_ms", self.sustain.guard_ms)?;
        non_negative("playback.tap_ms", self.playback.tap_ms)?;
        non_negative("playback.start_delay_ms", self.playback.start_delay_ms)?;
        non_negative("playback.drift_tolerance_ms", self.playback.drift_tolerance_ms)?;
        non_negative("inference.hold_ratio", self.inference.hold_ratio)?;
        non_negative("inference.min_auto_hold_ms", self.inference.min_auto_hold_ms)?;
        non_negative("inference.allow_overlap_ms", self.inference.allow_overlap_ms)?;
        non_negative("inference.default_hold_ms", self.inference.default_hold_ms)?;

        let poll = self.playback.poll_interval_ms;
        non_negative("playback.poll_interval_ms", poll)?;
        if poll <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "playback.poll_interval_ms",
                reason: format!("{poll} must be positive"),
            });
        }
        if !self.layout.is_complete() {
            return Err(ConfigError::Invalid {
                field: "layout",
                reason: format!(
                    "expected {KEY_COUNT} characters, got {}",
                    self.layout.0.len()
                ),
            });
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: PlayerConfig = ron::from_str(&ron_string)?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PlayerConfig::default().validate().unwrap();
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("autohold.ron");
        let mut config = PlayerConfig::default();
        config.playback.pause_policy = PausePolicy::Rearm;
        config.sustain.min_sustain_ms = 220.0;

        config.save(&path).unwrap();
        assert_eq!(PlayerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.ron");
        fs::write(&path, "(playback: (tap_ms: 25.0))").unwrap();

        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.playback.tap_ms, 25.0);
        assert_eq!(config.playback.poll_interval_ms, 5.0);
        assert_eq!(config.sustain, SustainConfig::default());
    }

    #[test]
    fn rejects_incomplete_layout() {
        let config = PlayerConfig {
            layout: KeyLayout(vec!['A', 'B']),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "layout", .. })
        ));
    }

    #[test]
    fn huge_durations_are_rejected_and_read_as_zero() {
        let mut config = PlayerConfig::default();
        config.playback.tap_ms = 1e30;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "playback.tap_ms", .. })
        ));
        assert_eq!(config.playback.tap(), Duration::ZERO);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut config = PlayerConfig::default();
        config.playback.poll_interval_ms = 0.0;
        assert!(config.validate().is_err());
    }
}
