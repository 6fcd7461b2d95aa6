//! Step grid data model shared by the sequencer, presets, and the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Number of steps in one bar of the grid.
pub const STEPS_PER_BAR: usize = 16;

/// One cell of the step grid.
///
/// `velocity == 0.0` means silent; `accent` forces peak velocity regardless
/// of the stored value. `note` and `slide` are only read by pitched voices
/// (the bass machine) and default to absent/false for percussion tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub velocity: f64,
    #[serde(default)]
    pub accent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub slide: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Step {
    /// A silent step.
    pub fn rest() -> Self {
        Step {
            velocity: 0.0,
            accent: false,
            note: None,
            slide: false,
        }
    }

    /// A plain hit at the given velocity.
    pub fn hit(velocity: f64) -> Self {
        Step {
            velocity: velocity.clamp(0.0, 1.0),
            accent: false,
            note: None,
            slide: false,
        }
    }

    /// An accented hit (played back at peak velocity).
    pub fn accent(velocity: f64) -> Self {
        Step {
            accent: true,
            ..Step::hit(velocity)
        }
    }

    /// A pitched step for the bass machine. Only the accent flag reaches
    /// peak velocity, so accented and plain notes stay distinguishable.
    pub fn note(note: &str, accent: bool, slide: bool) -> Self {
        Step {
            velocity: 0.8,
            accent,
            note: Some(note.to_string()),
            slide,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.velocity <= 0.0
    }
}

/// A pattern: one step track per voice id.
///
/// Tracks are kept in a `BTreeMap` so iteration order (and therefore
/// scheduling and rendering) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    pub tracks: BTreeMap<String, Vec<Step>>,
}

impl Pattern {
    pub fn new() -> Self {
        Pattern::default()
    }

    /// Parse a pattern from its JSON form (voice id → array of steps).
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let pattern: Pattern = serde_json::from_str(json)?;
        pattern.validate()?;
        Ok(pattern)
    }

    /// Add a track, replacing any existing track for the same voice.
    pub fn set_track(&mut self, voice: &str, steps: Vec<Step>) {
        self.tracks.insert(voice.to_string(), steps);
    }

    /// Build a percussion track from 0/1/2 markers: 0 = rest, 1 = hit,
    /// 2 = accented hit.
    pub fn track_from_markers(markers: [u8; STEPS_PER_BAR]) -> Vec<Step> {
        markers
            .iter()
            .map(|&m| match m {
                0 => Step::rest(),
                1 => Step::hit(0.8),
                _ => Step::accent(1.0),
            })
            .collect()
    }

    /// Step count shared by every track, if the pattern is non-empty.
    pub fn len(&self) -> usize {
        self.tracks.values().next().map_or(0, |t| t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Check the structural invariants: at least one track, no empty tracks,
    /// and a uniform step count across all tracks.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tracks.is_empty() {
            return Err(EngineError::InvalidPattern {
                reason: "pattern has no tracks".to_string(),
            });
        }
        let expected = self.len();
        if expected == 0 {
            return Err(EngineError::InvalidPattern {
                reason: "pattern tracks are empty".to_string(),
            });
        }
        for (voice, track) in &self.tracks {
            if track.len() != expected {
                return Err(EngineError::InvalidPattern {
                    reason: format!(
                        "track \"{voice}\" has {} steps, expected {expected}",
                        track.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// The step a voice plays at a (wrapping) step index, or `None` when the
    /// step is silent.
    pub fn step_at(&self, voice: &str, step: usize) -> Option<&Step> {
        let track = self.tracks.get(voice)?;
        if track.is_empty() {
            return None;
        }
        let data = &track[step % track.len()];
        if data.is_silent() { None } else { Some(data) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kick_only() -> Pattern {
        let mut p = Pattern::new();
        let mut markers = [0u8; STEPS_PER_BAR];
        markers[0] = 1;
        p.set_track("kick", Pattern::track_from_markers(markers));
        p
    }

    #[test]
    fn validate_accepts_uniform_tracks() {
        let mut p = kick_only();
        p.set_track("snare", vec![Step::rest(); STEPS_PER_BAR]);
        assert!(p.validate().is_ok());
        assert_eq!(p.len(), 16);
    }

    #[test]
    fn validate_rejects_step_count_mismatch() {
        let mut p = kick_only();
        p.set_track("snare", vec![Step::rest(); 8]);
        let err = p.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }

    #[test]
    fn validate_rejects_empty_pattern() {
        let p = Pattern::new();
        assert!(p.validate().is_err());
    }

    #[test]
    fn step_lookup_wraps_and_skips_silence() {
        let p = kick_only();
        assert!(p.step_at("kick", 0).is_some());
        assert!(p.step_at("kick", 1).is_none());
        // Index 16 wraps back to step 0
        assert!(p.step_at("kick", 16).is_some());
        assert!(p.step_at("missing", 0).is_none());
    }

    #[test]
    fn json_roundtrip_preserves_steps() {
        let mut p = kick_only();
        p.set_track(
            "bass",
            vec![Step::note("C2", true, false); STEPS_PER_BAR],
        );
        let json = serde_json::to_string(&p).unwrap();
        let back = Pattern::from_json(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn percussion_steps_omit_note_fields_in_json() {
        let p = kick_only();
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("note"));
        assert!(!json.contains("slide"));
    }

    #[test]
    fn malformed_json_is_invalid_pattern() {
        let err = Pattern::from_json("{\"kick\": [{\"velocity\": }]}").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }
}
