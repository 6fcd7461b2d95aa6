//! Preset types and the built-in preset collection.
//!
//! A preset bundles a pattern with parameter settings and a tempo — enough
//! to reproduce a render exactly. The built-in collection carries classic
//! acid lines and drum grooves so the engine makes sound out of the box.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dsp::engine::RenderRequest;
use crate::dsp::oscillator::Waveform;
use crate::error::EngineError;
use crate::pattern::{Pattern, Step, STEPS_PER_BAR};

/// A named, immutable pattern + parameter bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    /// Unique id within a collection (e.g. "acid-line").
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub bpm: f64,
    pub pattern: Pattern,
    /// `"<voice>.<param>"` keyed values.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
}

impl Preset {
    /// Structural checks shared by JSON loading and the builtin collection.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bpm <= 0.0 {
            return Err(EngineError::InvalidPattern {
                reason: format!("preset \"{}\" has non-positive bpm", self.id),
            });
        }
        self.pattern.validate()
    }

    /// Parse and validate a preset from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let preset: Preset = serde_json::from_str(json)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Turn the preset into a render request for the given bar count.
    pub fn to_render_request(&self, bars: usize) -> RenderRequest {
        RenderRequest {
            pattern: self.pattern.clone(),
            parameters: self.parameters.clone(),
            waveform: self.waveform,
            bpm: self.bpm,
            bars,
            sample_rate: None,
            channels: None,
        }
    }
}

/// A collection of presets keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PresetStore {
    presets: BTreeMap<String, Preset>,
}

impl PresetStore {
    pub fn new() -> Self {
        PresetStore::default()
    }

    /// The built-in collection: acid bass lines and drum grooves.
    pub fn builtin() -> Self {
        let mut store = PresetStore::new();
        for preset in builtin_presets() {
            store.insert(preset);
        }
        store
    }

    /// Insert a preset, replacing any existing preset with the same id.
    pub fn insert(&mut self, preset: Preset) {
        self.presets.insert(preset.id.clone(), preset);
    }

    /// Parse a preset from JSON and add it to the store.
    pub fn insert_from_json(&mut self, json: &str) -> Result<(), EngineError> {
        self.insert(Preset::from_json(json)?);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Preset, EngineError> {
        self.presets.get(id).ok_or_else(|| EngineError::UnknownPreset {
            id: id.to_string(),
        })
    }

    /// All presets in id order.
    pub fn list(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

// ── Built-in collection ─────────────────────────────────────

/// Build a bass track from 16 (note, gate, accent, slide) tuples.
fn acid_track(steps: [(&str, bool, bool, bool); STEPS_PER_BAR]) -> Vec<Step> {
    steps
        .iter()
        .map(|&(note, gate, accent, slide)| {
            if gate {
                Step::note(note, accent, slide)
            } else {
                Step::rest()
            }
        })
        .collect()
}

fn bass_params(
    cutoff: f64,
    resonance: f64,
    env_mod: f64,
    decay: f64,
    accent: f64,
) -> BTreeMap<String, f64> {
    let mut params = BTreeMap::new();
    params.insert("bass.cutoff".to_string(), cutoff);
    params.insert("bass.resonance".to_string(), resonance);
    params.insert("bass.env_mod".to_string(), env_mod);
    params.insert("bass.decay".to_string(), decay);
    params.insert("bass.accent".to_string(), accent);
    params
}

fn bass_preset(
    id: &str,
    name: &str,
    description: &str,
    bpm: f64,
    waveform: Waveform,
    parameters: BTreeMap<String, f64>,
    track: Vec<Step>,
) -> Preset {
    let mut pattern = Pattern::new();
    pattern.set_track("bass", track);
    Preset {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        bpm,
        pattern,
        parameters,
        waveform: Some(waveform),
    }
}

fn builtin_presets() -> Vec<Preset> {
    let mut presets = Vec::new();

    presets.push(bass_preset(
        "acid-line",
        "Acid Line",
        "Classic ascending acid line",
        130.0,
        Waveform::Sawtooth,
        bass_params(0.35, 0.75, 0.7, 0.4, 0.85),
        acid_track([
            ("C2", true, true, false),
            ("C2", false, false, false),
            ("C2", true, false, false),
            ("E2", true, false, true),
            ("G2", true, true, false),
            ("G2", false, false, false),
            ("A#2", true, false, true),
            ("C3", true, true, false),
            ("C2", true, false, false),
            ("C2", false, false, false),
            ("D#2", true, true, false),
            ("D#2", true, false, true),
            ("G2", true, false, false),
            ("G2", false, false, false),
            ("A#2", true, true, true),
            ("C3", true, false, false),
        ]),
    ));

    presets.push(bass_preset(
        "phuture",
        "Phuture",
        "Minimal first-wave acid",
        125.0,
        Waveform::Sawtooth,
        bass_params(0.25, 0.85, 0.8, 0.5, 0.9),
        acid_track([
            ("C2", true, true, false),
            ("C2", false, false, false),
            ("C2", true, false, false),
            ("C2", false, false, false),
            ("C2", true, true, true),
            ("D#2", true, false, false),
            ("D#2", false, false, false),
            ("C2", true, false, false),
            ("C2", true, true, false),
            ("C2", false, false, false),
            ("C2", true, false, true),
            ("G2", true, true, false),
            ("G2", false, false, false),
            ("D#2", true, false, true),
            ("C2", true, false, false),
            ("C2", false, false, false),
        ]),
    ));

    presets.push(bass_preset(
        "dark-acid",
        "Dark Acid",
        "Darker minor-key square line",
        128.0,
        Waveform::Square,
        bass_params(0.3, 0.7, 0.6, 0.6, 0.8),
        acid_track([
            ("D2", true, true, false),
            ("D2", false, false, false),
            ("D2", true, false, false),
            ("F2", true, false, true),
            ("A2", true, true, false),
            ("A2", true, false, true),
            ("G#2", true, false, true),
            ("F2", true, true, false),
            ("D2", true, false, false),
            ("D2", false, false, false),
            ("D2", true, true, true),
            ("C2", true, false, false),
            ("D2", true, false, false),
            ("D2", false, false, false),
            ("F2", true, true, true),
            ("D2", true, false, false),
        ]),
    ));

    // Drum grooves: marker shorthand, 0 = rest, 1 = hit, 2 = accent
    let mut four_floor = Pattern::new();
    four_floor.set_track(
        "kick",
        Pattern::track_from_markers([2, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]),
    );
    four_floor.set_track(
        "ch",
        Pattern::track_from_markers([0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0]),
    );
    four_floor.set_track(
        "oh",
        Pattern::track_from_markers([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0]),
    );
    four_floor.set_track(
        "clap",
        Pattern::track_from_markers([0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0]),
    );
    presets.push(Preset {
        id: "four-floor".to_string(),
        name: "Four on the Floor".to_string(),
        description: "House groove with offbeat hats".to_string(),
        bpm: 125.0,
        pattern: four_floor,
        parameters: BTreeMap::new(),
        waveform: None,
    });

    let mut warehouse = Pattern::new();
    warehouse.set_track(
        "kick",
        Pattern::track_from_markers([2, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 1]),
    );
    warehouse.set_track(
        "snare",
        Pattern::track_from_markers([0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0]),
    );
    warehouse.set_track(
        "ch",
        Pattern::track_from_markers([1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 1]),
    );
    warehouse.set_track(
        "ride",
        Pattern::track_from_markers([0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]),
    );
    warehouse.set_track(
        "bass",
        acid_track([
            ("A1", true, true, false),
            ("A1", true, false, false),
            ("A2", true, true, true),
            ("G2", true, false, true),
            ("E2", true, true, false),
            ("E2", false, false, false),
            ("A1", true, false, false),
            ("A1", true, true, true),
            ("C2", true, false, false),
            ("C2", true, false, true),
            ("D2", true, true, false),
            ("D2", false, false, false),
            ("A1", true, false, false),
            ("A1", true, true, true),
            ("E2", true, false, true),
            ("G2", true, true, false),
        ]),
    );
    let mut warehouse_params = bass_params(0.2, 0.9, 0.9, 0.3, 0.95);
    warehouse_params.insert("kick.decay".to_string(), 0.6);
    warehouse_params.insert("ch.decay".to_string(), 0.06);
    presets.push(Preset {
        id: "warehouse".to_string(),
        name: "Warehouse".to_string(),
        description: "Fast squelch bass over a driving kit".to_string(),
        bpm: 140.0,
        pattern: warehouse,
        parameters: warehouse_params,
        waveform: Some(Waveform::Sawtooth),
    });

    presets
}
