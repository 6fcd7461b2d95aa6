use std::fmt;

/// Errors surfaced by the engine and its command surface.
///
/// DSP setters never error on out-of-range values — they clamp — so these
/// variants cover structural problems only: unknown ids, malformed patterns,
/// and sample loading failures.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Trigger or parameter call against a voice id that is not registered.
    UnknownVoice { voice: String },
    /// Parameter id not present in the voice's descriptor list.
    UnknownParameter { voice: String, parameter: String },
    /// Step count mismatch, unknown track, or malformed pattern JSON.
    InvalidPattern { reason: String },
    /// Preset id not present in the preset store.
    UnknownPreset { id: String },
    /// The render command was invoked without an output path.
    MissingOutputPath,
    /// A sample manifest entry could not be fetched.
    SampleFetch { id: String, reason: String },
    /// A fetched sample could not be decoded into channel buffers.
    SampleDecode { id: String, reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownVoice { voice } => write!(f, "Unknown voice \"{voice}\""),
            EngineError::UnknownParameter { voice, parameter } => {
                write!(f, "Unknown parameter \"{parameter}\" for voice \"{voice}\"")
            }
            EngineError::InvalidPattern { reason } => write!(f, "Invalid pattern: {reason}"),
            EngineError::UnknownPreset { id } => write!(f, "Unknown preset \"{id}\""),
            EngineError::MissingOutputPath => write!(f, "No output path given"),
            EngineError::SampleFetch { id, reason } => {
                write!(f, "Failed to fetch sample \"{id}\": {reason}")
            }
            EngineError::SampleDecode { id, reason } => {
                write!(f, "Failed to decode sample \"{id}\": {reason}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidPattern {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_id() {
        let e = EngineError::UnknownVoice {
            voice: "kick".to_string(),
        };
        assert!(format!("{e}").contains("kick"));

        let e = EngineError::UnknownParameter {
            voice: "snare".to_string(),
            parameter: "snappy".to_string(),
        };
        let msg = format!("{e}");
        assert!(msg.contains("snare") && msg.contains("snappy"));
    }

    #[test]
    fn json_errors_become_invalid_pattern() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let e: EngineError = parse_err.into();
        assert!(matches!(e, EngineError::InvalidPattern { .. }));
    }
}
