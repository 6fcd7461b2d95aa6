//! acidbox — render step-sequenced drum & bass patterns to WAV files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use acidbox_core::dsp::engine::{RenderRequest, SynthEngine};
use acidbox_core::error::EngineError;
use acidbox_core::pattern::Pattern;
use acidbox_core::preset::PresetStore;
use acidbox_core::render_request_wav;

#[derive(Parser)]
#[command(name = "acidbox", version, about = "Drum machine & acid bass renderer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a preset or an inline pattern to a WAV file
    Render {
        /// Id of a built-in preset (see list-presets)
        #[arg(long)]
        preset: Option<String>,
        /// Inline pattern JSON: voice id -> array of steps
        #[arg(long)]
        pattern: Option<String>,
        /// Tempo override in beats per minute
        #[arg(long)]
        bpm: Option<f64>,
        /// Number of bars to render
        #[arg(long, default_value_t = 1)]
        bars: usize,
        /// Output WAV path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Render sample rate in Hz
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
    /// List the built-in presets
    ListPresets,
    /// List the registered voices and their controls
    ListVoices,
}

/// Turn render-command arguments into a request, or a diagnostic.
fn build_request(
    preset: Option<&str>,
    pattern_json: Option<&str>,
    bpm: Option<f64>,
    bars: usize,
    sample_rate: u32,
) -> Result<RenderRequest> {
    if bars < 1 {
        bail!("--bars must be at least 1");
    }
    let mut request = match (preset, pattern_json) {
        (Some(_), Some(_)) => bail!("--preset and --pattern are mutually exclusive"),
        (None, None) => bail!("one of --preset or --pattern is required"),
        (Some(id), None) => {
            let store = PresetStore::builtin();
            let preset = store.get(id)?;
            preset.to_render_request(bars)
        }
        (None, Some(json)) => {
            let pattern = Pattern::from_json(json)?;
            RenderRequest {
                pattern,
                parameters: BTreeMap::new(),
                waveform: None,
                bpm: 120.0,
                bars,
                sample_rate: None,
                channels: None,
            }
        }
    };
    if let Some(bpm) = bpm {
        if bpm <= 0.0 {
            bail!("--bpm must be positive");
        }
        request.bpm = bpm;
    }
    request.sample_rate = Some(sample_rate);
    Ok(request)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Render {
            preset,
            pattern,
            bpm,
            bars,
            output,
            sample_rate,
        } => {
            let output = output.ok_or(EngineError::MissingOutputPath)?;
            let request = build_request(
                preset.as_deref(),
                pattern.as_deref(),
                bpm,
                bars,
                sample_rate,
            )?;
            let wav = render_request_wav(&request)?;
            std::fs::write(&output, &wav)
                .with_context(|| format!("writing {}", output.display()))?;
            let absolute = std::path::absolute(&output)
                .with_context(|| format!("resolving {}", output.display()))?;
            println!("{}", absolute.display());
        }
        Command::ListPresets => {
            let store = PresetStore::builtin();
            for preset in store.list() {
                println!(
                    "{:<12} {:<20} {:>5.0} bpm  {}",
                    preset.id, preset.name, preset.bpm, preset.description
                );
            }
        }
        Command::ListVoices => {
            let engine = SynthEngine::with_default_kit(44100.0);
            for (voice, descriptors) in engine.parameter_descriptors() {
                println!("{voice}");
                for d in descriptors {
                    println!(
                        "  {:<10} {:<10} [{} .. {}] default {}",
                        d.id, d.label, d.min, d.max, d.default
                    );
                }
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
