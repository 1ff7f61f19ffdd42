//! Afterhours — an endlessly improvised jazz quartet.
//!
//! Drives an OpenAI-compatible chat endpoint, parses the token stream as
//! tracker notation, and plays it through a soundfont synthesiser or an
//! external MIDI output while the model is still writing.

mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use bandstand::{AudioClock, BackendKind, Player, PlayerOptions};
use sideman::{GenerationLoop, LlmClient};
use tracker::{archive, smf, Config};

use settings::Settings;

/// Soundfont locations probed when none is configured.
const SOUNDFONT_SEARCH_PATHS: &[&str] = &[
    "/usr/share/sounds/sf2/FluidR3_GM.sf2",
    "/usr/share/sounds/sf2/default.sf2",
    "/usr/share/soundfonts/default.sf2",
    "/usr/share/soundfonts/FluidR3_GM.sf2",
    "/usr/share/soundfonts/GeneralUser.sf2",
    "/opt/homebrew/share/sound/default.sf2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Soundfont,
    Midi,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Soundfont => BackendKind::Soundfont,
            BackendArg::Midi => BackendKind::Midi,
        }
    }
}

/// Afterhours - real-time LLM jazz quartet
///
/// Settings layering, later wins: compiled defaults, the settings file
/// (~/.config/afterhours/settings.toml), AFTERHOURS_* environment
/// variables, CLI flags.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// OpenAI-compatible endpoint base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Bearer token for the endpoint
    #[arg(long)]
    api_key: Option<String>,

    /// Tempo in BPM
    #[arg(long)]
    tempo: Option<u32>,

    /// Bars per generated section
    #[arg(long)]
    bars: Option<u32>,

    /// Disable swing feel
    #[arg(long)]
    no_swing: bool,

    /// Off-beat swing ratio in [0.5, 1.0)
    #[arg(long)]
    swing_ratio: Option<f64>,

    /// Direction text woven into every prompt (e.g. "ballad, brushes")
    #[arg(long)]
    direction: Option<String>,

    /// Playback backend preference; the other is tried as a fallback
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Path to a .sf2 soundfont (default: probe common locations)
    #[arg(long)]
    soundfont: Option<PathBuf>,

    /// Stop after this many sections (default: play until Ctrl-C)
    #[arg(long)]
    sections: Option<usize>,

    /// Steps of per-instrument history fed back to the model
    #[arg(long, default_value_t = 32)]
    context_steps: usize,

    /// Save the session as tracker text and SMF on exit
    #[arg(long)]
    save: bool,

    /// Directory for saved sessions
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Persist the merged settings for future runs
    #[arg(long)]
    save_settings: bool,

    /// Print the merged configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let (mut stored, sources) = settings::load().context("loading settings")?;
    merge_cli(&mut stored, &args);

    if args.show_config {
        if let Some(file) = &sources.file {
            println!("# settings file: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env override: {var}");
        }
        print!("{}", toml::to_string_pretty(&stored)?);
        return Ok(());
    }

    if args.save_settings {
        let path = settings::default_path().context("no config directory available")?;
        settings::save_to(&stored, &path)?;
        tracing::info!(path = %path.display(), "settings saved");
    }

    let config = Config::new(
        stored.tempo.unwrap_or(120),
        stored.bars.unwrap_or(2),
    )
    .with_swing(
        stored.swing.unwrap_or(true),
        stored.swing_ratio.unwrap_or(0.67),
    );

    let base_url = stored
        .base_url
        .clone()
        .unwrap_or_else(|| "http://localhost:11434".to_string());
    let model = stored
        .model
        .clone()
        .unwrap_or_else(|| "qwen2.5:3b".to_string());
    let client = LlmClient::new(&base_url, stored.api_key.clone(), &model, 0.8);

    tracing::info!(
        tempo = config.tempo,
        bars = config.bars_per_generation,
        swing = config.swing_enabled,
        %base_url,
        %model,
        "starting session"
    );

    let preference = stored
        .backend
        .as_deref()
        .map(|b| match b {
            "midi" => BackendKind::Midi,
            _ => BackendKind::Soundfont,
        })
        .unwrap_or(BackendKind::Soundfont);

    let soundfont_path = stored.soundfont.clone().or_else(find_soundfont);

    let clock = AudioClock::new();
    let mut player = Player::new(config.clone(), clock);
    player
        .prepare(&PlayerOptions {
            preference,
            soundfont_path,
        })
        .context("preparing playback")?;
    if player.is_degraded() {
        tracing::warn!("running on the fallback backend");
    }

    let direction = stored.direction.clone().unwrap_or_default();
    let mut generation = GenerationLoop::new(client, config.clone(), args.context_steps, direction);

    let cancel = generation.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            cancel.cancel();
        }
    });

    let result = generation.run(&mut player, args.sections).await;

    let aborted = match &result {
        Ok(summary) => {
            tracing::info!(sections = summary.sections, aborted = summary.aborted, "session over");
            summary.aborted
        }
        Err(e) => {
            tracing::error!(%e, "generation failed; letting queued music drain");
            false
        }
    };

    // Let whatever is already scheduled finish unless the user stopped us.
    if !aborted {
        let lead = player.lead_seconds();
        if lead > 0.0 {
            tracing::info!(seconds = lead, "draining playback");
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(lead)) => {}
                _ = tokio::signal::ctrl_c() => player.stop_all(),
            }
        }
    }

    player.shutdown();

    if args.save {
        save_session(&generation, &config, &args.output_dir, &stored)?;
    }

    result.map(|_| ()).map_err(Into::into)
}

/// CLI flags override stored/env settings.
fn merge_cli(settings: &mut Settings, args: &Args) {
    if let Some(v) = &args.base_url {
        settings.base_url = Some(v.clone());
    }
    if let Some(v) = &args.model {
        settings.model = Some(v.clone());
    }
    if let Some(v) = &args.api_key {
        settings.api_key = Some(v.clone());
    }
    if let Some(v) = args.tempo {
        settings.tempo = Some(v);
    }
    if let Some(v) = args.bars {
        settings.bars = Some(v);
    }
    if args.no_swing {
        settings.swing = Some(false);
    }
    if let Some(v) = args.swing_ratio {
        settings.swing_ratio = Some(v);
    }
    if let Some(v) = &args.direction {
        settings.direction = Some(v.clone());
    }
    if let Some(v) = args.backend {
        settings.backend = Some(match v {
            BackendArg::Soundfont => "soundfont".to_string(),
            BackendArg::Midi => "midi".to_string(),
        });
    }
    if let Some(v) = &args.soundfont {
        settings.soundfont = Some(v.clone());
    }
}

fn find_soundfont() -> Option<PathBuf> {
    SOUNDFONT_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Write the whole session out as tracker text and a type-1 SMF.
fn save_session(
    generation: &GenerationLoop,
    config: &Config,
    output_dir: &PathBuf,
    settings: &Settings,
) -> Result<()> {
    let sections = generation.sections();
    if sections.is_empty() {
        tracing::warn!("nothing to save");
        return Ok(());
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S");

    let combined = archive::concatenate(sections);

    let mut metadata = vec![
        ("tempo", config.tempo.to_string()),
        ("swing_enabled", config.swing_enabled.to_string()),
        ("swing_ratio", config.swing_ratio.to_string()),
        ("bars_per_generation", config.bars_per_generation.to_string()),
        (
            "time_signature",
            format!("{}/{}", config.time_signature.0, config.time_signature.1),
        ),
        ("sections", sections.len().to_string()),
    ];
    if let Some(direction) = &settings.direction {
        metadata.push(("direction", direction.clone()));
    }

    let txt_path = output_dir.join(format!("session_{stamp}.txt"));
    std::fs::write(&txt_path, archive::render_sections(sections, &metadata))
        .with_context(|| format!("writing {}", txt_path.display()))?;
    tracing::info!(path = %txt_path.display(), "tracker text saved");

    let mid_path = output_dir.join(format!("session_{stamp}.mid"));
    std::fs::write(&mid_path, smf::encode(&combined, config))
        .with_context(|| format!("writing {}", mid_path.display()))?;
    tracing::info!(path = %mid_path.display(), "MIDI file saved");

    Ok(())
}
