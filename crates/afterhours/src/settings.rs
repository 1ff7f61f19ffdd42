//! Session settings persistence.
//!
//! An opaque bag of the user's last choices (endpoint, model, tempo,
//! swing, backend) stored as TOML under the XDG config dir. Load order:
//! compiled defaults, then the settings file, then `AFTERHOURS_*`
//! environment variables; CLI flags are merged on top by the caller.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bars: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swing_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soundfont: Option<PathBuf>,
}

/// Where loaded values came from, for `--show-config`.
#[derive(Debug, Default)]
pub struct SettingsSources {
    pub file: Option<PathBuf>,
    pub env_overrides: Vec<String>,
}

/// Default settings file location: `<config dir>/afterhours/settings.toml`.
pub fn default_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("afterhours/settings.toml"))
}

/// Load settings from `path` (when it exists) and overlay the environment.
pub fn load_from(path: Option<&Path>) -> Result<(Settings, SettingsSources)> {
    let mut settings = Settings::default();
    let mut sources = SettingsSources::default();

    if let Some(path) = path {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings {}", path.display()))?;
            settings = toml::from_str(&contents)
                .with_context(|| format!("parsing settings {}", path.display()))?;
            sources.file = Some(path.to_path_buf());
        }
    }

    apply_env_overrides(&mut settings, &mut sources);
    Ok((settings, sources))
}

/// Load from the default location plus environment.
pub fn load() -> Result<(Settings, SettingsSources)> {
    load_from(default_path().as_deref())
}

/// Persist settings to `path`, creating parent directories.
pub fn save_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(settings).context("serializing settings")?;
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, sources: &mut SettingsSources) {
    let mut record = |name: &str| sources.env_overrides.push(name.to_string());

    if let Ok(v) = env::var("AFTERHOURS_BASE_URL") {
        settings.base_url = Some(v);
        record("AFTERHOURS_BASE_URL");
    }
    if let Ok(v) = env::var("AFTERHOURS_API_KEY") {
        settings.api_key = Some(v);
        record("AFTERHOURS_API_KEY");
    }
    if let Ok(v) = env::var("AFTERHOURS_MODEL") {
        settings.model = Some(v);
        record("AFTERHOURS_MODEL");
    }
    if let Ok(v) = env::var("AFTERHOURS_TEMPO") {
        if let Ok(tempo) = v.parse() {
            settings.tempo = Some(tempo);
            record("AFTERHOURS_TEMPO");
        }
    }
    if let Ok(v) = env::var("AFTERHOURS_BARS") {
        if let Ok(bars) = v.parse() {
            settings.bars = Some(bars);
            record("AFTERHOURS_BARS");
        }
    }
    if let Ok(v) = env::var("AFTERHOURS_SWING_RATIO") {
        if let Ok(ratio) = v.parse() {
            settings.swing_ratio = Some(ratio);
            record("AFTERHOURS_SWING_RATIO");
        }
    }
    if let Ok(v) = env::var("AFTERHOURS_BACKEND") {
        settings.backend = Some(v);
        record("AFTERHOURS_BACKEND");
    }
    if let Ok(v) = env::var("AFTERHOURS_SOUNDFONT") {
        settings.soundfont = Some(PathBuf::from(v));
        record("AFTERHOURS_SOUNDFONT");
    }
}
