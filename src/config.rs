//! Settings file schema and loader
//!
//! Settings are TOML; every field is optional and falls back to the
//! defaults below. Example:
//!
//! ```toml
//! [audio]
//! sample_rate = 44100
//! session_seconds = 60
//!
//! [metronome]
//! click_path = "sounds/drumstick.wav"
//! bpm = 100
//!
//! [mixing]
//! beat_sync = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::AudioConfig;
use crate::audio::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioConfig,
    pub metronome: MetronomeSettings,
    pub mixing: MixingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    /// 16-bit mono WAV at the session rate; a synthesized click is used if unset
    pub click_path: Option<PathBuf>,

    /// Tempo applied at startup
    pub bpm: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MixingSettings {
    /// Clip takes to whole beats at startup (requires `metronome.bpm`)
    pub beat_sync: bool,

    /// Keep only the first half of every take
    pub clip_half: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub file: PathBuf,

    /// `log` level filter used when neither `--debug` nor `RUST_LOG` is set
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("debug.log"),
            level: "warn".to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
