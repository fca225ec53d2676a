//! Runtime configuration, optionally read from a JSON file.
//!
//! Every field has a default, so an empty object `{}` (or no file at all)
//! yields a working configuration as long as a Replicate API token is
//! available through `REPLICATE_API_TOKEN`.

use std::{path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::{Error, Result};

/// BLIP image captioning model on Replicate.
pub const DEFAULT_CAPTION_MODEL: &str =
    "2e1dddc8621f72155f24cf2e0adbde548458d3cab9f00c0139eea840d0ac4746";

/// tortoise-tts speech model on Replicate.
pub const DEFAULT_SPEECH_MODEL: &str =
    "e9658de4b325863c4fcdc12d94bb7c9b54cbfe351b7ca1b36860008172b91c71";

/// Sample rate of the clips returned by the speech model.  Silence must be
/// generated at the same rate or SoX refuses to concatenate the files.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

pub const TOKEN_ENV_VAR: &str = "REPLICATE_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Falls back to `REPLICATE_API_TOKEN` when absent.
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: String,
    /// Replicate model version hash used for image captions.
    pub caption_model: String,
    /// Replicate model version hash used for speech.
    pub speech_model: String,
    /// Built-in tortoise voice name.
    pub voice: String,
    /// Audio sample to clone instead of the built-in voice.
    pub custom_voice: Option<PathBuf>,
    pub sox_path: PathBuf,
    pub play_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Synthesis passes over the script before giving up on missing clips.
    pub max_rounds: usize,
    pub http_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub prediction_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            replicate_base_url: "https://api.replicate.com/v1".to_string(),
            caption_model: DEFAULT_CAPTION_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            voice: "mol".to_string(),
            custom_voice: None,
            sox_path: PathBuf::from("sox"),
            play_path: PathBuf::from("play"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            max_rounds: 3,
            http_timeout_secs: 60,
            poll_interval_ms: 1_000,
            prediction_timeout_secs: 600,
        }
    }
}

impl Config {
    /// Read a JSON config file.  Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let config: Config = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channels must be positive".into()));
        }
        if self.max_rounds == 0 {
            return Err(Error::Config("max_rounds must be at least 1".into()));
        }
        Ok(())
    }

    /// The configured token, or the one from the environment.
    pub fn api_token(&self) -> Result<String> {
        self.replicate_api_token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no Replicate API token; set `replicate_api_token` or {}",
                    TOKEN_ENV_VAR
                ))
            })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn prediction_timeout(&self) -> Duration {
        Duration::from_secs(self.prediction_timeout_secs)
    }
}
