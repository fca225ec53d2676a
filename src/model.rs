//! Remote inference — image captioning and speech synthesis on Replicate.
//!
//! Both models are opaque to the pipeline: the extractor sees a
//! [`Captioner`], the narrator a [`Synthesizer`].  The Replicate
//! implementations create a prediction, then poll it until it settles.
//!
//! | Model       | Input                                          | Output          |
//! |-------------|------------------------------------------------|-----------------|
//! | BLIP        | `image` (data URI)                             | caption string  |
//! | tortoise    | `text`, `voice_a..c`, optional `custom_voice`  | audio file URL  |

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    config::Config,
    error::{Error, Result},
    preprocess::clean_caption,
};

/// Turns image bytes into a one-line description.
pub trait Captioner {
    fn caption(&self, image: &[u8]) -> Result<String>;
}

/// Turns text into speech, returning the URL the audio was published at.
pub trait Synthesizer {
    fn synthesize(&self, text: &str) -> Result<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Replicate prediction client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Prediction {
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    urls: PredictionUrls,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: String,
}

/// Minimal client for `POST /predictions` + polling.
#[derive(Clone)]
pub struct Replicate {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl Replicate {
    pub fn new(agent: ureq::Agent, config: &Config) -> Result<Self> {
        Ok(Self {
            agent,
            base_url: config.replicate_base_url.trim_end_matches('/').to_string(),
            token: config.api_token()?,
            poll_interval: config.poll_interval(),
            timeout: config.prediction_timeout(),
        })
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Run one prediction to completion and return its `output`.
    pub fn run(&self, version: &str, input: Value) -> std::result::Result<Value, String> {
        let url = format!("{}/predictions", self.base_url);
        let started = Instant::now();

        let mut prediction: Prediction = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization())
            .set("Prefer", "wait")
            .send_json(json!({ "version": version, "input": input }))
            .map_err(|e| format!("POST {}: {}", url, e))?
            .into_json()
            .map_err(|e| format!("bad prediction response: {}", e))?;

        loop {
            match prediction.status.as_str() {
                "succeeded" => return Ok(prediction.output),
                "failed" | "canceled" => {
                    return Err(format!("prediction {}: {}", prediction.status, prediction.error))
                }
                status => debug!("Prediction {} ({:?} elapsed)", status, started.elapsed()),
            }
            if started.elapsed() > self.timeout {
                return Err(format!("prediction timed out after {:?}", self.timeout));
            }
            thread::sleep(self.poll_interval);
            prediction = self
                .agent
                .get(&prediction.urls.get)
                .set("Authorization", &self.authorization())
                .call()
                .map_err(|e| format!("GET {}: {}", prediction.urls.get, e))?
                .into_json()
                .map_err(|e| format!("bad prediction response: {}", e))?;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Guess an image MIME type from its magic bytes.
fn image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// A model output that is a URL, or a list ending in one.
fn output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().rev().find_map(output_url),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Captioning
// ─────────────────────────────────────────────────────────────────────────────

pub struct ReplicateCaptioner {
    client: Replicate,
    version: String,
}

impl ReplicateCaptioner {
    pub fn new(client: Replicate, config: &Config) -> Self {
        Self { client, version: config.caption_model.clone() }
    }
}

impl Captioner for ReplicateCaptioner {
    fn caption(&self, image: &[u8]) -> Result<String> {
        let input = json!({ "image": data_uri(image_mime(image), image) });
        let output = self.client.run(&self.version, input).map_err(Error::Caption)?;
        match output {
            Value::String(raw) => Ok(clean_caption(&raw)),
            other => Err(Error::Caption(format!("unexpected output: {}", other))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Speech
// ─────────────────────────────────────────────────────────────────────────────

pub struct ReplicateSynthesizer {
    client: Replicate,
    version: String,
    voice: String,
    custom_voice: Option<PathBuf>,
}

impl ReplicateSynthesizer {
    pub fn new(client: Replicate, config: &Config) -> Self {
        Self {
            client,
            version: config.speech_model.clone(),
            voice: config.voice.clone(),
            custom_voice: config.custom_voice.clone(),
        }
    }

    /// Model input for `text`.  A custom voice sample is read before the
    /// payload is built and sent inline as a data URI.
    fn input(&self, text: &str) -> Result<Value> {
        let mut input = json!({
            "text": text,
            "voice_a": self.voice,
            "voice_b": "disabled",
            "voice_c": "disabled",
        });
        if let Some(path) = &self.custom_voice {
            let sample = std::fs::read(path).map_err(|e| Error::io(path, e))?;
            input["voice_a"] = json!("custom_voice");
            input["custom_voice"] = json!(data_uri("audio/mpeg", &sample));
        }
        Ok(input)
    }
}

impl Synthesizer for ReplicateSynthesizer {
    fn synthesize(&self, text: &str) -> Result<String> {
        let input = self.input(text)?;
        let output = self.client.run(&self.version, input).map_err(Error::Synthesis)?;
        output_url(&output)
            .ok_or_else(|| Error::Synthesis(format!("no audio URL in output: {}", output)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Replicate {
        let config = Config { replicate_api_token: Some("t".into()), ..Config::default() };
        Replicate::new(ureq::Agent::new(), &config).unwrap()
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(&[0x89, b'P', b'N', b'G', 0x0D]), "image/png");
        assert_eq!(image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(image_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(image_mime(b"??"), "application/octet-stream");
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(data_uri("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[test]
    fn test_output_url() {
        assert_eq!(output_url(&json!("https://a/x.mp3")).as_deref(), Some("https://a/x.mp3"));
        assert_eq!(
            output_url(&json!(["https://a/1.mp3", "https://a/2.mp3"])).as_deref(),
            Some("https://a/2.mp3")
        );
        assert_eq!(output_url(&json!({"x": 1})), None);
    }

    #[test]
    fn test_builtin_voice_input() {
        let config = Config { voice: "tom".into(), ..Config::default() };
        let synth = ReplicateSynthesizer::new(client(), &config);
        let input = synth.input("Hello.").unwrap();
        assert_eq!(input["text"], "Hello.");
        assert_eq!(input["voice_a"], "tom");
        assert_eq!(input["voice_b"], "disabled");
        assert_eq!(input["voice_c"], "disabled");
        assert!(input.get("custom_voice").is_none());
    }

    #[test]
    fn test_custom_voice_is_read_into_payload() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("me.mp3");
        std::fs::write(&sample, b"hi").unwrap();

        let config = Config { custom_voice: Some(sample), ..Config::default() };
        let synth = ReplicateSynthesizer::new(client(), &config);
        let input = synth.input("Hello.").unwrap();
        assert_eq!(input["voice_a"], "custom_voice");
        assert_eq!(input["custom_voice"], "data:audio/mpeg;base64,aGk=");
    }

    #[test]
    fn test_missing_custom_voice_fails_before_request() {
        let config = Config {
            custom_voice: Some(PathBuf::from("/nonexistent/voice.mp3")),
            ..Config::default()
        };
        let synth = ReplicateSynthesizer::new(client(), &config);
        assert!(matches!(synth.synthesize("Hello."), Err(Error::Io { .. })));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let config = Config { replicate_api_token: Some("  ".into()), ..Config::default() };
        assert!(matches!(
            Replicate::new(ureq::Agent::new(), &config),
            Err(Error::Config(_))
        ));
    }
}
