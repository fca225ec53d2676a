//! Audio file operations, shelled out to SoX.
//!
//! SoX can only concatenate files that share a sample rate and channel
//! count, so generated silence must match the synthesized clips.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// Measure, generate, join and play audio files.
pub trait AudioTool {
    /// File metadata as reported by the tool, keys lower-cased and hyphenated.
    fn info(&self, file: &Path) -> Result<BTreeMap<String, String>>;

    fn generate_silence(&self, output: &Path, secs: f64, sample_rate: u32, channels: u16)
        -> Result<()>;

    /// Join `inputs` in order into `output`.
    fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    fn play(&self, file: &Path) -> Result<()>;
}

static RE_INFO_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r" *: +").unwrap());

/// Parse `sox --i` output into a key → value map.
pub fn parse_info(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = RE_INFO_SEP.splitn(line, 2);
            let key = parts.next()?.trim();
            let value = parts.next()?.trim();
            Some((key.to_lowercase().replace(' ', "-"), value.to_string()))
        })
        .collect()
}

/// Run `program`, returning stdout, or an error carrying stderr on failure.
fn run(program: &Path, args: &[OsString]) -> Result<String> {
    let command = program.display().to_string();
    debug!("Running {} {:?}", command, args);
    let output = Command::new(program).args(args).output().map_err(|e| Error::AudioTool {
        command: command.clone(),
        message: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(Error::AudioTool {
            command,
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Sox
// ─────────────────────────────────────────────────────────────────────────────

pub struct Sox {
    sox: PathBuf,
    play: PathBuf,
}

impl Sox {
    pub fn new(sox: impl Into<PathBuf>, play: impl Into<PathBuf>) -> Self {
        Self { sox: sox.into(), play: play.into() }
    }
}

impl Default for Sox {
    fn default() -> Self {
        Self::new("sox", "play")
    }
}

impl AudioTool for Sox {
    fn info(&self, file: &Path) -> Result<BTreeMap<String, String>> {
        let stdout = run(&self.sox, &["--i".into(), file.into()])?;
        Ok(parse_info(&stdout))
    }

    fn generate_silence(
        &self,
        output: &Path,
        secs: f64,
        sample_rate: u32,
        channels: u16,
    ) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-n".into(),
            "-r".into(),
            sample_rate.to_string().into(),
            "-c".into(),
            channels.to_string().into(),
            output.into(),
            "trim".into(),
            "0.0".into(),
            format!("{:.3}", secs).into(),
        ];
        run(&self.sox, &args).map(drop)
    }

    fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(Error::AudioTool {
                command: self.sox.display().to_string(),
                message: "nothing to concatenate".into(),
            });
        }
        let mut args: Vec<OsString> = inputs.iter().map(OsString::from).collect();
        args.push(output.into());
        run(&self.sox, &args).map(drop)
    }

    fn play(&self, file: &Path) -> Result<()> {
        run(&self.play, &[file.into()]).map(drop)
    }
}
