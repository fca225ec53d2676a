//! `read-aloud` — narrate articles into audio files.
//!
//! Usage:
//!   read-aloud https://name.substack.com/p/some-post
//!   read-aloud notes.md essay.html --voice tom
//!   read-aloud draft.md --output draft.mp3 --play
//!
//! Requirements:
//!   - `REPLICATE_API_TOKEN` in the environment (or `replicate_api_token` in
//!     the JSON file passed with `--config`)
//!   - sox on $PATH (apk add sox / apt install sox / brew install sox)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use read_aloud::{Config, Narrator};

#[derive(Parser, Debug)]
#[command(name = "read-aloud", about = "Narrate HTML, Markdown or Substack posts into audio")]
struct Args {
    /// URLs, file paths or literal HTML to read.
    #[arg(required = true)]
    targets: Vec<String>,

    /// Output file (only with a single target).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in voice name.
    #[arg(long)]
    voice: Option<String>,

    /// Audio sample of a voice to clone.
    #[arg(long)]
    custom_voice: Option<PathBuf>,

    /// Play each file once it is written.
    #[arg(long)]
    play: bool,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "read_aloud=debug" } else { "read_aloud=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Cannot load config: {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(voice) = &args.voice {
        config.voice = voice.clone();
    }
    if let Some(sample) = &args.custom_voice {
        config.custom_voice = Some(sample.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.output.is_some() && args.targets.len() > 1 {
        bail!("--output can only be used with a single target");
    }

    let config = load_config(&args)?;
    let mut narrator =
        Narrator::from_config(config).context("Failed to set up the narrator")?;

    let mut failures = 0;
    for target in &args.targets {
        println!("Reading {}...", target);
        match narrator.read(target, args.output.as_deref()) {
            Some(path) => {
                println!("  done ({})", path.display());
                if args.play {
                    if let Err(e) = narrator.play(&path) {
                        eprintln!("  could not play: {}", e);
                    }
                }
            }
            None => {
                println!("  fail");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
