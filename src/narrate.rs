//! Narration driver — target → script → clips → one audio file.
//!
//! For each target:
//!
//! 1. Load `<output>.json` if an earlier run left one behind.
//! 2. Extract and normalise the script, then pick the output path.
//! 3. Synthesize every speech instruction the cache doesn't cover, in up to
//!    `max_rounds` passes so transient failures get retried.
//! 4. Render each distinct pause length as a silence clip.
//! 5. Concatenate the clips in script order and save the cache.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::{
    cache::{Cache, CacheEntry},
    config::Config,
    download::{download_to, Fetcher, HttpClient},
    error::{Error, Result},
    extract::{Extractor, Target},
    model::{Captioner, Replicate, ReplicateCaptioner, ReplicateSynthesizer, Synthesizer},
    script::{normalize, Instruction, Script},
    sox::{AudioTool, Sox},
};

/// Extension of the audio files we produce and download.
const AUDIO_EXT: &str = "mp3";

/// Pick a fresh `<stem>-<random>.mp3` in `dir` and create it so no other
/// run can claim the same name.
pub fn default_output_path(target: &Target, dir: &Path) -> Result<PathBuf> {
    let (_, path) = tempfile::Builder::new()
        .prefix(&format!("{}-", target.stem()))
        .suffix(&format!(".{}", AUDIO_EXT))
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?
        .keep()
        .map_err(|e| Error::io(dir, e.error))?;
    Ok(path)
}

/// The cache file that sits next to `output`.
pub fn cache_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

/// Shorten a target for log lines; inline HTML can be arbitrarily long.
fn preview(target: &str) -> String {
    const MAX: usize = 60;
    match target.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &target[..cut]),
        None => target.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Narrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Narrator {
    config: Config,
    fetcher: Box<dyn Fetcher>,
    captioner: Box<dyn Captioner>,
    synthesizer: Box<dyn Synthesizer>,
    audio: Box<dyn AudioTool>,
    cache: Cache,
}

impl Narrator {
    pub fn new(
        config: Config,
        fetcher: Box<dyn Fetcher>,
        captioner: Box<dyn Captioner>,
        synthesizer: Box<dyn Synthesizer>,
        audio: Box<dyn AudioTool>,
    ) -> Self {
        Self { config, fetcher, captioner, synthesizer, audio, cache: Cache::new() }
    }

    /// Wire up the real collaborators: ureq, Replicate and SoX.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(config.http_timeout());
        let replicate = Replicate::new(http.agent().clone(), &config)?;
        let captioner = ReplicateCaptioner::new(replicate.clone(), &config);
        let synthesizer = ReplicateSynthesizer::new(replicate, &config);
        let audio = Sox::new(config.sox_path.clone(), config.play_path.clone());
        Ok(Self::new(
            config,
            Box::new(http),
            Box::new(captioner),
            Box::new(synthesizer),
            Box::new(audio),
        ))
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Extract and normalise the script for `target`.
    pub fn script_for(&mut self, target: &Target) -> Result<Script> {
        let nodes = Extractor::new(self.fetcher.as_ref(), self.captioner.as_ref(), &mut self.cache)
            .from_target(target)?;
        let script = normalize(nodes);
        info!("Script has {} instructions", script.len());
        Ok(script)
    }

    /// Narrate `target` into `output` (or a fresh file in the current
    /// directory) and return the path written.
    pub fn narrate(&mut self, target: &str, output: Option<&Path>) -> Result<PathBuf> {
        let source = target;
        let target = Target::parse(source)?;
        // A generated output name is always fresh, so only a caller-chosen
        // one can have a cache from an earlier run.
        if let Some(previous) = output.map(cache_path).filter(|p| p.exists()) {
            self.cache.load(&previous)?;
        }

        let script = self.script_for(&target)?;
        if script.is_empty() {
            return Err(Error::EmptyDocument(preview(source)));
        }

        let output = match output {
            Some(path) => path.to_path_buf(),
            None => default_output_path(&target, Path::new("."))?,
        };
        let cache_file = cache_path(&output);

        let missing = self.synthesize_rounds(&script, &output);
        if missing > 0 {
            self.cache.save(&cache_file)?;
            return Err(Error::Synthesis(format!(
                "{} speech clip(s) still missing after {} round(s)",
                missing, self.config.max_rounds
            )));
        }

        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        self.render_pauses(&script, dir)?;
        let clips = self.clip_files(&script)?;
        self.audio.concatenate(&clips, &output)?;
        self.cache.save(&cache_file)?;
        info!("Wrote {}", output.display());
        Ok(output)
    }

    /// [`narrate`](Self::narrate), logging failure instead of returning it.
    pub fn read(&mut self, target: &str, output: Option<&Path>) -> Option<PathBuf> {
        match self.narrate(target, output) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Reading {} failed: {}", preview(target), e);
                None
            }
        }
    }

    pub fn play(&self, file: &Path) -> Result<()> {
        self.audio.play(file)
    }

    // ── Speech ───────────────────────────────────────────────────────────────

    /// Synthesize until every speech instruction is cached or the round
    /// budget runs out.  Returns how many are still missing.
    fn synthesize_rounds(&mut self, script: &Script, output: &Path) -> usize {
        let mut missing = self.count_missing(script);
        for round in 1..=self.config.max_rounds {
            if missing == 0 {
                break;
            }
            debug!("Synthesis round {} ({} missing)", round, missing);
            self.synthesize_missing(script, output, missing);
            missing = self.count_missing(script);
        }
        missing
    }

    /// Whether `text` already has a downloaded speech clip.
    fn is_spoken(&self, text: &str) -> bool {
        matches!(self.cache.get(text), Some(CacheEntry::Speech { .. }))
    }

    /// Distinct speech texts without a clip yet.
    fn count_missing(&self, script: &Script) -> usize {
        script
            .speech()
            .filter(|(_, text)| !self.is_spoken(text))
            .map(|(_, text)| text)
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn synthesize_missing(&mut self, script: &Script, output: &Path, missing: usize) {
        let bar = ProgressBar::new(missing as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message("Synthesizing");

        // Repeated sentences share one clip and one attempt per round.
        let mut attempted = BTreeSet::new();
        for (ix, text) in script.speech() {
            if self.is_spoken(text) || !attempted.insert(text) {
                continue;
            }
            let file = self.unclaimed_clip_path(output, ix);
            match self.synthesize_one(text, &file) {
                Ok(entry) => {
                    self.cache.put(text, entry);
                }
                Err(e) => warn!("Could not synthesize {:?}: {}", text, e),
            }
            bar.inc(1);
        }
        bar.finish_and_clear();
    }

    fn synthesize_one(&self, text: &str, file: &Path) -> Result<CacheEntry> {
        let url = self.synthesizer.synthesize(text)?;
        download_to(self.fetcher.as_ref(), &url, file)?;
        Ok(CacheEntry::Speech { url, file: file.to_path_buf() })
    }

    /// [`clip_path`] for position `index`, suffixed `-1`, `-2`, … while an
    /// entry from an earlier run still points at the candidate.
    fn unclaimed_clip_path(&self, output: &Path, index: usize) -> PathBuf {
        let mut file = clip_path(output, index);
        let mut attempt = 0;
        while self.cache.references(&file) {
            attempt += 1;
            file = with_suffix(&clip_path(output, index), attempt);
        }
        file
    }

    // ── Silence and concatenation ────────────────────────────────────────────

    fn render_pauses(&mut self, script: &Script, dir: &Path) -> Result<()> {
        for instruction in script {
            let Instruction::Pause(secs) = instruction else {
                continue;
            };
            let cached = self.cache.get(instruction).and_then(CacheEntry::file);
            if cached.is_some_and(Path::exists) {
                continue;
            }
            let file = dir.join(format!("silence-{:.3}.{}", secs, AUDIO_EXT));
            if !file.exists() {
                debug!("Generating {} s of silence", secs);
                self.audio.generate_silence(
                    &file,
                    *secs,
                    self.config.sample_rate,
                    self.config.channels,
                )?;
            }
            self.cache.put(instruction, CacheEntry::Silence { file });
        }
        Ok(())
    }

    /// The local clip for every instruction, in script order.
    fn clip_files(&self, script: &Script) -> Result<Vec<PathBuf>> {
        script
            .iter()
            .map(|instruction| {
                self.cache
                    .get(instruction)
                    .and_then(CacheEntry::file)
                    .map(Path::to_path_buf)
                    .ok_or_else(|| Error::Synthesis(format!("no audio for {:?}", instruction)))
            })
            .collect()
    }
}

/// `<dir>/<output stem>-<index>.mp3` — stable per script position.
fn clip_path(output: &Path, index: usize) -> PathBuf {
    let stem = output.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    output.with_file_name(format!("{}-{:05}.{}", stem, index, AUDIO_EXT))
}

/// `post-00003.mp3` → `post-00003-2.mp3`.
fn with_suffix(file: &Path, n: usize) -> PathBuf {
    let stem = file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    file.with_file_name(format!("{}-{}.{}", stem, n, AUDIO_EXT))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::RawNode;
    use serde_json::Value;
    use std::{cell::Cell, collections::BTreeMap, rc::Rc};

    struct FakeFetcher;

    impl Fetcher for FakeFetcher {
        fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            Ok(url.as_bytes().to_vec())
        }

        fn get_json(&self, url: &str) -> Result<Value> {
            Err(Error::fetch(url, "offline"))
        }
    }

    struct FakeCaptioner;

    impl Captioner for FakeCaptioner {
        fn caption(&self, _image: &[u8]) -> Result<String> {
            Ok("A chart".into())
        }
    }

    /// Fails the first `failures` calls, then returns numbered URLs.
    struct FakeSynth {
        calls: Rc<Cell<usize>>,
        failures: usize,
    }

    impl Synthesizer for FakeSynth {
        fn synthesize(&self, text: &str) -> Result<String> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n < self.failures {
                return Err(Error::Synthesis(format!("busy: {}", text)));
            }
            Ok(format!("https://tts/{}.mp3", n))
        }
    }

    #[derive(Default)]
    struct FakeAudio {
        silences: Rc<Cell<usize>>,
    }

    impl AudioTool for FakeAudio {
        fn info(&self, _file: &Path) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }

        fn generate_silence(&self, output: &Path, secs: f64, _rate: u32, _ch: u16) -> Result<()> {
            self.silences.set(self.silences.get() + 1);
            std::fs::write(output, format!("<{:.1}>", secs)).map_err(|e| Error::io(output, e))
        }

        fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            let mut joined = Vec::new();
            for input in inputs {
                joined.extend(std::fs::read(input).map_err(|e| Error::io(input, e))?);
            }
            std::fs::write(output, joined).map_err(|e| Error::io(output, e))
        }

        fn play(&self, _file: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        narrator: Narrator,
        synth_calls: Rc<Cell<usize>>,
        silences: Rc<Cell<usize>>,
    }

    fn harness(failures: usize) -> Harness {
        let synth_calls = Rc::new(Cell::new(0));
        let silences = Rc::new(Cell::new(0));
        let narrator = Narrator::new(
            Config::default(),
            Box::new(FakeFetcher),
            Box::new(FakeCaptioner),
            Box::new(FakeSynth { calls: synth_calls.clone(), failures }),
            Box::new(FakeAudio { silences: silences.clone() }),
        );
        Harness { narrator, synth_calls, silences }
    }

    #[test]
    fn test_narrate_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        let mut h = harness(0);

        let written = h.narrator.narrate("<p>Hello world. Nice day.</p>", Some(&output)).unwrap();
        assert_eq!(written, output);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "https://tts/0.mp3<0.1>https://tts/1.mp3"
        );
        assert_eq!(h.synth_calls.get(), 2);
        assert_eq!(h.silences.get(), 1);
        assert!(dir.path().join("post-00000.mp3").exists());
        assert!(dir.path().join("post-00002.mp3").exists());

        let mut saved = Cache::new();
        saved.load(&dir.path().join("post.json")).unwrap();
        assert!(saved.has("Hello world."));
        assert!(saved.has(&Instruction::Pause(0.1)));
    }

    #[test]
    fn test_second_run_resumes_from_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        harness(0).narrator.narrate("<p>One. Two.</p>", Some(&output)).unwrap();

        let mut second = harness(0);
        second.narrator.narrate("<p>One. Two.</p>", Some(&output)).unwrap();
        assert_eq!(second.synth_calls.get(), 0);
        assert_eq!(second.silences.get(), 0);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        let mut h = harness(2);
        h.narrator.narrate("<p>One. Two.</p>", Some(&output)).unwrap();
        assert_eq!(h.synth_calls.get(), 4);
    }

    #[test]
    fn test_persistent_failure_reports_none_and_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        let mut h = harness(usize::MAX);

        assert!(h.narrator.read("<p>One. Two.</p>", Some(&output)).is_none());
        assert_eq!(h.synth_calls.get(), 2 * Config::default().max_rounds);
        assert!(!output.exists() || std::fs::read(&output).unwrap().is_empty());
        assert!(cache_path(&output).exists());
    }

    #[test]
    fn test_repeated_text_synthesized_once() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        let mut h = harness(0);
        h.narrator.narrate("<p>Yes.</p><p>Yes.</p>", Some(&output)).unwrap();
        assert_eq!(h.synth_calls.get(), 1);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "https://tts/0.mp3<0.5>https://tts/0.mp3"
        );
    }

    #[test]
    fn test_repeats_count_and_retry_once() {
        let script = normalize(vec![
            RawNode::text("Yes."),
            RawNode::Pause(0.5),
            RawNode::text("Yes."),
            RawNode::text("No."),
        ]);
        assert_eq!(harness(0).narrator.count_missing(&script), 2);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        let mut h = harness(1);
        h.narrator.config.max_rounds = 1;
        assert!(h.narrator.narrate("<p>Yes.</p><p>Yes.</p>", Some(&output)).is_err());
        assert_eq!(h.synth_calls.get(), 1);
    }

    #[test]
    fn test_equal_pauses_share_one_clip() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("list.mp3");
        let mut h = harness(0);
        h.narrator.narrate("<ul><li>A</li><li>B</li><li>C</li></ul>", Some(&output)).unwrap();
        assert_eq!(h.silences.get(), 1);
        assert_eq!(h.synth_calls.get(), 3);
    }

    #[test]
    fn test_image_captions_are_spoken() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("img.mp3");
        let mut h = harness(0);
        h.narrator
            .narrate(r#"<figure><img src="https://img/a.png"></figure>"#, Some(&output))
            .unwrap();
        assert!(h.narrator.cache().has("A chart"));
        assert!(h.narrator.cache().has("image:https://img/a.png"));
    }

    #[test]
    fn test_text_equal_to_image_url_is_still_spoken() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("img.mp3");
        let mut h = harness(0);
        h.narrator
            .narrate(
                r#"<figure><img src="https://img/a.png"></figure><p>https://img/a.png</p>"#,
                Some(&output),
            )
            .unwrap();
        assert_eq!(h.synth_calls.get(), 3);
        assert!(matches!(
            h.narrator.cache().get("https://img/a.png"),
            Some(CacheEntry::Speech { .. })
        ));
    }

    #[test]
    fn test_resume_with_shifted_content_keeps_old_clips() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("post.mp3");
        harness(0).narrator.narrate("<p>Hello.</p>", Some(&output)).unwrap();

        let mut second = harness(0);
        second.synth_calls.set(10);
        second.narrator.narrate("<p>Intro.</p><p>Hello.</p>", Some(&output)).unwrap();
        assert_eq!(second.synth_calls.get(), 11);

        let cache = second.narrator.cache();
        let hello = cache.get("Hello.").and_then(CacheEntry::file).unwrap();
        let intro = cache.get("Intro.").and_then(CacheEntry::file).unwrap();
        assert_ne!(hello, intro);
        assert_eq!(intro, dir.path().join("post-00000-1.mp3"));
        assert_eq!(std::fs::read_to_string(hello).unwrap(), "https://tts/0.mp3");
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "https://tts/10.mp3<0.5>https://tts/0.mp3"
        );
    }

    #[test]
    fn test_failures_do_not_panic() {
        let mut h = harness(0);
        assert!(h.narrator.read("https://example.com/post", None).is_none());
        assert!(h.narrator.read("https://me.substack.com/p/x", None).is_none());
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("empty.mp3");
        let mut h = harness(0);
        match h.narrator.narrate("<p></p>", Some(&output)) {
            Err(Error::EmptyDocument(source)) => assert_eq!(source, "<p></p>"),
            other => panic!("expected EmptyDocument, got {:?}", other),
        }
    }

    #[test]
    fn test_default_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::File(PathBuf::from("essays/my-essay.md"));
        let a = default_output_path(&target, dir.path()).unwrap();
        let b = default_output_path(&target, dir.path()).unwrap();
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("my-essay-"), "got: {}", name);
        assert!(name.ends_with(".mp3"), "got: {}", name);
        assert!(a.exists());
    }

    #[test]
    fn test_clip_and_cache_paths() {
        let output = Path::new("/tmp/out/post.mp3");
        assert_eq!(clip_path(output, 7), PathBuf::from("/tmp/out/post-00007.mp3"));
        assert_eq!(
            with_suffix(&clip_path(output, 7), 2),
            PathBuf::from("/tmp/out/post-00007-2.mp3")
        );
        assert_eq!(cache_path(output), PathBuf::from("/tmp/out/post.json"));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), 61);
    }
}
