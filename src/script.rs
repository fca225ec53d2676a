//! Narration scripts: raw extractor output → flat speak/pause instructions.
//!
//! Normalisation is two passes over owned vectors:
//!
//! 1. [`break_paragraphs`] — every text node is split into sentences; a
//!    multi-sentence node becomes one [`Instruction::Speak`] per sentence,
//!    each followed by a short [`SENTENCE_PAUSE`].
//! 2. [`merge_silence`] — runs of adjacent pauses collapse into one pause with
//!    the summed duration, and a trailing pause is dropped.
//!
//! Sentence splitting and element boundaries both add pauses, so they are
//! frequently adjacent after pass 1; pass 2 exists to clean that up.

use std::fmt;

use tracing::debug;

use crate::preprocess::split_sentences;

/// Pause inserted after every sentence of a multi-sentence paragraph.
pub const SENTENCE_PAUSE: f64 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// Instructions
// ─────────────────────────────────────────────────────────────────────────────

/// One step of playback.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Synthesize and play this text.
    Speak(String),
    /// Play this many seconds of silence.
    Pause(f64),
}

impl Instruction {
    pub fn is_pause(&self) -> bool {
        matches!(self, Instruction::Pause(_))
    }
}

/// The canonical string form, used as the cache key.
///
/// Speech is keyed by its literal text.  Pauses are keyed by their duration
/// rounded to milliseconds so that sums like `0.1 + 0.2` key identically on
/// every run.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Speak(text) => f.write_str(text),
            Instruction::Pause(secs) => write!(f, "silence:{:.3}", secs),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Extractor output, before sentence splitting and pause merging.
#[derive(Debug, Clone, PartialEq)]
pub enum RawNode {
    /// Prose that may hold several sentences.
    Text(String),
    Pause(f64),
    /// An element no extraction rule matched, kept by tag name.  Dropped
    /// during normalisation.
    Unrecognized(String),
}

impl RawNode {
    pub fn text(text: impl Into<String>) -> Self {
        RawNode::Text(text.into())
    }
}

impl From<Instruction> for RawNode {
    fn from(instruction: Instruction) -> Self {
        match instruction {
            Instruction::Speak(text) => RawNode::Text(text),
            Instruction::Pause(secs) => RawNode::Pause(secs),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Passes
// ─────────────────────────────────────────────────────────────────────────────

/// Split every text node into sentence-sized speech instructions.
pub fn break_paragraphs(nodes: Vec<RawNode>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            RawNode::Text(text) => {
                let sentences = split_sentences(&text);
                if sentences.len() == 1 {
                    out.push(Instruction::Speak(text));
                } else {
                    for sentence in sentences {
                        out.push(Instruction::Speak(sentence));
                        out.push(Instruction::Pause(SENTENCE_PAUSE));
                    }
                }
            }
            RawNode::Pause(secs) => out.push(Instruction::Pause(secs.max(0.0))),
            RawNode::Unrecognized(tag) => debug!("Dropping unrecognized element <{}>", tag),
        }
    }
    out
}

/// Merge adjacent pauses into longer ones and drop any trailing pause.
pub fn merge_silence(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(instructions.len());
    let mut pending: Option<f64> = None;
    for instruction in instructions {
        match instruction {
            Instruction::Pause(secs) => *pending.get_or_insert(0.0) += secs,
            speak => {
                if let Some(secs) = pending.take() {
                    out.push(Instruction::Pause(secs));
                }
                out.push(speak);
            }
        }
    }
    out
}

/// Run both passes.
pub fn normalize(nodes: Vec<RawNode>) -> Script {
    Script { instructions: merge_silence(break_paragraphs(nodes)) }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script
// ─────────────────────────────────────────────────────────────────────────────

/// A normalised, immutable narration script.
///
/// No two pauses are adjacent and the script never ends with a pause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    instructions: Vec<Instruction>,
}

impl Script {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Speech instructions with their position in the script.
    pub fn speech(&self) -> impl Iterator<Item = (usize, &str)> {
        self.instructions.iter().enumerate().filter_map(|(i, ins)| match ins {
            Instruction::Speak(text) => Some((i, text.as_str())),
            Instruction::Pause(_) => None,
        })
    }

    /// Run the script back through normalisation.
    pub fn renormalize(&self) -> Script {
        normalize(self.instructions.iter().cloned().map(RawNode::from).collect())
    }
}

impl<'a> IntoIterator for &'a Script {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
