//! Text cleanup and sentence splitting.
//!
//! Everything here is a pure string function: the extractor uses [`sanitize`]
//! on element text, the normalizer uses [`split_sentences`] to break
//! paragraphs into speech-sized units, and the captioner uses
//! [`clean_caption`] on model output.

use once_cell::sync::Lazy;
use regex::Regex;

// ─────────────────────────────────────────────────────────────────────────────
// Compiled regexes (lazily initialised once)
// ─────────────────────────────────────────────────────────────────────────────

static RE_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[\]]").unwrap());

/// UTF-8 `’` decoded as Windows-1252, which shows up in scraped posts.
static RE_MOJIBAKE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new("\u{e2}\u{20ac}\u{2122}").unwrap());

/// Sentence terminators, then any closing quotes/brackets, then whitespace.
static RE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?…]+["'”’)\]]*\s+"#).unwrap());

static RE_CAPTION_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Caption:\s*").unwrap());

/// Lower-cased words that are followed by a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "ft", "vs", "e.g", "i.e",
    "cf", "al", "inc", "ltd", "co", "corp", "gen", "gov", "sen", "rep", "rev", "capt",
    "lt", "col", "sgt", "fig", "approx", "dept", "est", "jan", "feb", "mar", "apr",
    "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec", "u.s", "u.k",
];

// ─────────────────────────────────────────────────────────────────────────────
// Cleanup
// ─────────────────────────────────────────────────────────────────────────────

/// Trim, drop square brackets and repair the mis-decoded right single quote.
pub fn sanitize(text: &str) -> String {
    let text = RE_BRACKETS.replace_all(text.trim(), "");
    RE_MOJIBAKE_QUOTE.replace_all(&text, "'").into_owned()
}

/// Upper-case the first character and lower-case the rest.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => {
            let rest = chars.as_str().to_lowercase();
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

/// Strip the `Caption:` label captioning models prepend, then capitalize.
pub fn clean_caption(raw: &str) -> String {
    capitalize(RE_CAPTION_PREFIX.replace(raw.trim(), "").trim())
}

// ─────────────────────────────────────────────────────────────────────────────
// Sentence splitting
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the token ending at a single `.` is an abbreviation or initial.
fn is_abbreviation(before: &str) -> bool {
    let word = before
        .split_whitespace()
        .next_back()
        .unwrap_or("")
        .trim_start_matches(|c: char| "\"'“‘([".contains(c));
    if word.is_empty() {
        return false;
    }
    let mut chars = word.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        // "J. R. R. Tolkien"
        return c.is_alphabetic() && c.is_uppercase();
    }
    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

/// Split English prose into sentences.
///
/// A boundary is a run of `.`, `!`, `?` or `…` (plus any closing quotes or
/// brackets) followed by whitespace, where the next sentence does not start
/// with a lower-case letter and a lone `.` does not follow a known
/// abbreviation or single-letter initial.  Returned sentences are trimmed;
/// blank input yields no sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in RE_BOUNDARY.find_iter(text) {
        let next = text[m.end()..].chars().next();
        if next.map_or(true, char::is_lowercase) {
            continue;
        }
        let punct = m.as_str().trim_end();
        let terminator: String = punct.chars().take_while(|c| ".!?…".contains(*c)).collect();
        if terminator == "." && is_abbreviation(&text[start..m.start()]) {
            continue;
        }

        let sentence = text[start..m.start() + punct.len()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = m.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
