//! # read-aloud
//!
//! Turn an article (HTML, Markdown or a Substack post) into one narrated
//! audio file.
//!
//! ## Quick start
//!
//! ```no_run
//! use read_aloud::{Config, Narrator};
//!
//! // Reads REPLICATE_API_TOKEN from the environment; needs `sox` on $PATH.
//! let mut narrator = Narrator::from_config(Config::default()).unwrap();
//! let path = narrator
//!     .narrate("https://example.substack.com/p/some-post", None)
//!     .unwrap();
//! println!("Wrote {}", path.display());
//! ```
//!
//! The script pipeline runs without any network access:
//!
//! ```
//! use read_aloud::script::{normalize, Instruction, RawNode};
//!
//! let script = normalize(vec![
//!     RawNode::text("Hello world. Nice day."),
//!     RawNode::Pause(0.5),
//! ]);
//! assert_eq!(
//!     script.instructions(),
//!     &[
//!         Instruction::Speak("Hello world.".into()),
//!         Instruction::Pause(0.1),
//!         Instruction::Speak("Nice day.".into()),
//!     ]
//! );
//! ```
//!
//! ## Pipeline
//! 1. **Extraction** — document body → raw text and pause nodes, one rule per
//!    element type; images are captioned.
//! 2. **Sentence splitting** — multi-sentence text becomes one speech unit
//!    per sentence, each followed by a 0.1 s pause.
//! 3. **Pause merging** — adjacent pauses are summed, a trailing pause dropped.
//! 4. **Synthesis** — every uncached sentence is sent to the speech model and
//!    the clip downloaded.
//! 5. **Silence** — one SoX-generated clip per distinct pause length.
//! 6. **Concat** — all clips joined by SoX; the cache is saved next to the
//!    output so a later run can resume.

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod model;
pub mod narrate;
pub mod preprocess;
pub mod script;
pub mod sox;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use cache::{Cache, CacheEntry, MergePolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use narrate::Narrator;
pub use script::{Instruction, Script};
