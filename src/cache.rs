//! Persistent key → result cache for captions, speech clips and silence.
//!
//! Keys are taken in their canonical string form (via [`Display`]) so a
//! [`crate::script::Instruction`] and its string form address the same
//! entry.  The whole map is saved as one flat JSON object, sorted by key.
//!
//! ```json
//! {
//!   "Hello world.": {"url": "https://…/out.mp3", "file": "post-00000.mp3"},
//!   "image:https://…/image.png": "A dog on a beach",
//!   "silence:0.500": {"file": "silence-0.500.mp3"}
//! }
//! ```

use std::{collections::BTreeMap, fmt::Display, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A memoised result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheEntry {
    /// A synthesized clip: where the service put it and where we saved it.
    Speech { url: String, file: PathBuf },
    /// A generated silence clip.
    Silence { file: PathBuf },
    /// An image caption.
    Caption(String),
}

impl CacheEntry {
    /// The local audio file, for speech and silence entries.
    pub fn file(&self) -> Option<&Path> {
        match self {
            CacheEntry::Speech { file, .. } | CacheEntry::Silence { file } => Some(file),
            CacheEntry::Caption(_) => None,
        }
    }
}

/// How [`Cache::load_with`] resolves keys present both in memory and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// In-memory entries win; the file only fills gaps.
    #[default]
    KeepExisting,
    /// File entries overwrite in-memory ones.
    PreferFile,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cache {
    entries: BTreeMap<String, CacheEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has<K: Display + ?Sized>(&self, key: &K) -> bool {
        self.entries.contains_key(&key.to_string())
    }

    pub fn get<K: Display + ?Sized>(&self, key: &K) -> Option<&CacheEntry> {
        self.entries.get(&key.to_string())
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn put<K: Display + ?Sized>(&mut self, key: &K, value: CacheEntry) -> &CacheEntry {
        let key = key.to_string();
        self.entries.insert(key.clone(), value);
        &self.entries[&key]
    }

    /// Whether any entry's audio clip lives at `file`.
    pub fn references(&self, file: &Path) -> bool {
        self.entries.values().any(|entry| entry.file() == Some(file))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a saved cache into this one, keeping in-memory entries.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.load_with(path, MergePolicy::KeepExisting)
    }

    pub fn load_with(&mut self, path: &Path, policy: MergePolicy) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let loaded: BTreeMap<String, CacheEntry> = serde_json::from_slice(&bytes)
            .map_err(|source| Error::CacheFormat { path: path.to_path_buf(), source })?;
        debug!("Loaded {} cache entries from {}", loaded.len(), path.display());

        for (key, value) in loaded {
            match policy {
                MergePolicy::KeepExisting => {
                    self.entries.entry(key).or_insert(value);
                }
                MergePolicy::PreferFile => {
                    self.entries.insert(key, value);
                }
            }
        }
        Ok(())
    }

    /// Write the whole cache to `path`, replacing the file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)
            .map_err(|source| Error::CacheFormat { path: path.to_path_buf(), source })?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))?;
        debug!("Saved {} cache entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
