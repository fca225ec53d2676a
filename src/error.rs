//! Error type shared by every stage of the narration pipeline.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A remote target whose host we don't know how to read.
    #[error("Don't know how to get a script from '{0}'")]
    UnsupportedSource(String),

    /// A local file that is neither Markdown nor HTML.
    #[error("Unsupported file type: {}", .0.display())]
    UnsupportedExtension(PathBuf),

    /// The document yielded no speech at all.
    #[error("Nothing to read in '{0}'")]
    EmptyDocument(String),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Image captioning failed: {0}")]
    Caption(String),

    #[error("`{command}` failed: {message}")]
    AudioTool { command: String, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache file {}: {source}", path.display())]
    CacheFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn fetch(url: &str, message: impl ToString) -> Self {
        Self::Fetch { url: url.to_string(), message: message.to_string() }
    }
}
