//! Document extraction — HTML, Markdown or a Substack post → [`RawNode`]s.
//!
//! Each top-level child of the document body is classified into an
//! [`Element`] and expanded by a fixed rule:
//!
//! | Element                     | Nodes                                                    |
//! |-----------------------------|----------------------------------------------------------|
//! | `p`                         | text, pause 0.5                                          |
//! | `a`                         | text, "(link in post.)", pause 0.2                       |
//! | anything with an `img`      | "Here we see an image of:", caption, pause 0.5           |
//! | `h1`–`h3`                   | text, pause 1.0                                          |
//! | `blockquote`, ≤ 1 paragraph | "Quote:", text, pause 0.5                                |
//! | `blockquote`, 2+ paragraphs | intro, each paragraph, pause, "Now we resume…", pause    |
//! | text                        | the text, unless blank                                   |
//! | `ul` / `ol`                 | each item + pause 0.5, then a final pause 0.5            |
//!
//! Anything else is kept as [`RawNode::Unrecognized`].

use std::path::{Path, PathBuf};

use kuchikikiki::{traits::TendrilSink, NodeRef};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
    cache::{Cache, CacheEntry},
    download::Fetcher,
    error::{Error, Result},
    model::Captioner,
    preprocess::sanitize,
    script::RawNode,
};

pub const PARAGRAPH_PAUSE: f64 = 0.5;
pub const LINK_PAUSE: f64 = 0.2;
pub const HEADING_PAUSE: f64 = 1.0;

const LINK_NOTE: &str = "(link in post.)";
const IMAGE_INTRO: &str = "Here we see an image of:";
const QUOTE_INTRO: &str = "Quote:";
const LONG_QUOTE_INTRO: &str = "There is a longer quote:";
const LONG_QUOTE_OUTRO: &str = "Now we resume the text.";

// ─────────────────────────────────────────────────────────────────────────────
// Targets
// ─────────────────────────────────────────────────────────────────────────────

/// What a command-line target refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A Substack post URL.
    Substack(String),
    /// An existing local file.
    File(PathBuf),
    /// Literal HTML.
    Inline(String),
}

impl Target {
    pub fn parse(target: &str) -> Result<Self> {
        if target.starts_with("http") {
            if target.contains("substack") {
                return Ok(Target::Substack(target.to_string()));
            }
            return Err(Error::UnsupportedSource(target.to_string()));
        }
        let path = Path::new(target);
        if path.is_file() {
            Ok(Target::File(path.to_path_buf()))
        } else {
            Ok(Target::Inline(target.to_string()))
        }
    }

    /// A short file-name-safe name for output derived from this target.
    pub fn stem(&self) -> String {
        let raw = match self {
            Target::Substack(url) => url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            Target::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Target::Inline(_) => String::new(),
        };
        let stem: String = raw
            .chars()
            .take_while(|c| *c != '?' && *c != '#')
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if stem.is_empty() {
            "read-audio".to_string()
        } else {
            stem
        }
    }
}

/// The public API endpoint for a Substack post URL.
///
/// `https://name.substack.com/p/my-post` → `https://name.substack.com/api/v1/posts/my-post`
pub fn substack_api_url(post_url: &str) -> Result<String> {
    let unsupported = || Error::UnsupportedSource(post_url.to_string());
    let parsed = Url::parse(post_url).map_err(|_| unsupported())?;
    let host = parsed.host_str().ok_or_else(unsupported)?;
    let subdomain = host.split('.').next().unwrap_or(host);
    let slug = parsed
        .path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty() && *s != "p"))
        .ok_or_else(unsupported)?;
    Ok(format!("https://{}.substack.com/api/v1/posts/{}", subdomain, slug))
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, pulldown_cmark::Parser::new(markdown));
    html
}

/// Cache key for the caption of the image at `url`.
pub fn caption_key(url: &str) -> String {
    format!("image:{}", url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Element classification
// ─────────────────────────────────────────────────────────────────────────────

/// A top-level document node, by the rule that applies to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Paragraph(String),
    Link(String),
    /// Carries the image source, if one could be found.
    Image(Option<String>),
    Heading(String),
    Blockquote { text: String, paragraphs: Vec<String> },
    List(Vec<String>),
    Text(String),
    Other(String),
}

/// Source URL of the first image in `node`: Substack's `data-attrs` JSON
/// first, then the plain `src` attribute.  `None` when there is no image.
fn image_source(node: &NodeRef) -> Option<Option<String>> {
    let img = node.select_first("img").ok()?;
    let attrs = img.attributes.borrow();
    let from_data_attrs = attrs
        .get("data-attrs")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|v| v.get("src")?.as_str().map(String::from));
    Some(from_data_attrs.or_else(|| attrs.get("src").map(String::from)))
}

fn select_texts(node: &NodeRef, selector: &str) -> Vec<String> {
    node.select(selector)
        .map(|found| found.map(|el| el.as_node().text_contents()).collect())
        .unwrap_or_default()
}

pub fn classify(node: &NodeRef) -> Element {
    if let Some(text) = node.as_text() {
        return Element::Text(text.borrow().clone());
    }
    let Some(element) = node.as_element() else {
        return Element::Other("#non-element".to_string());
    };
    let name: &str = &element.name.local;
    match (name, image_source(node)) {
        ("p", _) => Element::Paragraph(node.text_contents()),
        ("a", _) => Element::Link(node.text_contents()),
        (_, Some(src)) => Element::Image(src),
        ("h1" | "h2" | "h3", None) => Element::Heading(node.text_contents()),
        ("blockquote", None) => Element::Blockquote {
            text: node.text_contents(),
            paragraphs: select_texts(node, "p"),
        },
        ("ul" | "ol", None) => Element::List(select_texts(node, "li")),
        (other, None) => Element::Other(other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractor
// ─────────────────────────────────────────────────────────────────────────────

/// Turns targets into raw nodes, captioning images through the cache.
pub struct Extractor<'a> {
    fetcher: &'a dyn Fetcher,
    captioner: &'a dyn Captioner,
    cache: &'a mut Cache,
}

impl<'a> Extractor<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, captioner: &'a dyn Captioner, cache: &'a mut Cache) -> Self {
        Self { fetcher, captioner, cache }
    }

    pub fn from_target(&mut self, target: &Target) -> Result<Vec<RawNode>> {
        match target {
            Target::Substack(url) => self.from_substack(url),
            Target::File(path) => self.from_file(path),
            Target::Inline(html) => self.from_html(html),
        }
    }

    pub fn from_file(&mut self, path: &Path) -> Result<Vec<RawNode>> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let is_markdown = matches!(ext.as_str(), "md" | "markdown");
        if !is_markdown && !matches!(ext.as_str(), "html" | "htm") {
            return Err(Error::UnsupportedExtension(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if is_markdown {
            self.from_markdown(&contents)
        } else {
            self.from_html(&contents)
        }
    }

    pub fn from_markdown(&mut self, markdown: &str) -> Result<Vec<RawNode>> {
        self.from_html(&markdown_to_html(markdown))
    }

    pub fn from_substack(&mut self, post_url: &str) -> Result<Vec<RawNode>> {
        let api_url = substack_api_url(post_url)?;
        info!("Fetching post from {}", api_url);
        let post = self.fetcher.get_json(&api_url)?;

        let body = post
            .get("body_html")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::fetch(&api_url, "response has no body_html"))?;

        let mut nodes: Vec<RawNode> = ["title", "subtitle"]
            .iter()
            .filter_map(|field| post.get(*field).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(RawNode::text)
            .collect();
        nodes.extend(self.from_html(body)?);
        Ok(nodes)
    }

    pub fn from_html(&mut self, html: &str) -> Result<Vec<RawNode>> {
        let document = kuchikikiki::parse_html().one(html);
        let body = match document.select_first("body") {
            Ok(body) => body.as_node().clone(),
            Err(()) => document,
        };
        let mut nodes = Vec::new();
        for child in body.children() {
            nodes.extend(self.expand(classify(&child))?);
        }
        Ok(nodes)
    }

    fn expand(&mut self, element: Element) -> Result<Vec<RawNode>> {
        let nodes = match element {
            Element::Paragraph(text) => {
                vec![RawNode::text(sanitize(&text)), RawNode::Pause(PARAGRAPH_PAUSE)]
            }
            Element::Link(text) => vec![
                RawNode::text(sanitize(&text)),
                RawNode::text(LINK_NOTE),
                RawNode::Pause(LINK_PAUSE),
            ],
            Element::Image(src) => {
                let src = src.ok_or_else(|| Error::Caption("image has no source URL".into()))?;
                vec![
                    RawNode::text(IMAGE_INTRO),
                    RawNode::text(self.caption(&src)?),
                    RawNode::Pause(PARAGRAPH_PAUSE),
                ]
            }
            Element::Heading(text) => {
                vec![RawNode::text(sanitize(&text)), RawNode::Pause(HEADING_PAUSE)]
            }
            Element::Blockquote { text, paragraphs } if paragraphs.len() < 2 => vec![
                RawNode::text(QUOTE_INTRO),
                RawNode::text(sanitize(&text)),
                RawNode::Pause(PARAGRAPH_PAUSE),
            ],
            Element::Blockquote { paragraphs, .. } => {
                let mut nodes = vec![RawNode::text(LONG_QUOTE_INTRO)];
                nodes.extend(paragraphs.iter().map(|p| RawNode::text(sanitize(p))));
                nodes.extend([
                    RawNode::Pause(PARAGRAPH_PAUSE),
                    RawNode::text(LONG_QUOTE_OUTRO),
                    RawNode::Pause(PARAGRAPH_PAUSE),
                ]);
                nodes
            }
            Element::Text(text) if text.trim().is_empty() => Vec::new(),
            Element::Text(text) => vec![RawNode::Text(text)],
            Element::List(items) => {
                let mut nodes: Vec<RawNode> = items
                    .iter()
                    .flat_map(|item| [RawNode::text(sanitize(item)), RawNode::Pause(PARAGRAPH_PAUSE)])
                    .collect();
                nodes.push(RawNode::Pause(PARAGRAPH_PAUSE));
                nodes
            }
            Element::Other(tag) => {
                debug!("Unrecognized element <{}>", tag);
                vec![RawNode::Unrecognized(tag)]
            }
        };
        Ok(nodes)
    }

    /// Caption for the image at `url`, from the cache or the captioner.
    fn caption(&mut self, url: &str) -> Result<String> {
        let key = caption_key(url);
        if let Some(CacheEntry::Caption(caption)) = self.cache.get(&key) {
            return Ok(caption.clone());
        }
        debug!("Captioning {}", url);
        let image = self.fetcher.get_bytes(url)?;
        let caption = self.captioner.caption(&image)?;
        self.cache.put(&key, CacheEntry::Caption(caption.clone()));
        Ok(caption)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
