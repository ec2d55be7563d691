//! Content rendering interface and fingerprinting.
//!
//! File items produce a byte payload before anything is uploaded. The core
//! knows four content types: `text` is used verbatim, `binary` bypasses
//! rendering and is uploaded straight from its source file, `template` is
//! delegated to an externally supplied [`ContentRenderer`], and `any` means
//! "only existence matters" and produces an empty payload that is never
//! diffed.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// How a file item's payload is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// Existence check only; content is never compared or uploaded.
    Any,
    /// Uploaded directly from the source file, no rendering pass.
    Binary,
    /// The declared content or source text, byte for byte.
    #[default]
    Text,
    /// Rendered through the injected [`ContentRenderer`].
    Template,
}

impl ContentType {
    /// Accepted spellings in item declarations.
    pub const NAMES: &'static [&'static str] = &["any", "binary", "text", "template"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "any" => Some(Self::Any),
            "binary" => Some(Self::Binary),
            "text" => Some(Self::Text),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Template => "template",
        }
    }
}

/// Renders template source into a final byte payload.
///
/// The core ships no template language. Whatever implements this trait
/// decides the syntax; errors should carry enough detail to point at the
/// failing construct.
pub trait ContentRenderer: Send + Sync {
    fn render(&self, source: &str, context: &BTreeMap<String, String>) -> Result<Vec<u8>>;
}

/// Hex blake3 fingerprint of an in-memory payload.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hex blake3 fingerprint of a local file, streamed.
pub fn hash_local_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
