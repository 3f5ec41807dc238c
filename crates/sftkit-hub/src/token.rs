//! Hub access token discovery.
//!
//! The token is looked up in the same places the Hugging Face tooling uses:
//! `HF_TOKEN`, then `HUGGING_FACE_HUB_TOKEN`, then the token file under
//! `$HF_HOME` (defaulting to `~/.cache/huggingface/token`).

use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// An access token whose value never shows up in `Debug` or `Display` output.
#[derive(Clone)]
pub struct HubToken(Zeroizing<String>);

impl HubToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// Expose the raw token for an `Authorization` header.
    #[inline]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Resolve a token from the environment or the token file.
    pub fn discover() -> Option<Self> {
        for var in ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"] {
            if let Ok(value) = std::env::var(var) {
                if let Some(token) = Self::from_raw(&value) {
                    return Some(token);
                }
            }
        }

        Self::from_file(&token_path())
    }

    /// Read a token from a file, ignoring surrounding whitespace.
    pub fn from_file(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        Self::from_raw(&contents)
    }

    fn from_raw(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() { None } else { Some(Self::new(trimmed)) }
    }
}

impl fmt::Debug for HubToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HubToken([REDACTED])")
    }
}

impl fmt::Display for HubToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Location of the hub home directory (`$HF_HOME` or `~/.cache/huggingface`).
pub fn hf_home() -> PathBuf {
    if let Ok(home) = std::env::var("HF_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("huggingface")
}

fn token_path() -> PathBuf {
    hf_home().join("token")
}
