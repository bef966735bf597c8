/*
 * Localization seam of the engine. Core code never embeds user-facing text;
 * it hands out string keys (for example on failure notices) and UI surfaces
 * resolve them through `LocalizerOperations`. The bundled implementation
 * reads a flat JSON map per language; a missing key falls back to the key
 * itself so a partially translated bundle degrades visibly but safely.
 */
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum LocalizationError {
    Io(io::Error),
    Serde(serde_json::Error),
}

impl From<io::Error> for LocalizationError {
    fn from(err: io::Error) -> Self {
        LocalizationError::Io(err)
    }
}

impl From<serde_json::Error> for LocalizationError {
    fn from(err: serde_json::Error) -> Self {
        LocalizationError::Serde(err)
    }
}

impl std::fmt::Display for LocalizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalizationError::Io(e) => write!(f, "Language bundle I/O error: {e}"),
            LocalizationError::Serde(e) => write!(f, "Language bundle parse error: {e}"),
        }
    }
}

impl std::error::Error for LocalizationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocalizationError::Io(e) => Some(e),
            LocalizationError::Serde(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalizationError>;

pub trait LocalizerOperations: Send + Sync {
    fn localized(&self, key: &str) -> String;
}

pub struct BundleLocalizer {
    strings: HashMap<String, String>,
}

impl BundleLocalizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let strings: HashMap<String, String> = serde_json::from_str(&raw)?;
        log::debug!(
            "BundleLocalizer: loaded {} strings from {path:?}",
            strings.len()
        );
        Ok(BundleLocalizer { strings })
    }

    pub fn from_map(strings: HashMap<String, String>) -> Self {
        BundleLocalizer { strings }
    }

    /// Empty bundle: every lookup falls back to the key.
    pub fn empty() -> Self {
        BundleLocalizer {
            strings: HashMap::new(),
        }
    }
}

impl LocalizerOperations for BundleLocalizer {
    fn localized(&self, key: &str) -> String {
        match self.strings.get(key) {
            Some(value) => value.clone(),
            None => {
                log::trace!("BundleLocalizer: no translation for key '{key}'");
                key.to_string()
            }
        }
    }
}
