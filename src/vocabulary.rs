//! Closed vocabulary of alternative conceptions (ACs).
//!
//! Loaded once per process and never mutated afterwards. The catalog is
//! compiled into the binary; `[classifier] vocabulary_path` swaps in an
//! external file with the same shape.

use crate::TutorError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Sentinel label for "classification unavailable". Never part of the catalog.
pub const UNKNOWN_TAG: &str = "AC_UNK";

const EMBEDDED_CATALOG: &str = include_str!("../data/ac_catalog.json");

static VOCABULARY: OnceLock<AcVocabulary> = OnceLock::new();

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
}

#[derive(Debug, Clone)]
pub struct AcVocabulary {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl AcVocabulary {
    pub fn from_json(raw: &str) -> Result<Self, TutorError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(raw)?;
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let id = entry.id.trim();
            if id.is_empty() {
                return Err(TutorError::Config(format!("vocabulary entry {i} has an empty id")));
            }
            if id == UNKNOWN_TAG {
                return Err(TutorError::Config(format!(
                    "vocabulary must not define the sentinel {UNKNOWN_TAG}"
                )));
            }
            if index.insert(id.to_string(), i).is_some() {
                return Err(TutorError::Config(format!("duplicate vocabulary id {id}")));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn embedded() -> Result<Self, TutorError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn from_file(path: &Path) -> Result<Self, TutorError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| TutorError::Config(format!("{}: {e}", path.display())))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(|&i| self.entries[i].name.as_str())
    }

    /// Ids in catalog order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.trim())
    }

    /// `(id, display name)` pairs in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.id.trim(), e.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load the process-wide vocabulary on first call; later calls return the
/// already-loaded catalog and ignore `path`.
pub fn init(path: Option<&Path>) -> Result<&'static AcVocabulary, TutorError> {
    if let Some(vocab) = VOCABULARY.get() {
        return Ok(vocab);
    }
    let vocab = match path {
        Some(p) => AcVocabulary::from_file(p)?,
        None => AcVocabulary::embedded()?,
    };
    log::debug!("loaded {} alternative conceptions", vocab.len());
    Ok(VOCABULARY.get_or_init(|| vocab))
}
