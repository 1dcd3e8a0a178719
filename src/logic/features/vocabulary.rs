//! Encoding Vocabulary - categorical value → stable index
//!
//! Built once offline with the `unknown` sentinel included from
//! construction, loaded read-only by the serving path. `lookup` is total:
//! every value maps either to its trained index or to the sentinel.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::layout::{layout_hash, validate_layout, FEATURE_VERSION};
use crate::logic::error::ArtifactError;

/// Reserved class for values never seen during training
pub const UNKNOWN_CLASS: &str = "unknown";

/// On-disk form: known classes in index order, sentinel last
#[derive(Debug, Serialize, Deserialize)]
struct VocabularyFile {
    field: String,
    feature_version: u8,
    layout_hash: u32,
    classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EncodingVocabulary {
    field: String,
    classes: Vec<String>,
    index: HashMap<String, u32>,
}

impl EncodingVocabulary {
    /// Fit from observed values: sorted unique classes, sentinel appended.
    pub fn fit<'a, I>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: BTreeSet<&str> = values
            .into_iter()
            .filter(|v| *v != UNKNOWN_CLASS)
            .collect();
        Self::from_known(field, unique.into_iter().map(str::to_string).collect())
    }

    fn from_known(field: &str, classes: Vec<String>) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, class)| (class.clone(), i as u32))
            .collect();

        Self {
            field: field.to_string(),
            classes,
            index,
        }
    }

    /// Total lookup: trained index, or the sentinel index
    pub fn lookup(&self, value: &str) -> u32 {
        self.index_of(value).unwrap_or_else(|| self.unknown_index())
    }

    /// Trained index only
    pub fn index_of(&self, value: &str) -> Option<u32> {
        self.index.get(value).copied()
    }

    /// Sentinel index, one beyond the trained range
    pub fn unknown_index(&self) -> u32 {
        self.classes.len() as u32
    }

    /// Number of trained classes (sentinel excluded)
    pub fn known_len(&self) -> usize {
        self.classes.len()
    }

    #[cfg(test)]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Save vocabulary to disk
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut classes = self.classes.clone();
        classes.push(UNKNOWN_CLASS.to_string());
        let file = VocabularyFile {
            field: self.field.clone(),
            feature_version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            classes,
        };

        let json = serde_json::to_vec_pretty(&file).map_err(|source| ArtifactError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load vocabulary from disk with validation
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }

        let data = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: VocabularyFile =
            serde_json::from_slice(&data).map_err(|source| ArtifactError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        validate_layout(file.feature_version, file.layout_hash)?;

        let mut classes = file.classes;
        if classes.last().map(String::as_str) != Some(UNKNOWN_CLASS) {
            return Err(ArtifactError::MissingSentinel(file.field));
        }
        classes.pop();

        // The sentinel may only appear once, in last position
        if classes.iter().any(|c| c == UNKNOWN_CLASS) {
            return Err(ArtifactError::DuplicateClass {
                field: file.field,
                value: UNKNOWN_CLASS.to_string(),
            });
        }

        let vocabulary = Self::from_known(&file.field, classes);
        if vocabulary.index.len() != vocabulary.classes.len() {
            let mut seen = BTreeSet::new();
            let duplicate = vocabulary
                .classes
                .iter()
                .find(|c| !seen.insert(c.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(ArtifactError::DuplicateClass {
                field: vocabulary.field,
                value: duplicate,
            });
        }

        log::info!(
            "Loaded '{}' vocabulary: {} classes (+ sentinel) from {}",
            vocabulary.field,
            vocabulary.known_len(),
            path.display()
        );
        Ok(vocabulary)
    }
}
