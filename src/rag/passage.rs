//! # Passage Store
//!
//! The legal corpus as loaded at startup: one [`Passage`] per metadata record and
//! a [`VectorIndex`] whose row `i` is the embedding of passage `i`. Nothing in the
//! store changes after [`PassageStore::load`] returns, so it can be shared behind
//! an `Arc` without locking.

use crate::rag::error::RagError;
use crate::rag::index::VectorIndex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Shown in citations when a passage carries no law title.
pub const UNNAMED_LAW: &str = "قانون غير مُسمّى";

/// One retrievable unit of legal text.
///
/// `article_title` and `url` are `None` when the metadata omits them or holds an
/// empty string. A missing or null `law_title` / `text` loads as `""`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub law_title: String,
    pub article_title: Option<String>,
    pub text: String,
    pub url: Option<String>,
}

/// Metadata record exactly as found on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PassageRecord {
    law_title: Option<String>,
    article_title: Option<String>,
    text: Option<String>,
    url: Option<String>,
}

impl From<PassageRecord> for Passage {
    fn from(record: PassageRecord) -> Self {
        Self {
            law_title: record.law_title.unwrap_or_default(),
            article_title: non_empty(record.article_title),
            text: record.text.unwrap_or_default(),
            url: non_empty(record.url),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl Passage {
    pub fn new(law_title: &str, article_title: Option<&str>, text: &str, url: Option<&str>) -> Self {
        Self {
            law_title: law_title.to_string(),
            article_title: non_empty(article_title.map(str::to_string)),
            text: text.to_string(),
            url: non_empty(url.map(str::to_string)),
        }
    }

    /// Citation name: `"{article} — {law}"`, the law title alone, or a placeholder.
    pub fn display_title(&self) -> String {
        let law = if self.law_title.trim().is_empty() {
            UNNAMED_LAW
        } else {
            self.law_title.as_str()
        };
        match &self.article_title {
            Some(article) => format!("{} — {}", article, law),
            None => law.to_string(),
        }
    }
}

/// Passage metadata plus the similarity index built over it.
#[derive(Debug)]
pub struct PassageStore {
    passages: Vec<Passage>,
    index: VectorIndex,
}

impl PassageStore {
    /// Load the index file and the metadata JSON array.
    ///
    /// Fails with [`RagError::Load`] if either file is missing or malformed. A row
    /// count that differs from the metadata length is allowed; search hits that
    /// fall outside the metadata are dropped at query time.
    pub fn load(index_path: impl AsRef<Path>, metadata_path: impl AsRef<Path>) -> Result<Self, RagError> {
        let index_path = index_path.as_ref();
        let metadata_path = metadata_path.as_ref();

        info!("Loading vector index from {}", index_path.display());
        let index = VectorIndex::load(index_path)?;

        info!("Loading passage metadata from {}", metadata_path.display());
        let raw = std::fs::read_to_string(metadata_path).map_err(|e| {
            RagError::Load(format!("cannot read metadata {}: {}", metadata_path.display(), e))
        })?;
        let records: Vec<PassageRecord> = serde_json::from_str(&raw).map_err(|e| {
            RagError::Load(format!(
                "metadata {} is not a JSON array of passages: {}",
                metadata_path.display(),
                e
            ))
        })?;

        let store = Self::from_parts(records.into_iter().map(Passage::from).collect(), index);
        info!(
            passages = store.len(),
            index_rows = store.index.len(),
            dimension = store.index.dimension(),
            "Knowledge base loaded"
        );
        Ok(store)
    }

    pub fn from_parts(passages: Vec<Passage>, index: VectorIndex) -> Self {
        if passages.len() != index.len() {
            warn!(
                passages = passages.len(),
                index_rows = index.len(),
                "Index rows and metadata entries differ in count"
            );
        }
        Self { passages, index }
    }

    /// Passage at `position`, or `None` outside `[0, len)`.
    pub fn get(&self, position: usize) -> Option<&Passage> {
        self.passages.get(position)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}
