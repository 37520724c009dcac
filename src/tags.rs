//! Tag table loaded from the model's CSV side-car
//!
//! The table maps a model output index to a tag name and an opaque category
//! code. Rows are indexed in file order; the header must carry `name` and
//! `category` columns (other columns such as `tag_id` or `count` are ignored).
//! Blank lines are skipped and quoted fields may contain commas.

use crate::error::{Result, TaggerError};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TagRow {
    name: String,
    category: i64,
}

/// One row of the tag table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Model output index
    pub index: usize,
    /// Tag name as published by the model
    pub name: String,
    /// Category code from the model's training metadata, passed through as-is
    pub category: i64,
}

/// Immutable lookup from output index to tag
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    entries: Vec<TagEntry>,
}

impl TagTable {
    /// Load and parse a tag table file
    pub fn from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TaggerError::load_error_with_path("tag table", path, &e.to_string()))?;

        Self::parse_csv(&contents)
            .map_err(|e| TaggerError::load_error_with_path("tag table", path, &e.to_string()))
    }

    /// Parse tag table CSV text
    pub fn parse_csv(contents: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| TaggerError::load(format!("unreadable tag table header: {e}")))?;
        if headers.is_empty() || headers.iter().all(str::is_empty) {
            return Err(TaggerError::load("tag table is empty"));
        }
        for wanted in ["name", "category"] {
            if !headers.iter().any(|column| column == wanted) {
                return Err(TaggerError::load(format!(
                    "tag table has no '{wanted}' column"
                )));
            }
        }

        let mut entries = Vec::new();
        for (index, row) in reader.deserialize::<TagRow>().enumerate() {
            let row = row.map_err(|e| TaggerError::load(format!("row {}: {e}", index + 2)))?;
            entries.push(TagEntry {
                index,
                name: row.name,
                category: row.category,
            });
        }

        tracing::debug!("Parsed tag table with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Build a table directly from `(name, category)` pairs
    #[must_use]
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .enumerate()
                .map(|(index, (name, category))| TagEntry {
                    index,
                    name: name.into(),
                    category,
                })
                .collect(),
        }
    }

    /// Entry for a model output index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TagEntry> {
        self.entries.get(index)
    }

    /// Number of tags
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no tags
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.iter()
    }
}
