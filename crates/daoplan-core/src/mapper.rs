//! External SQL-id lookup store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::{self, Hash256};

/// SQL text plus the per-id attributes that may override a tag's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlEntry {
    pub sql: String,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub fetch_size: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl SqlEntry {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            timeout: None,
            fetch_size: None,
            batch_size: None,
        }
    }
}

/// Anything that can answer `get(id)`.
pub trait SqlLookup: Send + Sync {
    fn get(&self, id: &str) -> Option<SqlEntry>;

    /// Stable identity used when caching compiled dispatch tables.
    fn fingerprint(&self) -> Hash256;
}

/// In-process id -> SQL table, typically loaded from YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlMapper {
    entries: BTreeMap<String, SqlEntry>,
}

impl SqlMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, id: impl Into<String>, entry: SqlEntry) -> Self {
        self.entries.insert(id.into(), entry);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, entry: SqlEntry) -> Option<SqlEntry> {
        self.entries.insert(id.into(), entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl SqlLookup for SqlMapper {
    fn get(&self, id: &str) -> Option<SqlEntry> {
        self.entries.get(id).cloned()
    }

    fn fingerprint(&self) -> Hash256 {
        // BTreeMap serializes in key order, so equal tables hash equally.
        hash::fingerprint(&self.entries).unwrap_or(Hash256([0; 32]))
    }
}
