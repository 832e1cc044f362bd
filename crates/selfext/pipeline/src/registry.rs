//! Owned tool registry.
//!
//! Replaces a process-wide map: the registry is a value handed to whatever
//! needs lookups. Registration never shadows an existing tool silently.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Current implementation of one tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub name: String,
    /// Repository-relative source path.
    pub file_path: PathBuf,
    pub content_hash: String,
    /// Commit that last landed this tool, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ToolEntry {
    pub fn new(
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            content_hash: content_hash.into(),
            commit: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new tool. Fails if the name is taken.
    pub fn register(&mut self, entry: ToolEntry) -> PipelineResult<()> {
        if self.tools.contains_key(&entry.name) {
            return Err(PipelineError::ToolAlreadyRegistered(entry.name));
        }
        self.tools.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> PipelineResult<ToolEntry> {
        self.tools
            .remove(name)
            .ok_or_else(|| PipelineError::ToolNotFound(name.to_string()))
    }

    /// Insert or overwrite, returning the previous entry.
    ///
    /// Used after a change has landed: the tool's implementation moved on.
    pub fn replace(&mut self, entry: ToolEntry) -> Option<ToolEntry> {
        self.tools.insert(entry.name.clone(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    /// All tools, ordered by name.
    pub fn list(&self) -> Vec<ToolEntry> {
        self.tools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
