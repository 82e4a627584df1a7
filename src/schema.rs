//! Structural validation of saved pipeline specifications.
//!
//! A document is either an array of projects, each holding pages, or the
//! legacy layout: a bare array of pages. Unknown fields are preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub pages: Vec<Page>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectGroup {
    Projects(Vec<Project>),
    LegacyPages(Vec<Page>),
}

impl ProjectGroup {
    pub fn is_legacy(&self) -> bool {
        matches!(self, ProjectGroup::LegacyPages(_))
    }

    pub fn page_count(&self) -> usize {
        match self {
            ProjectGroup::Projects(projects) => projects.iter().map(|p| p.pages.len()).sum(),
            ProjectGroup::LegacyPages(pages) => pages.len(),
        }
    }
}

/// Parse and validate a document, rejecting it as a whole on any mismatch.
pub fn validate_document(value: Value) -> Result<ProjectGroup, BridgeError> {
    if !value.is_array() {
        return Err(BridgeError::validation(
            "Specification must be an array of projects or pages",
        ));
    }

    let group: ProjectGroup = serde_json::from_value(value).map_err(|_| {
        BridgeError::validation(
            "Specification does not match the project or legacy page layout",
        )
    })?;

    // A malformed project must not pass as a legacy page.
    if matches!(&group, ProjectGroup::LegacyPages(pages)
        if pages.iter().any(|page| page.extra.contains_key("pages")))
    {
        return Err(BridgeError::validation("Project has an invalid pages list"));
    }

    Ok(group)
}

pub fn validate_str(content: &str) -> Result<ProjectGroup, BridgeError> {
    let value: Value = serde_json::from_str(content)?;
    validate_document(value)
}
