//! CLI command implementations.

pub mod candidates;
pub mod merge;
pub mod report;

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::models::{parse_story_list, Story};

/// Read and validate a JSON array of stories.
pub fn load_stories(path: &Path) -> Result<Vec<Story>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_story_list(&raw).with_context(|| format!("Invalid story list in {}", path.display()))
}
