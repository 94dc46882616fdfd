//! User story records produced per document chunk and consumed by the merge engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::{DomainError, DomainResult};

/// A candidate Agile user story.
///
/// `title`, `user_story` and `acceptance_criteria` are required when a story is
/// deserialized; every other field defaults to empty/zero. Fields this crate does
/// not know about (labels, ids assigned upstream, ...) are carried through in
/// `extra` so that merging never silently drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Story {
    /// Short feature name
    pub title: String,

    /// "As a ..., I want ... so that ..." narrative
    pub user_story: String,

    /// Additional context and business rules
    #[serde(default)]
    pub description: String,

    /// Ordered, testable completion conditions
    pub acceptance_criteria: Vec<String>,

    /// Estimate on a Fibonacci-like scale
    #[serde(default)]
    pub story_points: u32,

    /// Titles of stories that must be completed first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Implementation guidance
    #[serde(default)]
    pub technical_notes: String,

    /// Chunk of the source document that produced this story
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chunk_id: Option<u32>,

    /// Identifier of the generation run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Set on records emitted for a duplicate group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<bool>,

    /// Input indices that contributed to a merged record
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from_indices: Vec<usize>,

    /// Distinct source chunks that contributed to a merged record
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from_chunks: Vec<u32>,

    /// Human-readable explanation of why a group was merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_reason: Option<String>,

    /// Unrecognised fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    /// Create a story with the three required fields set.
    pub fn new(
        title: impl Into<String>,
        user_story: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Self {
        Self {
            title: title.into(),
            user_story: user_story.into(),
            acceptance_criteria,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_story_points(mut self, points: u32) -> Self {
        self.story_points = points;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_technical_notes(mut self, notes: impl Into<String>) -> Self {
        self.technical_notes = notes.into();
        self
    }

    pub fn with_source_chunk(mut self, chunk_id: u32) -> Self {
        self.source_chunk_id = Some(chunk_id);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Whether this record was emitted for a duplicate group.
    pub fn is_merged(&self) -> bool {
        self.merged.unwrap_or(false)
    }

    /// Input indices this record accounts for, given its own input position.
    ///
    /// Unmerged records account only for themselves.
    pub fn provenance(&self, own_index: usize) -> Vec<usize> {
        if self.is_merged() && !self.merged_from_indices.is_empty() {
            self.merged_from_indices.clone()
        } else {
            vec![own_index]
        }
    }

    /// Reject records that lack the content every story must carry.
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::InvalidStory("title is empty".to_string()));
        }
        if self.user_story.trim().is_empty() {
            return Err(DomainError::InvalidStory(format!(
                "story '{}' has an empty user_story",
                self.title
            )));
        }
        Ok(())
    }
}

/// Parse a JSON array of stories, as written by the story generation stage.
pub fn parse_story_list(json: &str) -> DomainResult<Vec<Story>> {
    let stories: Vec<Story> = serde_json::from_str(json)?;
    for story in &stories {
        story.validate()?;
    }
    Ok(stories)
}
