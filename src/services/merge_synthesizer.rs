//! Tier 3: turn a group of duplicate stories into one story.
//!
//! [`HeuristicSynthesizer`] folds the group field by field using the similarity
//! measures. [`ModelSynthesizer`] asks an [`LlmSubstrate`] to write the merged
//! story and then enforces the merge invariants on the answer: points never go
//! below the group maximum, and every member's criteria and dependencies stay
//! represented. Both stamp the result with the group's provenance.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MergeConfig, Story, SynthesisFallback};
use crate::domain::ports::{ExecutionParameters, LlmSubstrate, RequestPurpose, SubstrateRequest};
use crate::services::json_payload::{parse_json_payload, CapabilityFailure, JsonExtractError};
use crate::services::similarity::{normalize_criterion, sequence_ratio};

static TITLE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("valid title word pattern"));

const GENERIC_TITLE_WORDS: &[&str] = &["system", "feature", "implementation", "management"];

const SYNTHESIS_SYSTEM_PROMPT: &str =
    "You are an expert at merging duplicate user stories while preserving all important information.";

/// One multi-member duplicate group, ready for synthesis.
#[derive(Debug, Clone)]
pub struct MergeGroup {
    /// Position of the group among the run's merge groups
    pub ordinal: usize,
    /// Input indices, ascending
    pub indices: Vec<usize>,
    /// Member stories, in index order
    pub stories: Vec<Story>,
    /// Verifier explanations for the confirmed pairs inside the group
    pub reasons: Vec<String>,
}

impl MergeGroup {
    pub fn new(ordinal: usize, indices: Vec<usize>, stories: Vec<Story>, reasons: Vec<String>) -> Self {
        Self {
            ordinal,
            indices,
            stories,
            reasons,
        }
    }

    /// Distinct verifier reasons joined for display.
    pub fn joined_reasons(&self) -> String {
        let mut seen: Vec<&str> = Vec::new();
        for reason in &self.reasons {
            if !seen.contains(&reason.as_str()) {
                seen.push(reason);
            }
        }
        seen.join("; ")
    }

    fn max_story_points(&self) -> u32 {
        self.stories.iter().map(|s| s.story_points).max().unwrap_or(0)
    }

    fn source_chunks(&self) -> Vec<u32> {
        let mut chunks: Vec<u32> = self
            .stories
            .iter()
            .flat_map(|s| s.source_chunk_id.into_iter().chain(s.merged_from_chunks.iter().copied()))
            .collect();
        chunks.sort_unstable();
        chunks.dedup();
        chunks
    }
}

/// A synthesized story and whether the fallback produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub story: Story,
    pub fell_back: bool,
}

/// Tier 3 contract.
#[async_trait]
pub trait MergeSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce exactly one story for the group.
    ///
    /// Capability failures are absorbed by the fallback; only an empty group
    /// is an error.
    async fn synthesize(&self, group: &MergeGroup) -> DomainResult<SynthesisOutcome>;
}

/// Stamp `story` with the provenance of `group`.
pub fn apply_provenance(story: &mut Story, group: &MergeGroup, merge_reason: String) {
    story.merged = Some(true);
    story.merged_from_indices.clone_from(&group.indices);
    story.merged_from_chunks = group.source_chunks();
    story.job_id = group.stories.first().and_then(|s| s.job_id.clone());
    story.source_chunk_id = group.stories.first().and_then(|s| s.source_chunk_id);
    story.merge_reason = Some(merge_reason);
}

/// Whether a title says nothing beyond generic words like "System".
pub fn is_too_generic(title: &str) -> bool {
    let lowered = title.to_lowercase();
    TITLE_WORD
        .find_iter(&lowered)
        .all(|word| GENERIC_TITLE_WORDS.contains(&word.as_str()))
}

/// Join two free-text fields unless one already contains the other.
fn combine_text(existing: &str, new: &str, separator: &str) -> String {
    if existing.is_empty() {
        return new.to_string();
    }
    if new.is_empty() || existing.contains(new) {
        return existing.to_string();
    }
    if new.contains(existing) {
        return new.to_string();
    }
    format!("{existing}{separator}{new}")
}

/// Append `incoming` criteria to `existing`, collapsing near-duplicates.
///
/// A near-duplicate replaces its counterpart when it is the longer text.
pub fn merge_criteria(existing: &[String], incoming: &[String], threshold: f64) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for criterion in incoming {
        let normalized = normalize_criterion(criterion);
        let duplicate = merged
            .iter()
            .position(|kept| sequence_ratio(&normalized, &normalize_criterion(kept)) > threshold);
        match duplicate {
            Some(idx) => {
                if criterion.chars().count() > merged[idx].chars().count() {
                    merged[idx].clone_from(criterion);
                }
            }
            None => merged.push(criterion.clone()),
        }
    }
    merged
}

/// Order-preserving union of dependency references.
fn union_dependencies<'a>(lists: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut union: Vec<String> = Vec::new();
    for dependency in lists.into_iter().flatten() {
        if !union.contains(dependency) {
            union.push(dependency.clone());
        }
    }
    union
}

/// Field-by-field merge needing no model.
#[derive(Debug, Clone)]
pub struct HeuristicSynthesizer {
    criteria_duplicate_threshold: f64,
}

impl Default for HeuristicSynthesizer {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

impl HeuristicSynthesizer {
    pub const fn from_config(config: &MergeConfig) -> Self {
        Self {
            criteria_duplicate_threshold: config.criteria_duplicate_threshold,
        }
    }

    /// Fold `new` into `existing`.
    pub fn merge_pair(&self, existing: &mut Story, new: &Story) {
        if new.title.chars().count() < existing.title.chars().count() && !is_too_generic(&new.title) {
            existing.title.clone_from(&new.title);
        }
        if new.user_story.chars().count() > existing.user_story.chars().count() {
            existing.user_story.clone_from(&new.user_story);
        }
        existing.description = combine_text(
            &existing.description,
            &new.description,
            "\n\nAdditional context: ",
        );
        existing.acceptance_criteria = merge_criteria(
            &existing.acceptance_criteria,
            &new.acceptance_criteria,
            self.criteria_duplicate_threshold,
        );
        existing.story_points = existing.story_points.max(new.story_points);
        existing.dependencies =
            union_dependencies([existing.dependencies.as_slice(), new.dependencies.as_slice()]);
        existing.technical_notes = combine_text(
            &existing.technical_notes,
            &new.technical_notes,
            "\n\nAdditional notes:\n",
        );
        for (key, value) in &new.extra {
            existing
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Fold the whole group in index order and stamp provenance.
    pub fn merge_group(&self, group: &MergeGroup, merge_reason: String) -> DomainResult<Story> {
        let (first, rest) = group.stories.split_first().ok_or(DomainError::EmptyGroup)?;
        let mut merged = first.clone();
        for story in rest {
            self.merge_pair(&mut merged, story);
        }
        apply_provenance(&mut merged, group, merge_reason);
        Ok(merged)
    }
}

#[async_trait]
impl MergeSynthesizer for HeuristicSynthesizer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn synthesize(&self, group: &MergeGroup) -> DomainResult<SynthesisOutcome> {
        let story = self.merge_group(group, group.joined_reasons())?;
        debug!(group = group.ordinal, indices = ?group.indices, title = %story.title, "Merged group heuristically");
        Ok(SynthesisOutcome {
            story,
            fell_back: false,
        })
    }
}

/// Model-backed synthesis with a configurable fallback.
pub struct ModelSynthesizer {
    substrate: Arc<dyn LlmSubstrate>,
    fallback: SynthesisFallback,
    heuristic: HeuristicSynthesizer,
    criteria_duplicate_threshold: f64,
    parameters: ExecutionParameters,
}

impl ModelSynthesizer {
    pub fn new(
        substrate: Arc<dyn LlmSubstrate>,
        config: &MergeConfig,
        parameters: ExecutionParameters,
    ) -> Self {
        Self {
            substrate,
            fallback: config.synthesis_fallback,
            heuristic: HeuristicSynthesizer::from_config(config),
            criteria_duplicate_threshold: config.criteria_duplicate_threshold,
            parameters,
        }
    }

    fn build_prompt(group: &MergeGroup) -> DomainResult<String> {
        let stories_json = serde_json::to_string_pretty(&group.stories)?;
        Ok(format!(
            r#"Merge these duplicate stories into one comprehensive story:

<stories_to_merge>
{stories_json}
</stories_to_merge>

Merge strategy:
- Title: Choose the clearest, most concise title
- User Story: Keep the most detailed version
- Description: Combine both descriptions
- Acceptance Criteria: Union of all criteria (remove exact duplicates)
- Story Points: Take the highest estimate
- Dependencies: Union of all dependencies
- Technical Notes: Combine all notes

Return JSON:
{{
  "title": "...",
  "user_story": "...",
  "description": "...",
  "acceptance_criteria": [...],
  "story_points": 13,
  "dependencies": [...],
  "technical_notes": "..."
}}

Return ONLY the JSON."#
        ))
    }

    async fn request_merge(&self, group: &MergeGroup, prompt: String) -> Result<Story, CapabilityFailure> {
        let request = SubstrateRequest::new(
            RequestPurpose::Synthesis,
            SYNTHESIS_SYSTEM_PROMPT,
            prompt,
            self.parameters,
        );
        debug!(group = group.ordinal, request_id = %request.request_id, "Submitting merge synthesis");

        let response = self.substrate.execute(request).await?;
        let story: Story = parse_json_payload(&response.content)?;
        story
            .validate()
            .map_err(|e| JsonExtractError::Incomplete(e.to_string()))?;
        Ok(story)
    }

    /// Hold the model's story to the merge invariants.
    fn reconcile(&self, mut story: Story, group: &MergeGroup) -> Story {
        story.story_points = story.story_points.max(group.max_story_points());

        let mut criteria = std::mem::take(&mut story.acceptance_criteria);
        for member in &group.stories {
            criteria = merge_criteria(
                &criteria,
                &member.acceptance_criteria,
                self.criteria_duplicate_threshold,
            );
        }
        story.acceptance_criteria = criteria;

        let member_dependencies = group.stories.iter().map(|s| s.dependencies.as_slice());
        story.dependencies = union_dependencies(
            std::iter::once(story.dependencies.as_slice()).chain(member_dependencies),
        );

        for member in &group.stories {
            for (key, value) in &member.extra {
                story.extra.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        apply_provenance(&mut story, group, group.joined_reasons());
        story
    }

    fn fall_back(&self, group: &MergeGroup) -> DomainResult<Story> {
        match self.fallback {
            SynthesisFallback::FirstStory => {
                let mut story = group.stories.first().cloned().ok_or(DomainError::EmptyGroup)?;
                story.story_points = story.story_points.max(group.max_story_points());
                let reason = format!(
                    "Synthesis fallback (kept first story): {}",
                    group.joined_reasons()
                );
                apply_provenance(&mut story, group, reason);
                Ok(story)
            }
            SynthesisFallback::Heuristic => {
                let reason = format!(
                    "Synthesis fallback (heuristic merge): {}",
                    group.joined_reasons()
                );
                self.heuristic.merge_group(group, reason)
            }
        }
    }
}

#[async_trait]
impl MergeSynthesizer for ModelSynthesizer {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn synthesize(&self, group: &MergeGroup) -> DomainResult<SynthesisOutcome> {
        if group.stories.is_empty() {
            return Err(DomainError::EmptyGroup);
        }
        let prompt = Self::build_prompt(group)?;

        match self.request_merge(group, prompt).await {
            Ok(story) => {
                let story = self.reconcile(story, group);
                debug!(group = group.ordinal, indices = ?group.indices, title = %story.title, "Merged group");
                Ok(SynthesisOutcome {
                    story,
                    fell_back: false,
                })
            }
            Err(failure) => {
                warn!(
                    group = group.ordinal,
                    indices = ?group.indices,
                    failure = %failure.kind(),
                    error = %failure,
                    fallback = ?self.fallback,
                    "Merge synthesis failed; applying fallback"
                );
                Ok(SynthesisOutcome {
                    story: self.fall_back(group)?,
                    fell_back: true,
                })
            }
        }
    }
}
