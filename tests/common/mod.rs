//! Common test utilities for integration tests
//!
//! Story fixtures, scripted model answers and logging setup shared by the
//! integration test files.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use storyweaver::domain::models::{Config, MergeStrategy, Story};
use storyweaver::domain::ports::LlmSubstrate;
use storyweaver::services::StoryMerger;
use storyweaver::ScriptedSubstrate;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn story(title: &str, criteria: &[&str], points: u32) -> Story {
    Story::new(
        title,
        format!("As a user, I want {}", title.to_lowercase()),
        criteria.iter().map(|c| (*c).to_string()).collect(),
    )
    .with_story_points(points)
}

/// Scenario A stories plus one unrelated story at index 2.
pub fn audit_stories() -> Vec<Story> {
    vec![
        story(
            "Audit Logging System",
            &["Log all user data access", "Retain logs for 7 years"],
            5,
        )
        .with_source_chunk(0)
        .with_job_id("job-42"),
        story(
            "Comprehensive Audit Logging System",
            &["Log all user data access (read/write)", "Provide audit log export"],
            8,
        )
        .with_source_chunk(3)
        .with_job_id("job-42"),
        story("Password Reset", &["Email a reset link"], 2).with_source_chunk(1),
    ]
}

/// Three stories whose titles all pass Tier 1.
pub fn profile_photo_stories() -> Vec<Story> {
    vec![
        story("Profile Photo Upload", &["Accept JPEG and PNG"], 3),
        story("Profile Photo Cropping", &["Crop to a square"], 2),
        story("Profile Photo Cropping Tool", &["Preview the crop"], 5),
    ]
}

pub fn verification_answer(verdicts: &[(&str, bool, &str)]) -> String {
    let verdicts: Vec<serde_json::Value> = verdicts
        .iter()
        .map(|(pair_id, is_duplicate, reason)| {
            serde_json::json!({"pair_id": pair_id, "is_duplicate": is_duplicate, "reason": reason})
        })
        .collect();
    format!(
        "```json\n{}\n```",
        serde_json::json!({ "confirmed_duplicates": verdicts })
    )
}

pub fn synthesized_story(title: &str, criteria: &[&str], points: u32) -> String {
    serde_json::json!({
        "title": title,
        "user_story": format!("As a user, I want {}", title.to_lowercase()),
        "description": "Merged by the model",
        "acceptance_criteria": criteria,
        "story_points": points,
        "dependencies": [],
        "technical_notes": ""
    })
    .to_string()
}

pub fn model_config() -> Config {
    let mut config = Config::default();
    config.merge.strategy = MergeStrategy::Model;
    config
}

pub fn model_merger(config: &Config, scripted: &Arc<ScriptedSubstrate>) -> StoryMerger {
    let substrate: Arc<dyn LlmSubstrate> = scripted.clone();
    StoryMerger::new(config, Some(substrate)).expect("model strategy with a substrate")
}

/// Input indices the output accounts for, sorted, duplicates kept.
///
/// Output follows group order (smallest member first), so an unmerged record
/// stands for the smallest index not yet accounted for.
pub fn covered_indices(merged: &[Story], input_len: usize) -> Vec<usize> {
    let mut uncovered: BTreeSet<usize> = (0..input_len).collect();
    let mut covered = Vec::with_capacity(input_len);
    for story in merged {
        if story.is_merged() {
            for &index in &story.merged_from_indices {
                uncovered.remove(&index);
                covered.push(index);
            }
        } else if let Some(index) = uncovered.pop_first() {
            covered.push(index);
        }
    }
    covered.sort_unstable();
    covered
}
