//! `storyweaver candidates`

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::cli::display::{list_table, render_list};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::{Config, Story};
use crate::services::{CandidateFilter, CandidateMatch};

use super::load_stories;

#[derive(Debug, Serialize)]
pub struct CandidateRow {
    pub pair_id: String,
    pub first_title: String,
    pub second_title: String,
    pub title_similarity: f64,
    pub shared_keywords: Vec<String>,
}

impl CandidateRow {
    fn new(found: &CandidateMatch, stories: &[Story]) -> Self {
        Self {
            pair_id: found.pair.pair_id(),
            first_title: stories[found.pair.first].title.clone(),
            second_title: stories[found.pair.second].title.clone(),
            title_similarity: found.title_similarity,
            shared_keywords: found.shared_keywords.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CandidateListOutput {
    pub stories: usize,
    pub candidates: Vec<CandidateRow>,
    pub total: usize,
}

impl CommandOutput for CandidateListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["pair", "first", "second", "similarity", "shared keywords"]);
        for row in &self.candidates {
            table.add_row(vec![
                row.pair_id.clone(),
                truncate(&row.first_title, 36),
                truncate(&row.second_title, 36),
                format!("{:.0}%", row.title_similarity * 100.0),
                row.shared_keywords.join(", "),
            ]);
        }
        render_list("candidate pair", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Tier 1 pairs for `stories`, as the command reports them.
pub fn list_candidates(stories: &[Story], config: &Config) -> CandidateListOutput {
    let candidates: Vec<CandidateRow> = CandidateFilter::from_config(&config.merge)
        .scan(stories)
        .iter()
        .map(|found| CandidateRow::new(found, stories))
        .collect();
    CandidateListOutput {
        stories: stories.len(),
        total: candidates.len(),
        candidates,
    }
}

pub fn execute(input: &Path, config: &Config, json_mode: bool) -> Result<()> {
    let stories = load_stories(input)?;
    output(&list_candidates(&stories, config), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(title: &str) -> Story {
        Story::new(title, format!("As a user, I want {title}"), vec!["Works".to_string()])
    }

    #[test]
    fn test_list_candidates() {
        let stories = vec![
            story("Audit Logging System"),
            story("Password Reset"),
            story("Comprehensive Audit Logging System"),
        ];
        let listed = list_candidates(&stories, &Config::default());
        assert_eq!(listed.total, 1);
        let row = &listed.candidates[0];
        assert_eq!(row.pair_id, "0-2");
        assert_eq!(row.shared_keywords, vec!["audit", "logging"]);

        let human = listed.to_human();
        assert!(human.starts_with("1 candidate pair:"));
        assert!(human.contains("audit, logging"));
    }

    #[test]
    fn test_no_candidates() {
        let listed = list_candidates(&[story("Password Reset")], &Config::default());
        assert_eq!(listed.to_human(), "No candidate pairs found.");
        assert_eq!(listed.to_json()["total"], 0);
    }
}
