//! `storyweaver report`

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, MergeStrategy};
use crate::services::{render_report, ReportMethod};

use super::load_stories;

#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub original_stories: usize,
    pub merged_stories: usize,
    pub duplicates_removed: usize,
    pub reduction_percent: f64,
    #[serde(skip)]
    report: String,
}

impl ReportOutput {
    pub fn new(original_count: usize, merged_count: usize, config: &Config) -> Self {
        let method = match config.merge.strategy {
            MergeStrategy::Model => ReportMethod::ThreeTier {
                model_id: config.model.model_id.clone(),
            },
            MergeStrategy::Heuristic => ReportMethod::Heuristic {
                title_threshold: config.merge.heuristic_title_threshold,
                criteria_threshold: config.merge.criteria_overlap_threshold,
                fuzzy_title_threshold: config.merge.fuzzy_title_threshold,
            },
        };
        let duplicates_removed = original_count.saturating_sub(merged_count);
        let reduction_percent = if original_count == 0 {
            0.0
        } else {
            duplicates_removed as f64 / original_count as f64 * 100.0
        };
        Self {
            original_stories: original_count,
            merged_stories: merged_count,
            duplicates_removed,
            reduction_percent,
            report: render_report(original_count, merged_count, &method),
        }
    }
}

impl CommandOutput for ReportOutput {
    fn to_human(&self) -> String {
        self.report.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn execute(original: &Path, merged: &Path, config: &Config, json_mode: bool) -> Result<()> {
    let original_count = load_stories(original)?.len();
    let merged_count = load_stories(merged)?.len();
    output(&ReportOutput::new(original_count, merged_count, config), json_mode);
    Ok(())
}
