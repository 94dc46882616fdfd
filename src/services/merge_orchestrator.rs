//! Merge orchestrator: runs Tier 1 through Tier 3 over one story list.
//!
//! A run moves strictly forward through [`MergeStage`]s. Each tier finishes
//! before the next starts; within Tier 2 and Tier 3, batches and groups may be
//! in flight concurrently and are reassembled by ordinal. Capability failures
//! never escape a run: the caller always gets a complete story list back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CandidatePair, Config, MergeConfig, MergeStrategy, Story};
use crate::domain::ports::{ExecutionParameters, LlmSubstrate};
use crate::services::candidate_filter::CandidateFilter;
use crate::services::grouping::build_groups;
use crate::services::merge_synthesizer::{
    HeuristicSynthesizer, MergeGroup, MergeSynthesizer, ModelSynthesizer, SynthesisOutcome,
};
use crate::services::verifier::{HeuristicVerifier, ModelVerifier, PairVerifier, Verification};

const REPORT_RULE_WIDTH: usize = 70;

/// Progress of one merge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStage {
    Collecting,
    Filtered,
    Verified,
    Grouped,
    Merged,
}

/// Structured record of one run, for logs and `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub strategy: MergeStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub input_stories: usize,
    pub output_stories: usize,
    pub candidate_pairs: usize,
    pub confirmed_pairs: usize,
    pub groups: usize,
    pub merged_groups: usize,
    pub verification_batches: usize,
    pub verification_fallbacks: usize,
    pub synthesis_fallbacks: usize,
    /// Last stage the run reached before returning
    pub final_stage: MergeStage,
    pub elapsed_ms: u64,
}

impl MergeRunSummary {
    fn start(strategy: MergeStrategy, model_id: Option<String>, input_stories: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            strategy,
            model_id,
            input_stories,
            output_stories: input_stories,
            candidate_pairs: 0,
            confirmed_pairs: 0,
            groups: input_stories,
            merged_groups: 0,
            verification_batches: 0,
            verification_fallbacks: 0,
            synthesis_fallbacks: 0,
            final_stage: MergeStage::Collecting,
            elapsed_ms: 0,
        }
    }
}

/// Merged stories plus the run summary.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub stories: Vec<Story>,
    pub summary: MergeRunSummary,
}

/// Composes the three tiers into `merge_stories`.
pub struct StoryMerger {
    config: MergeConfig,
    filter: CandidateFilter,
    verifier: Arc<dyn PairVerifier>,
    synthesizer: Arc<dyn MergeSynthesizer>,
    model_id: Option<String>,
}

impl StoryMerger {
    /// Build the merger the configured strategy calls for.
    ///
    /// The `model` strategy needs a substrate; `heuristic` ignores it.
    pub fn new(config: &Config, substrate: Option<Arc<dyn LlmSubstrate>>) -> DomainResult<Self> {
        match config.merge.strategy {
            MergeStrategy::Heuristic => Ok(Self::heuristic(config.merge.clone())),
            MergeStrategy::Model => {
                let substrate = substrate.ok_or_else(|| {
                    DomainError::StrategyRequiresSubstrate(MergeStrategy::Model.to_string())
                })?;
                let parameters = ExecutionParameters {
                    max_tokens: config.model.max_tokens,
                    temperature: config.model.temperature,
                };
                let model_id = substrate.model_id().to_string();
                Ok(Self::with_components(
                    config.merge.clone(),
                    Arc::new(ModelVerifier::new(substrate.clone(), &config.merge, parameters)),
                    Arc::new(ModelSynthesizer::new(substrate, &config.merge, parameters)),
                    Some(model_id),
                ))
            }
        }
    }

    /// Merger that never calls a model.
    pub fn heuristic(mut config: MergeConfig) -> Self {
        config.strategy = MergeStrategy::Heuristic;
        let verifier = Arc::new(HeuristicVerifier::from_config(&config));
        let synthesizer = Arc::new(HeuristicSynthesizer::from_config(&config));
        Self::with_components(config, verifier, synthesizer, None)
    }

    pub fn with_components(
        config: MergeConfig,
        verifier: Arc<dyn PairVerifier>,
        synthesizer: Arc<dyn MergeSynthesizer>,
        model_id: Option<String>,
    ) -> Self {
        Self {
            filter: CandidateFilter::from_config(&config),
            config,
            verifier,
            synthesizer,
            model_id,
        }
    }

    pub const fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge duplicate stories; never fails on capability errors.
    pub async fn merge_stories(&self, stories: &[Story]) -> Vec<Story> {
        self.merge_with_summary(stories).await.stories
    }

    /// Merge duplicate stories and describe what the run did.
    pub async fn merge_with_summary(&self, stories: &[Story]) -> MergeOutcome {
        let mut summary =
            MergeRunSummary::start(self.config.strategy, self.model_id.clone(), stories.len());
        let span = info_span!("merge_run", run_id = %summary.run_id, stories = stories.len());
        let started = Instant::now();

        let merged = self.run(stories, &mut summary).instrument(span).await;

        summary.output_stories = merged.len();
        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        MergeOutcome {
            stories: merged,
            summary,
        }
    }

    async fn run(&self, stories: &[Story], summary: &mut MergeRunSummary) -> Vec<Story> {
        if stories.len() < 2 {
            summary.final_stage = MergeStage::Merged;
            return stories.to_vec();
        }

        info!(
            strategy = %self.config.strategy,
            verifier = self.verifier.name(),
            synthesizer = self.synthesizer.name(),
            "Starting merge run"
        );

        let candidates = self.filter.find_candidates(stories);
        summary.candidate_pairs = candidates.len();
        summary.final_stage = MergeStage::Filtered;
        info!(candidates = candidates.len(), "Tier 1 identified candidate pairs");
        if candidates.is_empty() {
            info!("No duplicate candidates found; skipping verification");
            return stories.to_vec();
        }

        let verification = match self.verifier.verify(stories, &candidates).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Verification rejected its input; returning stories unmerged");
                return stories.to_vec();
            }
        };
        summary.confirmed_pairs = verification.confirmed.len();
        summary.verification_batches = verification.batches;
        summary.verification_fallbacks = verification.fallback_batches;
        summary.final_stage = MergeStage::Verified;
        info!(confirmed = verification.confirmed.len(), "Tier 2 confirmed duplicate pairs");
        if verification.confirmed.is_empty() {
            info!("No duplicates confirmed; returning stories unmerged");
            return stories.to_vec();
        }

        let pairs: Vec<CandidatePair> = verification.pairs().collect();
        let groups = match build_groups(&pairs, stories.len()) {
            Ok(groups) => groups,
            Err(e) => {
                error!(error = %e, "Grouping failed; returning stories unmerged");
                return stories.to_vec();
            }
        };
        summary.groups = groups.len();
        summary.final_stage = MergeStage::Grouped;

        let merge_groups = Self::merge_groups(stories, &groups, &verification);
        summary.merged_groups = merge_groups.len();
        info!(
            groups = groups.len(),
            merge_groups = merge_groups.len(),
            "Grouped confirmed pairs"
        );

        let mut synthesized = self.synthesize_all(merge_groups).await;
        summary.synthesis_fallbacks = synthesized
            .values()
            .filter(|outcome| matches!(outcome, Ok(o) if o.fell_back))
            .count();

        let mut merged = Vec::with_capacity(groups.len());
        let mut ordinal = 0;
        for group in &groups {
            if let [only] = group.as_slice() {
                merged.push(stories[*only].clone());
                continue;
            }
            match synthesized.remove(&ordinal) {
                Some(Ok(outcome)) => merged.push(outcome.story),
                Some(Err(e)) => {
                    error!(group = ordinal, error = %e, "Synthesis rejected its group; keeping members unmerged");
                    merged.extend(group.iter().map(|&i| stories[i].clone()));
                }
                None => {
                    error!(group = ordinal, "Synthesis produced no result; keeping members unmerged");
                    merged.extend(group.iter().map(|&i| stories[i].clone()));
                }
            }
            ordinal += 1;
        }
        summary.final_stage = MergeStage::Merged;

        info!(
            input = stories.len(),
            output = merged.len(),
            removed = stories.len().saturating_sub(merged.len()),
            synthesis_fallbacks = summary.synthesis_fallbacks,
            "Tier 3 merged duplicate groups"
        );
        merged
    }

    /// Multi-member groups with their members and the reasons that joined them.
    fn merge_groups(
        stories: &[Story],
        groups: &[Vec<usize>],
        verification: &Verification,
    ) -> Vec<MergeGroup> {
        let mut ordinal_of: HashMap<usize, usize> = HashMap::new();
        let mut merge_groups: Vec<MergeGroup> = Vec::new();

        for group in groups.iter().filter(|g| g.len() > 1) {
            let ordinal = merge_groups.len();
            for &index in group {
                ordinal_of.insert(index, ordinal);
            }
            merge_groups.push(MergeGroup::new(
                ordinal,
                group.clone(),
                group.iter().map(|&i| stories[i].clone()).collect(),
                Vec::new(),
            ));
        }

        for confirmed in &verification.confirmed {
            if let Some(&ordinal) = ordinal_of.get(&confirmed.pair.first) {
                merge_groups[ordinal].reasons.push(confirmed.reason.clone());
            }
        }

        merge_groups
    }

    async fn synthesize_all(
        &self,
        groups: Vec<MergeGroup>,
    ) -> HashMap<usize, DomainResult<SynthesisOutcome>> {
        let concurrency = self.config.max_concurrent_requests.max(1);
        stream::iter(groups)
            .map(|group| async move {
                let outcome = self.synthesizer.synthesize(&group).await;
                if let Ok(o) = &outcome {
                    debug!(
                        group = group.ordinal,
                        indices = ?group.indices,
                        title = %o.story.title,
                        fell_back = o.fell_back,
                        "Synthesized group"
                    );
                }
                (group.ordinal, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Human-readable summary of a run's effect.
    pub fn generate_report(&self, original_count: usize, merged_count: usize) -> String {
        let method = match self.config.strategy {
            MergeStrategy::Model => ReportMethod::ThreeTier {
                model_id: self.model_id.clone().unwrap_or_else(|| "unknown".to_string()),
            },
            MergeStrategy::Heuristic => ReportMethod::Heuristic {
                title_threshold: self.config.heuristic_title_threshold,
                criteria_threshold: self.config.criteria_overlap_threshold,
                fuzzy_title_threshold: self.config.fuzzy_title_threshold,
            },
        };
        render_report(original_count, merged_count, &method)
    }
}

/// How the reported merge was performed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportMethod {
    ThreeTier {
        model_id: String,
    },
    Heuristic {
        title_threshold: f64,
        criteria_threshold: f64,
        fuzzy_title_threshold: f64,
    },
}

/// Render the merge report. Deterministic; no model involved.
pub fn render_report(original_count: usize, merged_count: usize, method: &ReportMethod) -> String {
    let rule = "=".repeat(REPORT_RULE_WIDTH);
    let removed = original_count.saturating_sub(merged_count);
    let reduction = if original_count > 0 {
        removed as f64 / original_count as f64 * 100.0
    } else {
        0.0
    };
    let title = match method {
        ReportMethod::ThreeTier { .. } => "Scalable Story Merge Report",
        ReportMethod::Heuristic { .. } => "Story Merge Report",
    };

    let mut report = String::new();
    report.push_str(&format!("\n{rule}\n{title}\n{rule}\n\n"));
    report.push_str(&format!("Original Stories:     {original_count}\n"));
    report.push_str(&format!("After Merge:          {merged_count}\n"));
    report.push_str(&format!("Duplicates Removed:   {removed}\n"));
    report.push_str(&format!("Reduction:            {reduction:.1}%\n\n"));

    match method {
        ReportMethod::ThreeTier { model_id } => {
            report.push_str("Method:               Three-tier scalable approach\n");
            report.push_str(&format!("Model:                {model_id}\n"));
            report.push_str("Tier 1:               Fast pre-filtering (title + keywords)\n");
            report.push_str("Tier 2:               LLM verification (lightweight)\n");
            report.push_str("Tier 3:               LLM intelligent merge (comprehensive)\n");
        }
        ReportMethod::Heuristic {
            title_threshold,
            criteria_threshold,
            fuzzy_title_threshold,
        } => {
            report.push_str("Method:               Heuristic similarity merge\n");
            report.push_str("Configuration:\n");
            report.push_str(&format!(
                "- Title similarity threshold:     {:.0}%\n",
                title_threshold * 100.0
            ));
            report.push_str(&format!(
                "- Criteria overlap threshold:     {:.0}%\n",
                criteria_threshold * 100.0
            ));
            report.push_str(&format!(
                "- Fuzzy title threshold:          {:.0}%\n",
                fuzzy_title_threshold * 100.0
            ));
        }
    }

    report.push_str(&format!("\n{rule}\n"));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::substrates::scripted::{ScriptedReply, ScriptedSubstrate};

    fn story(title: &str, criteria: &[&str]) -> Story {
        Story::new(
            title,
            format!("As a user, I want {title}"),
            criteria.iter().map(|c| (*c).to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_degenerate_inputs() {
        let merger = StoryMerger::heuristic(MergeConfig::default());
        assert!(merger.merge_stories(&[]).await.is_empty());

        let single = vec![story("Only Story", &["One"]).with_story_points(3)];
        assert_eq!(merger.merge_stories(&single).await, single);
    }

    #[tokio::test]
    async fn test_model_strategy_requires_substrate() {
        let config = Config::default();
        assert!(matches!(
            StoryMerger::new(&config, None),
            Err(DomainError::StrategyRequiresSubstrate(_))
        ));
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        let merger = StoryMerger::new(&Config::default(), Some(substrate.clone())).unwrap();
        let stories = vec![story("Email Registration", &[]), story("Email Verification", &[])];

        let outcome = merger.merge_with_summary(&stories).await;
        assert_eq!(outcome.stories, stories);
        assert_eq!(outcome.summary.final_stage, MergeStage::Filtered);
        assert_eq!(substrate.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_heuristic_run_summary() {
        let stories = vec![
            story("Export Reports", &["Export to CSV"]),
            story("Dashboard Widgets", &["Drag widgets"]),
            story("Export Report", &["Export to CSV", "Export to PDF"]),
        ];
        let merger = StoryMerger::heuristic(MergeConfig::default());

        let outcome = merger.merge_with_summary(&stories).await;
        assert_eq!(outcome.stories.len(), 2);
        assert_eq!(outcome.stories[0].merged_from_indices, vec![0, 2]);
        assert_eq!(outcome.stories[1], stories[1]);
        assert_eq!(outcome.summary.candidate_pairs, 1);
        assert_eq!(outcome.summary.confirmed_pairs, 1);
        assert_eq!(outcome.summary.merged_groups, 1);
        assert_eq!(outcome.summary.final_stage, MergeStage::Merged);
        assert_eq!(outcome.summary.output_stories, 2);
    }

    #[test]
    fn test_report_three_tier() {
        let report = render_report(
            10,
            7,
            &ReportMethod::ThreeTier {
                model_id: "claude-test".to_string(),
            },
        );
        assert!(report.contains("Scalable Story Merge Report"));
        assert!(report.contains("Original Stories:     10"));
        assert!(report.contains("After Merge:          7"));
        assert!(report.contains("Duplicates Removed:   3"));
        assert!(report.contains("Reduction:            30.0%"));
        assert!(report.contains("Model:                claude-test"));
        assert!(report.contains(&"=".repeat(70)));
    }

    #[test]
    fn test_report_heuristic_layout() {
        let report = render_report(
            4,
            3,
            &ReportMethod::Heuristic {
                title_threshold: 0.85,
                criteria_threshold: 0.5,
                fuzzy_title_threshold: 0.7,
            },
        );
        let rule = "=".repeat(70);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(
            lines,
            vec![
                "",
                rule.as_str(),
                "Story Merge Report",
                rule.as_str(),
                "",
                "Original Stories:     4",
                "After Merge:          3",
                "Duplicates Removed:   1",
                "Reduction:            25.0%",
                "",
                "Method:               Heuristic similarity merge",
                "Configuration:",
                "- Title similarity threshold:     85%",
                "- Criteria overlap threshold:     50%",
                "- Fuzzy title threshold:          70%",
                "",
                rule.as_str(),
            ]
        );
        assert!(report.ends_with('\n'));
    }

    #[test]
    fn test_report_empty_input() {
        let merger = StoryMerger::heuristic(MergeConfig::default());
        let report = merger.generate_report(0, 0);
        assert!(report.contains("Reduction:            0.0%"));
        assert!(report.contains("Heuristic similarity merge"));
        assert!(report.contains("- Title similarity threshold:     85%"));
    }

    #[test]
    fn test_report_is_deterministic() {
        let merger = StoryMerger::heuristic(MergeConfig::default());
        assert_eq!(merger.generate_report(3, 2), merger.generate_report(3, 2));
        assert!(merger.generate_report(3, 2).contains("Reduction:            33.3%"));
    }

    #[tokio::test]
    async fn test_model_report_names_model() {
        let substrate = Arc::new(ScriptedSubstrate::new().with_model_id("claude-x"));
        let merger = StoryMerger::new(&Config::default(), Some(substrate)).unwrap();
        assert!(merger.generate_report(2, 1).contains("Model:                claude-x"));
    }

    #[tokio::test]
    async fn test_scripted_reply_drives_model_strategy() {
        let substrate = Arc::new(
            ScriptedSubstrate::new()
                .respond_to(
                    crate::domain::ports::RequestPurpose::Verification,
                    "0-1",
                    ScriptedReply::text(
                        r#"{"confirmed_duplicates": [{"pair_id": "0-1", "is_duplicate": true, "reason": "same export"}]}"#,
                    ),
                )
                .respond_to(
                    crate::domain::ports::RequestPurpose::Synthesis,
                    "Export",
                    ScriptedReply::text(
                        r#"{"title": "Export Reports", "user_story": "As a user, I want exports", "acceptance_criteria": ["Export to CSV"]}"#,
                    ),
                ),
        );
        let merger = StoryMerger::new(&Config::default(), Some(substrate)).unwrap();
        let stories = vec![story("Export Reports", &["Export to CSV"]), story("Export Report", &[])];

        let outcome = merger.merge_with_summary(&stories).await;
        assert_eq!(outcome.stories.len(), 1);
        assert_eq!(outcome.stories[0].merge_reason.as_deref(), Some("same export"));
        assert_eq!(outcome.summary.synthesis_fallbacks, 0);
        assert_eq!(outcome.summary.model_id.as_deref(), Some("scripted-model"));
    }
}
