//! `storyweaver merge`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::adapters::substrates::anthropic_api::API_KEY_ENV;
use crate::adapters::substrates::AnthropicApiSubstrate;
use crate::cli::output::{output_stderr, CommandOutput};
use crate::cli::types::StrategyArg;
use crate::domain::models::{Config, MergeStrategy, Story};
use crate::domain::ports::LlmSubstrate;
use crate::services::{CatalogStats, MergeRunSummary, StoryCatalog, StoryMerger};

use super::load_stories;

#[derive(Debug, Serialize)]
pub struct MergeCommandOutput {
    pub summary: MergeRunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip)]
    report: String,
}

impl CommandOutput for MergeCommandOutput {
    fn to_human(&self) -> String {
        let mut text = self.report.clone();
        if let Some(stats) = &self.catalog {
            text.push_str(&format!(
                "Catalog: {} stories, {} story points, {} unresolved dependencies",
                stats.stories, stats.story_points, stats.unresolved_dependencies
            ));
            if stats.cyclic_stories > 0 {
                text.push_str(&format!(", {} in dependency cycles", stats.cyclic_stories));
            }
            text.push('\n');
        }
        if let Some(path) = &self.output {
            text.push_str(&format!("Merged stories written to {}\n", path.display()));
        }
        text
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Build the merger for `config`, connecting to the model when the strategy needs one.
pub fn build_merger(config: &Config) -> Result<StoryMerger> {
    let substrate: Option<Arc<dyn LlmSubstrate>> = match config.merge.strategy {
        MergeStrategy::Heuristic => None,
        MergeStrategy::Model => {
            let substrate = AnthropicApiSubstrate::new(&config.model, &config.rate_limit, &config.retry)
                .context("Failed to create Anthropic API substrate")?;
            if !substrate.is_configured() {
                anyhow::bail!(
                    "The model strategy needs an API key: set {API_KEY_ENV} or model.api_key, \
                     or run with --strategy heuristic"
                );
            }
            Some(Arc::new(substrate))
        }
    };
    StoryMerger::new(config, substrate).context("Failed to build story merger")
}

pub async fn execute(
    input: &Path,
    output_path: Option<PathBuf>,
    strategy: Option<StrategyArg>,
    catalog: bool,
    config: &Config,
    json_mode: bool,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(strategy) = strategy {
        config.merge.strategy = strategy.into();
    }

    let stories = load_stories(input)?;
    let merger = build_merger(&config)?;
    let outcome = merger.merge_with_summary(&stories).await;

    let (document, catalog_stats) = if catalog {
        let catalog = StoryCatalog::build(&outcome.stories);
        let stats = catalog.stats();
        (serde_json::to_string_pretty(&catalog.entries)?, Some(stats))
    } else {
        (stories_json(&outcome.stories)?, None)
    };

    match &output_path {
        Some(path) => {
            std::fs::write(path, format!("{document}\n"))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), stories = outcome.stories.len(), "Wrote merged stories");
        }
        None => println!("{document}"),
    }

    let result = MergeCommandOutput {
        report: merger.generate_report(stories.len(), outcome.stories.len()),
        summary: outcome.summary,
        catalog: catalog_stats,
        output: output_path,
    };
    output_stderr(&result, json_mode);
    Ok(())
}

fn stories_json(stories: &[Story]) -> Result<String> {
    serde_json::to_string_pretty(stories).context("Failed to serialize merged stories")
}
