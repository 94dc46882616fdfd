//! Tier 1: cheap pairwise scan for stories that might be duplicates.
//!
//! Tuned for recall. False positives are fine; Tier 2 weeds them out.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::models::{CandidatePair, MergeConfig, Story};
use crate::services::similarity::{shared_keywords, title_similarity};

/// A flagged pair together with the signals that flagged it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateMatch {
    pub pair: CandidatePair,
    pub title_similarity: f64,
    pub shared_keywords: BTreeSet<String>,
}

/// Title ratio and shared-keyword thresholds for Tier 1.
#[derive(Debug, Clone, Copy)]
pub struct CandidateFilter {
    title_similarity_threshold: f64,
    keyword_match_threshold: usize,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

impl CandidateFilter {
    pub const fn new(title_similarity_threshold: f64, keyword_match_threshold: usize) -> Self {
        Self {
            title_similarity_threshold,
            keyword_match_threshold,
        }
    }

    pub const fn from_config(config: &MergeConfig) -> Self {
        Self::new(
            config.title_similarity_threshold,
            config.keyword_match_threshold,
        )
    }

    /// Score one pair of stories, returning the match if it is a candidate.
    pub fn evaluate(&self, pair: CandidatePair, a: &Story, b: &Story) -> Option<CandidateMatch> {
        let similarity = title_similarity(&a.title, &b.title);
        let shared = shared_keywords(&a.title, &b.title);

        let flagged = similarity >= self.title_similarity_threshold
            || shared.len() >= self.keyword_match_threshold;

        flagged.then(|| CandidateMatch {
            pair,
            title_similarity: similarity,
            shared_keywords: shared,
        })
    }

    /// Every candidate pair with its signals, ordered by `(i, j)`.
    pub fn scan(&self, stories: &[Story]) -> Vec<CandidateMatch> {
        let mut matches = Vec::new();
        for i in 0..stories.len() {
            for j in (i + 1)..stories.len() {
                let pair = CandidatePair { first: i, second: j };
                if let Some(found) = self.evaluate(pair, &stories[i], &stories[j]) {
                    matches.push(found);
                }
            }
        }
        matches
    }

    /// Candidate pairs only, ordered by `(i, j)`.
    pub fn find_candidates(&self, stories: &[Story]) -> Vec<CandidatePair> {
        self.scan(stories).into_iter().map(|m| m.pair).collect()
    }
}
