//! Tier 2: decide which candidate pairs are true duplicates.
//!
//! Two implementations share the [`PairVerifier`] contract:
//!
//! - [`ModelVerifier`] sends batches of lightweight pair digests to an
//!   [`LlmSubstrate`] and applies a configured fallback to any batch whose call
//!   fails or whose answer cannot be parsed.
//! - [`HeuristicVerifier`] applies title and acceptance-criteria rules locally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{CandidatePair, MergeConfig, Story, VerificationFallback};
use crate::domain::ports::{ExecutionParameters, LlmSubstrate, RequestPurpose, SubstrateRequest};
use crate::services::json_payload::{parse_json_payload, CapabilityFailure};
use crate::services::similarity::{shared_core_concepts, story_criteria_overlap, title_similarity};

const VERIFICATION_SYSTEM_PROMPT: &str = "You are an expert at identifying duplicate user stories. \
Be conservative - only mark as duplicates if they clearly describe the same feature.";

/// Reason recorded for pairs confirmed by the failure fallback.
pub const FALLBACK_CONFIRM_REASON: &str = "Verification unavailable; confirmed by fallback";

/// A pair Tier 2 accepted, with the verifier's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmedPair {
    pub pair: CandidatePair,
    pub reason: String,
}

/// Outcome of Tier 2 for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// Confirmed pairs in candidate order
    pub confirmed: Vec<ConfirmedPair>,
    /// Model requests issued
    pub batches: usize,
    /// Batches resolved by the fallback policy
    pub fallback_batches: usize,
}

impl Verification {
    pub fn pairs(&self) -> impl Iterator<Item = CandidatePair> + '_ {
        self.confirmed.iter().map(|c| c.pair)
    }
}

/// Tier 2 contract.
#[async_trait]
pub trait PairVerifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the subset of `candidates` confirmed as duplicates.
    ///
    /// Fails only when a candidate addresses a story outside `stories`.
    async fn verify(
        &self,
        stories: &[Story],
        candidates: &[CandidatePair],
    ) -> DomainResult<Verification>;
}

fn check_bounds(stories: &[Story], candidates: &[CandidatePair]) -> DomainResult<()> {
    candidates
        .iter()
        .try_for_each(|pair| pair.check_bounds(stories.len()))
}

/// Lightweight projection of a story sent to the verifier.
#[derive(Debug, Serialize)]
struct StoryDigest<'a> {
    index: usize,
    title: &'a str,
    user_story: String,
}

#[derive(Debug, Serialize)]
struct PairPayload<'a> {
    pair_id: String,
    story1: StoryDigest<'a>,
    story2: StoryDigest<'a>,
}

#[derive(Debug, Deserialize)]
struct VerificationAnswer {
    #[serde(default)]
    confirmed_duplicates: Vec<PairVerdict>,
}

#[derive(Debug, Deserialize)]
struct PairVerdict {
    pair_id: String,
    #[serde(default)]
    is_duplicate: bool,
    #[serde(default)]
    reason: String,
}

/// Model-backed verifier.
pub struct ModelVerifier {
    substrate: Arc<dyn LlmSubstrate>,
    batch_size: usize,
    excerpt_chars: usize,
    fallback: VerificationFallback,
    max_concurrent_requests: usize,
    parameters: ExecutionParameters,
}

impl ModelVerifier {
    pub fn new(
        substrate: Arc<dyn LlmSubstrate>,
        config: &MergeConfig,
        parameters: ExecutionParameters,
    ) -> Self {
        Self {
            substrate,
            batch_size: config.verification_batch_size.max(1),
            excerpt_chars: config.narrative_excerpt_chars,
            fallback: config.verification_fallback,
            max_concurrent_requests: config.max_concurrent_requests.max(1),
            parameters,
        }
    }

    fn digest<'a>(&self, stories: &'a [Story], index: usize) -> StoryDigest<'a> {
        let story = &stories[index];
        StoryDigest {
            index,
            title: &story.title,
            user_story: story.user_story.chars().take(self.excerpt_chars).collect(),
        }
    }

    fn build_prompt(&self, stories: &[Story], batch: &[CandidatePair]) -> DomainResult<String> {
        let payload: Vec<PairPayload<'_>> = batch
            .iter()
            .map(|pair| PairPayload {
                pair_id: pair.pair_id(),
                story1: self.digest(stories, pair.first),
                story2: self.digest(stories, pair.second),
            })
            .collect();
        let pairs_json = serde_json::to_string_pretty(&payload)?;

        Ok(format!(
            r#"Analyze these candidate duplicate pairs and determine which are TRUE duplicates:

<candidate_pairs>
{pairs_json}
</candidate_pairs>

For each pair, return true/false indicating if they describe the SAME feature (even if worded differently).

Examples:
- "Audit Logging System" + "Comprehensive Audit Logging System" -> TRUE (same feature)
- "Email Registration" + "Email Verification" -> FALSE (different features)
- "Google OAuth" + "Facebook Login" -> FALSE (different providers)

Return JSON:
{{
  "confirmed_duplicates": [
    {{"pair_id": "12-19", "is_duplicate": true, "reason": "Both describe audit logging"}},
    {{"pair_id": "5-8", "is_duplicate": false, "reason": "Different aspects of profile"}}
  ]
}}

Return ONLY the JSON, no markdown."#
        ))
    }

    /// Ask the model about one batch.
    async fn verify_batch(
        &self,
        ordinal: usize,
        prompt: String,
        batch: &[CandidatePair],
    ) -> Result<Vec<ConfirmedPair>, CapabilityFailure> {
        let request = SubstrateRequest::new(
            RequestPurpose::Verification,
            VERIFICATION_SYSTEM_PROMPT,
            prompt,
            self.parameters,
        );
        debug!(
            batch = ordinal,
            pairs = batch.len(),
            request_id = %request.request_id,
            "Submitting verification batch"
        );

        let response = self.substrate.execute(request).await?;
        let answer: VerificationAnswer = parse_json_payload(&response.content)?;

        let submitted: HashSet<CandidatePair> = batch.iter().copied().collect();
        let mut verdicts: HashMap<CandidatePair, String> = HashMap::new();
        for verdict in answer.confirmed_duplicates {
            let pair = match verdict.pair_id.parse::<CandidatePair>() {
                Ok(pair) if submitted.contains(&pair) => pair,
                Ok(_) => {
                    warn!(batch = ordinal, pair_id = %verdict.pair_id, "Ignoring verdict for pair not in batch");
                    continue;
                }
                Err(e) => {
                    warn!(batch = ordinal, error = %e, "Ignoring malformed pair id");
                    continue;
                }
            };
            if verdict.is_duplicate {
                verdicts.entry(pair).or_insert(verdict.reason);
            }
        }

        Ok(batch
            .iter()
            .filter_map(|pair| {
                verdicts.remove(pair).map(|reason| ConfirmedPair {
                    pair: *pair,
                    reason: if reason.trim().is_empty() {
                        "Confirmed duplicate".to_string()
                    } else {
                        reason
                    },
                })
            })
            .collect())
    }

    fn apply_fallback(&self, batch: &[CandidatePair]) -> Vec<ConfirmedPair> {
        match self.fallback {
            VerificationFallback::ConfirmAll => batch
                .iter()
                .map(|pair| ConfirmedPair {
                    pair: *pair,
                    reason: FALLBACK_CONFIRM_REASON.to_string(),
                })
                .collect(),
            VerificationFallback::RejectAll => Vec::new(),
        }
    }
}

#[async_trait]
impl PairVerifier for ModelVerifier {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn verify(
        &self,
        stories: &[Story],
        candidates: &[CandidatePair],
    ) -> DomainResult<Verification> {
        check_bounds(stories, candidates)?;
        if candidates.is_empty() {
            return Ok(Verification::default());
        }

        // Stream items own their batch
        let mut requests: Vec<(usize, Vec<CandidatePair>, String)> = Vec::new();
        for (ordinal, batch) in candidates.chunks(self.batch_size).enumerate() {
            requests.push((ordinal, batch.to_vec(), self.build_prompt(stories, batch)?));
        }
        let batch_count = requests.len();

        let mut outcomes: Vec<_> = stream::iter(requests)
            .map(|(ordinal, batch, prompt)| async move {
                let outcome = self.verify_batch(ordinal, prompt, &batch).await;
                (ordinal, batch, outcome)
            })
            .buffer_unordered(self.max_concurrent_requests)
            .collect()
            .await;
        outcomes.sort_by_key(|(ordinal, _, _)| *ordinal);

        let mut verification = Verification {
            batches: batch_count,
            ..Verification::default()
        };
        for (ordinal, batch, outcome) in outcomes {
            match outcome {
                Ok(confirmed) => {
                    for c in &confirmed {
                        debug!(pair_id = %c.pair, reason = %c.reason, "Confirmed duplicate");
                    }
                    verification.confirmed.extend(confirmed);
                }
                Err(failure) => {
                    warn!(
                        batch = ordinal,
                        pairs = batch.len(),
                        failure = %failure.kind(),
                        error = %failure,
                        fallback = ?self.fallback,
                        "Verification batch failed; applying fallback"
                    );
                    verification.fallback_batches += 1;
                    verification.confirmed.extend(self.apply_fallback(&batch));
                }
            }
        }

        info!(
            candidates = candidates.len(),
            confirmed = verification.confirmed.len(),
            batches = verification.batches,
            fallback_batches = verification.fallback_batches,
            "Tier 2 verification complete"
        );
        Ok(verification)
    }
}

/// Rule-based verifier; needs no model.
#[derive(Debug, Clone)]
pub struct HeuristicVerifier {
    heuristic_title_threshold: f64,
    fuzzy_title_threshold: f64,
    criteria_overlap_threshold: f64,
    concept_overlap_threshold: f64,
    keyword_match_threshold: usize,
}

impl Default for HeuristicVerifier {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

fn percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

impl HeuristicVerifier {
    pub const fn from_config(config: &MergeConfig) -> Self {
        Self {
            heuristic_title_threshold: config.heuristic_title_threshold,
            fuzzy_title_threshold: config.fuzzy_title_threshold,
            criteria_overlap_threshold: config.criteria_overlap_threshold,
            concept_overlap_threshold: config.concept_overlap_threshold,
            keyword_match_threshold: config.keyword_match_threshold,
        }
    }

    /// Judge one pair; `Some(reason)` when the stories are duplicates.
    pub fn judge(&self, a: &Story, b: &Story) -> Option<String> {
        let title = title_similarity(&a.title, &b.title);
        let same_concept =
            shared_core_concepts(&a.title, &b.title).len() >= self.keyword_match_threshold;
        let overlap = story_criteria_overlap(a, b);

        let duplicate = title >= self.heuristic_title_threshold
            || (title >= self.fuzzy_title_threshold && overlap >= self.criteria_overlap_threshold)
            || (same_concept && overlap >= self.concept_overlap_threshold);
        if !duplicate {
            return None;
        }

        Some(if title >= self.heuristic_title_threshold {
            format!("High title similarity ({})", percent(title))
        } else if same_concept {
            format!("Same core concept + criteria overlap ({})", percent(overlap))
        } else {
            format!(
                "Title similarity ({}) + criteria overlap ({})",
                percent(title),
                percent(overlap)
            )
        })
    }
}

#[async_trait]
impl PairVerifier for HeuristicVerifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn verify(
        &self,
        stories: &[Story],
        candidates: &[CandidatePair],
    ) -> DomainResult<Verification> {
        check_bounds(stories, candidates)?;

        let confirmed: Vec<ConfirmedPair> = candidates
            .iter()
            .filter_map(|pair| {
                self.judge(&stories[pair.first], &stories[pair.second])
                    .map(|reason| ConfirmedPair {
                        pair: *pair,
                        reason,
                    })
            })
            .collect();
        for c in &confirmed {
            debug!(pair_id = %c.pair, reason = %c.reason, "Confirmed duplicate");
        }

        info!(
            candidates = candidates.len(),
            confirmed = confirmed.len(),
            "Tier 2 heuristic verification complete"
        );
        Ok(Verification {
            confirmed,
            batches: 0,
            fallback_batches: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::substrates::scripted::{ScriptedReply, ScriptedSubstrate};
    use crate::domain::errors::DomainError;
    use crate::domain::ports::SubstrateError;

    fn story(title: &str, criteria: &[&str]) -> Story {
        Story::new(
            title,
            format!("As an operator, I want {title} so that things work"),
            criteria.iter().map(|c| (*c).to_string()).collect(),
        )
    }

    fn pair(a: usize, b: usize) -> CandidatePair {
        CandidatePair::new(a, b).unwrap()
    }

    fn verifier(substrate: Arc<ScriptedSubstrate>, config: &MergeConfig) -> ModelVerifier {
        ModelVerifier::new(substrate, config, ExecutionParameters::default())
    }

    fn four_stories() -> Vec<Story> {
        vec![
            story("Audit Logging", &[]),
            story("Audit Logging System", &[]),
            story("Data Export", &[]),
            story("Data Exports", &[]),
        ]
    }

    #[tokio::test]
    async fn test_confirms_only_positive_verdicts() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        substrate
            .push_reply(ScriptedReply::text(
                r#"```json
{"confirmed_duplicates": [
  {"pair_id": "0-1", "is_duplicate": true, "reason": "Both describe audit logging"},
  {"pair_id": "2-3", "is_duplicate": false, "reason": "Different"}
]}
```"#,
            ))
            .await;

        let result = verifier(substrate.clone(), &MergeConfig::default())
            .verify(&four_stories(), &[pair(0, 1), pair(2, 3)])
            .await
            .unwrap();

        assert_eq!(
            result.confirmed,
            vec![ConfirmedPair {
                pair: pair(0, 1),
                reason: "Both describe audit logging".to_string()
            }]
        );
        assert_eq!(result.batches, 1);
        assert_eq!(result.fallback_batches, 0);
    }

    #[tokio::test]
    async fn test_payload_is_lightweight() {
        let mut stories = four_stories();
        stories[0].user_story = "x".repeat(500);
        stories[0].description = "SECRET DESCRIPTION".to_string();

        let substrate = Arc::new(ScriptedSubstrate::new());
        substrate
            .push_reply(ScriptedReply::text(r#"{"confirmed_duplicates": []}"#))
            .await;
        verifier(substrate.clone(), &MergeConfig::default())
            .verify(&stories, &[pair(0, 1)])
            .await
            .unwrap();

        let requests = substrate.requests().await;
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].prompt;
        assert!(prompt.contains(&"x".repeat(200)));
        assert!(!prompt.contains(&"x".repeat(201)));
        assert!(!prompt.contains("SECRET DESCRIPTION"));
        assert!(prompt.contains("\"pair_id\": \"0-1\""));
    }

    #[tokio::test]
    async fn test_batches_respect_size_cap() {
        let stories: Vec<Story> = (0..8).map(|i| story(&format!("Story {i}"), &[])).collect();
        let candidates: Vec<CandidatePair> = (1..8).map(|j| pair(0, j)).collect();
        let config = MergeConfig {
            verification_batch_size: 3,
            ..MergeConfig::default()
        };
        let substrate = Arc::new(
            ScriptedSubstrate::new()
                .with_default_reply(ScriptedReply::text(r#"{"confirmed_duplicates": []}"#)),
        );

        let result = verifier(substrate.clone(), &config)
            .verify(&stories, &candidates)
            .await
            .unwrap();

        assert_eq!(result.batches, 3);
        assert_eq!(substrate.request_count().await, 3);
        assert!(result.confirmed.is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_confirm_all() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        substrate
            .push_reply(ScriptedReply::failure(SubstrateError::Timeout(30)))
            .await;

        let result = verifier(substrate, &MergeConfig::default())
            .verify(&four_stories(), &[pair(0, 1), pair(2, 3)])
            .await
            .unwrap();

        assert_eq!(result.fallback_batches, 1);
        let pairs: Vec<_> = result.pairs().collect();
        assert_eq!(pairs, vec![pair(0, 1), pair(2, 3)]);
        assert!(result
            .confirmed
            .iter()
            .all(|c| c.reason == FALLBACK_CONFIRM_REASON));
    }

    #[tokio::test]
    async fn test_malformed_answer_reject_all() {
        let config = MergeConfig {
            verification_fallback: VerificationFallback::RejectAll,
            ..MergeConfig::default()
        };
        let substrate = Arc::new(ScriptedSubstrate::new());
        substrate
            .push_reply(ScriptedReply::text("They all look like duplicates to me."))
            .await;

        let result = verifier(substrate, &config)
            .verify(&four_stories(), &[pair(0, 1), pair(2, 3)])
            .await
            .unwrap();

        assert_eq!(result.fallback_batches, 1);
        assert!(result.confirmed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_pair_ids_ignored() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        substrate
            .push_reply(ScriptedReply::text(
                r#"{"confirmed_duplicates": [
                    {"pair_id": "0-3", "is_duplicate": true, "reason": "not submitted"},
                    {"pair_id": "banana", "is_duplicate": true, "reason": "nonsense"},
                    {"pair_id": "2-3", "is_duplicate": true}
                ]}"#,
            ))
            .await;

        let result = verifier(substrate, &MergeConfig::default())
            .verify(&four_stories(), &[pair(0, 1), pair(2, 3)])
            .await
            .unwrap();

        assert_eq!(result.fallback_batches, 0);
        assert_eq!(
            result.confirmed,
            vec![ConfirmedPair {
                pair: pair(2, 3),
                reason: "Confirmed duplicate".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_partial_batch_failure_is_isolated() {
        let stories: Vec<Story> = (0..6).map(|i| story(&format!("Story {i}"), &[])).collect();
        let config = MergeConfig {
            verification_batch_size: 1,
            verification_fallback: VerificationFallback::RejectAll,
            ..MergeConfig::default()
        };
        let substrate = Arc::new(
            ScriptedSubstrate::new()
                .respond_when(
                    "\"pair_id\": \"0-1\"",
                    ScriptedReply::text(
                        r#"{"confirmed_duplicates": [{"pair_id": "0-1", "is_duplicate": true, "reason": "same"}]}"#,
                    ),
                )
                .respond_when(
                    "\"pair_id\": \"2-3\"",
                    ScriptedReply::failure(SubstrateError::ServerError {
                        status: 500,
                        message: "boom".to_string(),
                    }),
                )
                .respond_when(
                    "\"pair_id\": \"4-5\"",
                    ScriptedReply::text(
                        r#"{"confirmed_duplicates": [{"pair_id": "4-5", "is_duplicate": true, "reason": "same"}]}"#,
                    ),
                ),
        );

        let result = verifier(substrate, &config)
            .verify(&stories, &[pair(0, 1), pair(2, 3), pair(4, 5)])
            .await
            .unwrap();

        assert_eq!(result.batches, 3);
        assert_eq!(result.fallback_batches, 1);
        let pairs: Vec<_> = result.pairs().collect();
        assert_eq!(pairs, vec![pair(0, 1), pair(4, 5)]);
    }

    #[tokio::test]
    async fn test_concurrent_batches_on_spawned_task() {
        let config = MergeConfig {
            verification_batch_size: 1,
            max_concurrent_requests: 2,
            ..MergeConfig::default()
        };
        let substrate = Arc::new(
            ScriptedSubstrate::new()
                .respond_when(
                    "\"pair_id\": \"0-1\"",
                    ScriptedReply::text(
                        r#"{"confirmed_duplicates": [{"pair_id": "0-1", "is_duplicate": true, "reason": "same audit trail"}]}"#,
                    ),
                )
                .respond_when(
                    "\"pair_id\": \"2-3\"",
                    ScriptedReply::failure(SubstrateError::Timeout(30)),
                ),
        );
        let verifier: Arc<dyn PairVerifier> = Arc::new(verifier(substrate, &config));

        let handle = tokio::spawn(async move {
            let stories = four_stories();
            verifier.verify(&stories, &[pair(0, 1), pair(2, 3)]).await
        });
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.batches, 2);
        assert_eq!(result.fallback_batches, 1);
        assert_eq!(
            result.confirmed,
            vec![
                ConfirmedPair {
                    pair: pair(0, 1),
                    reason: "same audit trail".to_string()
                },
                ConfirmedPair {
                    pair: pair(2, 3),
                    reason: FALLBACK_CONFIRM_REASON.to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_candidate_rejected() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        let err = verifier(substrate.clone(), &MergeConfig::default())
            .verify(&four_stories(), &[pair(0, 9)])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::IndexOutOfRange { index: 9, len: 4 }));
        assert_eq!(substrate.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_candidates_no_calls() {
        let substrate = Arc::new(ScriptedSubstrate::new());
        let result = verifier(substrate.clone(), &MergeConfig::default())
            .verify(&four_stories(), &[])
            .await
            .unwrap();
        assert_eq!(result, Verification::default());
        assert_eq!(substrate.request_count().await, 0);
    }

    #[test]
    fn test_heuristic_high_title_similarity() {
        let verifier = HeuristicVerifier::default();
        let reason = verifier
            .judge(&story("Export Reports", &[]), &story("Export Report", &[]))
            .unwrap();
        assert_eq!(reason, "High title similarity (96%)");
    }

    #[test]
    fn test_heuristic_same_concept_with_overlap() {
        let verifier = HeuristicVerifier::default();
        let a = story(
            "Audit Logging System",
            &["Log all user data access", "Retain logs for 7 years"],
        );
        let b = story(
            "Comprehensive Audit Logging System",
            &["Log all user data access (read/write)", "Admin can search logs"],
        );
        let reason = verifier.judge(&a, &b).unwrap();
        assert!(reason.starts_with("Same core concept + criteria overlap"));
    }

    #[test]
    fn test_heuristic_core_concept_counts_user() {
        let verifier = HeuristicVerifier::default();
        let a = story(
            "User Profile Editing",
            &["Changes are saved on submit", "Show saved changes"],
        );
        let b = story(
            "User Profile Photo Upload",
            &["Changes are saved on submit", "Send weekly digest"],
        );
        let reason = verifier.judge(&a, &b).unwrap();
        assert_eq!(reason, "Same core concept + criteria overlap (33%)");
    }

    #[test]
    fn test_heuristic_rejects_related_features() {
        let verifier = HeuristicVerifier::default();
        let a = story("Email Registration", &["Send confirmation email"]);
        let b = story("Email Verification", &["Verify token in link"]);
        assert!(verifier.judge(&a, &b).is_none());
    }
}
