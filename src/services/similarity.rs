//! Textual similarity measures shared by every merge tier.
//!
//! All functions here are pure and deterministic.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::models::Story;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w{3,}\b").expect("valid word pattern"));

static BULLET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-•*\s]+").expect("valid bullet pattern"));

/// Generic title words that say nothing about which feature a story is about.
const GENERIC_TITLE_WORDS: &[&str] = &[
    "system",
    "implementation",
    "comprehensive",
    "basic",
    "simple",
    "advanced",
    "complete",
    "full",
    "management",
    "feature",
];

/// Filler words dropped on top of the generic ones when pre-filtering titles.
const TITLE_FILLER_WORDS: &[&str] = &[
    "user", "users", "with", "from", "that", "this", "have", "has",
];

/// Filler words ignored when comparing the concepts of two criteria.
const CRITERIA_STOPWORDS: &[&str] = &[
    "all", "the", "and", "for", "with", "from", "that", "this", "are", "have",
];

/// Criteria pairs above this ratio always match.
const CRITERION_MATCH_RATIO: f64 = 0.75;

/// Share of the smaller word set two criteria must have in common to match.
const CRITERION_CONCEPT_OVERLAP: f64 = 0.6;

/// Longest-matching-blocks similarity of two strings, in `[0, 1]`.
///
/// `2 * M / T` where `T` is the combined length in characters and `M` the
/// number of characters in the matching blocks found by recursively taking the
/// longest common substring (earliest on ties) and recursing on both sides.
/// Two empty strings are identical.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_characters(&a, &b);
    2.0 * matched as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Among equally long blocks the one starting earliest in `a` wins, then the
/// one starting earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // current[j + 1] holds the length of the common suffix ending at (i, j)
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            current[j + 1] = if a[i] == b[j] { previous[j] + 1 } else { 0 };
            let run = current[j + 1];
            if run > best_size {
                best_i = i + 1 - run;
                best_j = j + 1 - run;
                best_size = run;
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }

    (best_i, best_j, best_size)
}

/// Similarity of two titles, compared lowercased and trimmed.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    sequence_ratio(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

fn words_without(text: &str, stopwords: &[&[&str]]) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    WORD_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|word| !stopwords.iter().any(|list| list.contains(word)))
        .map(str::to_string)
        .collect()
}

/// Meaningful words of at least three characters, generic title terms removed.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    words_without(text, &[GENERIC_TITLE_WORDS, TITLE_FILLER_WORDS])
}

/// Keywords two titles have in common.
pub fn shared_keywords(a: &str, b: &str) -> BTreeSet<String> {
    let left = extract_keywords(a);
    let right = extract_keywords(b);
    left.intersection(&right).cloned().collect()
}

/// Core-concept words two titles have in common.
///
/// Only the generic title words are removed, so words like "user" still count.
pub fn shared_core_concepts(a: &str, b: &str) -> BTreeSet<String> {
    let left = words_without(a, &[GENERIC_TITLE_WORDS]);
    let right = words_without(b, &[GENERIC_TITLE_WORDS]);
    left.intersection(&right).cloned().collect()
}

/// Strip bullet markers and case so criteria compare on content alone.
pub fn normalize_criterion(criterion: &str) -> String {
    BULLET_PREFIX
        .replace(criterion, "")
        .trim()
        .to_lowercase()
}

/// Share of the smaller concept-word set that two criteria have in common.
pub fn keyword_overlap_ratio(a: &str, b: &str) -> f64 {
    let left = words_without(a, &[CRITERIA_STOPWORDS]);
    let right = words_without(b, &[CRITERIA_STOPWORDS]);
    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / smaller as f64
}

/// Fuzzy Jaccard similarity of two acceptance-criteria lists, in `[0, 1]`.
///
/// Each criterion of `first` greedily claims the unclaimed criterion of
/// `second` with the highest ratio among those that match it, either by
/// ratio above 0.75 or by sharing at least 60% of their concept words.
/// The result is `matched / (len1 + len2 - matched)`; an empty list on
/// either side yields 0.
///
/// A pair that matches only by concept words counts however low its ratio
/// is; the ratio just ranks the eligible targets.
pub fn criteria_overlap(first: &[String], second: &[String]) -> f64 {
    if first.is_empty() || second.is_empty() {
        return 0.0;
    }

    let left: Vec<String> = first.iter().map(|c| normalize_criterion(c)).collect();
    let right: Vec<String> = second.iter().map(|c| normalize_criterion(c)).collect();
    let mut claimed = vec![false; right.len()];
    let mut matched = 0usize;

    for criterion in &left {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in right.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            let ratio = sequence_ratio(criterion, candidate);
            let eligible = ratio > CRITERION_MATCH_RATIO
                || keyword_overlap_ratio(criterion, candidate) >= CRITERION_CONCEPT_OVERLAP;
            if eligible && best.map_or(true, |(_, best_ratio)| ratio > best_ratio) {
                best = Some((idx, ratio));
            }
        }
        if let Some((idx, _)) = best {
            claimed[idx] = true;
            matched += 1;
        }
    }

    matched as f64 / (first.len() + second.len() - matched) as f64
}

/// Criteria overlap of two stories.
pub fn story_criteria_overlap(a: &Story, b: &Story) -> f64 {
    criteria_overlap(&a.acceptance_criteria, &b.acceptance_criteria)
}
