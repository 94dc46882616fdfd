pub mod candidate_filter;
pub mod grouping;
pub mod json_payload;
pub mod merge_orchestrator;
pub mod merge_synthesizer;
pub mod similarity;
pub mod story_catalog;
pub mod verifier;

pub use candidate_filter::{CandidateFilter, CandidateMatch};
pub use grouping::{build_groups, DisjointSet};
pub use json_payload::{extract_json_payload, parse_json_payload, CapabilityFailure, JsonExtractError};
pub use merge_orchestrator::{
    render_report, MergeOutcome, MergeRunSummary, MergeStage, ReportMethod, StoryMerger,
};
pub use merge_synthesizer::{
    HeuristicSynthesizer, MergeGroup, MergeSynthesizer, ModelSynthesizer, SynthesisOutcome,
};
pub use story_catalog::{CatalogEntry, CatalogStats, StoryCatalog};
pub use verifier::{ConfirmedPair, HeuristicVerifier, ModelVerifier, PairVerifier, Verification};
