//! Service modules for the identification pipeline
//!
//! Pure stages (filename parsing, scoring, sanity, decision) plus the collaborator
//! seams the orchestrator drives (local metadata, fingerprinting, result
//! store, tag writer).

pub mod candidate_scorer;
pub mod decision_policy;
pub mod filename_parser;
pub mod fingerprinter;
pub mod metadata_extractor;
pub mod result_store;
pub mod tag_writer;
pub mod text_sanity;

pub use candidate_scorer::{CandidateScorer, StageScores};
pub use decision_policy::{Decision, DecisionPolicy};
pub use fingerprinter::{FingerprintService, FpcalcFingerprinter};
pub use metadata_extractor::{local_identity, read_local_metadata, LocalMetadata};
pub use result_store::{InMemoryResultStore, ResultStore};
pub use tag_writer::{DryRunTagWriter, FileTagWriter, TagWriter};
