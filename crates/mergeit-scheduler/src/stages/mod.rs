//! The steps a branch goes through on its way to trunk.

pub mod build;
pub mod label;
pub mod merge;

pub use build::{BuildOutcome, BuildStage, PlanRequest};
pub use label::{LabelResult, LabelStage};
pub use merge::{MergeOutcome, MergeStage};
