//! Core domain types and collaborator traits for the mergeit merge bot.
//!
//! This crate contains:
//! - Branch and code review work items
//! - Version control operations (merge-to, shelves, labels, attributes)
//! - Continuous integration plans and the persisted build-in-progress record
//! - Issue tracker, notifier and user profile capabilities
//! - Merge reports and the sink they are uploaded to
//! - Repository events (attribute and code review changes)

pub mod branch;
pub mod ci;
pub mod error;
pub mod event;
pub mod issues;
pub mod notifier;
pub mod report;
pub mod review;
pub mod vcs;

pub use branch::{Branch, BranchWithReview};
pub use ci::{BuildInProgress, BuildProperties, BuildStep, ContinuousIntegration, PlanStatus};
pub use error::{Error, Result};
pub use event::{BranchAttributeChanged, CodeReviewChanged, RepoEvent};
pub use issues::IssueTracker;
pub use notifier::{Notifier, UserProfiles};
pub use report::{MergeReport, ReportEntry, ReportSink};
pub use review::{Review, ReviewStatus};
pub use vcs::{
    BranchInfo, Changeset, Label, MergeToOptions, MergeToResponse, MergeToStatus, RepositoryOps,
    XlinkChangeset,
};
