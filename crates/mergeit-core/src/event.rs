//! Repository notifications the bot reacts to.

use crate::review::ReviewStatus;

/// An attribute was set on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchAttributeChanged {
    pub repository: String,
    pub branch_id: i64,
    pub branch_name: String,
    pub owner: String,
    pub comment: String,
    pub attribute_name: String,
    pub attribute_value: String,
}

/// A code review was created, updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReviewChanged {
    pub repository: String,
    pub branch_id: i64,
    pub branch_name: String,
    pub owner: String,
    pub comment: String,
    pub review_id: i64,
    pub review_title: String,
    pub review_status: ReviewStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    BranchAttributeChanged(BranchAttributeChanged),
    CodeReviewChanged(CodeReviewChanged),
}
