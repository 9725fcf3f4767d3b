//! Branch work items.

use serde::{Deserialize, Serialize};

use crate::review::Review;

/// A branch waiting to be integrated into trunk.
///
/// Identity is `(repository, id)`; `full_name` is display data that can change
/// when the branch is renamed, so it is refreshed before every processing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub repository: String,
    pub id: i64,
    pub full_name: String,
    pub owner: String,
    pub comment: String,
}

impl Branch {
    pub fn new(
        repository: impl Into<String>,
        id: i64,
        full_name: impl Into<String>,
        owner: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            id,
            full_name: full_name.into(),
            owner: owner.into(),
            comment: comment.into(),
        }
    }

    /// Whether this branch is `(repository, id)`. Repository names are
    /// compared case-sensitively.
    pub fn is(&self, repository: &str, id: i64) -> bool {
        self.id == id && self.repository == repository
    }

    pub fn same_identity(&self, other: &Branch) -> bool {
        self.is(&other.repository, other.id)
    }

    /// The last path segment of the branch name (`/main/task/123` -> `123`).
    pub fn short_name(&self) -> &str {
        short_name(&self.full_name)
    }
}

/// Last segment of a slash separated branch name.
pub fn short_name(full_name: &str) -> &str {
    match full_name.rfind('/') {
        Some(idx) => &full_name[idx + 1..],
        None => full_name,
    }
}

/// Row of the startup discovery query: a candidate branch and one of its reviews.
#[derive(Debug, Clone)]
pub struct BranchWithReview {
    pub branch: Branch,
    pub review: Review,
}
