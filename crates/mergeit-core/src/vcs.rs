//! Version control operations consumed by the pipeline.
//!
//! The repository server does the actual merging; this module only describes
//! the calls the bot makes and the results it reads back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::branch::{Branch, BranchWithReview};
use crate::error::{Error, Result};

/// Result code of a server-side merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum MergeToStatus {
    #[display("ok")]
    Ok,
    #[display("ancestor_not_found")]
    AncestorNotFound,
    #[display("merge_not_needed")]
    MergeNotNeeded,
    #[display("conflicts")]
    Conflicts,
    #[display("destination_changes")]
    DestinationChanges,
    #[display("error")]
    Error,
    #[display("multiple_heads")]
    MultipleHeads,
}

impl FromStr for MergeToStatus {
    type Err = Error;

    /// Accepts the server's enum names (`DestinationChanges`) as well as the
    /// report spelling (`destination_changes`).
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "ok" => Ok(MergeToStatus::Ok),
            "ancestornotfound" => Ok(MergeToStatus::AncestorNotFound),
            "mergenotneeded" => Ok(MergeToStatus::MergeNotNeeded),
            "conflicts" => Ok(MergeToStatus::Conflicts),
            "destinationchanges" => Ok(MergeToStatus::DestinationChanges),
            "error" => Ok(MergeToStatus::Error),
            "multipleheads" => Ok(MergeToStatus::MultipleHeads),
            _ => Err(Error::InvalidInput(format!("unknown merge status: {}", s))),
        }
    }
}

/// Changeset (or shelve) created in another repository by a cross-repo merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XlinkChangeset {
    pub repository: String,
    pub changeset_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeToResponse {
    pub status: MergeToStatus,
    pub message: String,
    /// Shelve id for a merge to shelve, changeset id for a checkin.
    pub changeset_number: i64,
    pub xlink_changesets: Vec<XlinkChangeset>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeToOptions {
    pub create_shelve: bool,
    pub ensure_no_dst_changes: bool,
}

impl MergeToOptions {
    pub fn create_shelve() -> Self {
        Self {
            create_shelve: true,
            ensure_no_dst_changes: false,
        }
    }

    pub fn ensure_no_dst_changes() -> Self {
        Self {
            create_shelve: false,
            ensure_no_dst_changes: true,
        }
    }
}

/// A branch as described by the repository server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub branch: Branch,
    /// Server-side id of the repository, used to key merge reports.
    pub repository_id: String,
    pub head_changeset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub id: i64,
    pub guid: String,
    pub owner: String,
}

/// A label as returned by the label lookup query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub date: DateTime<Utc>,
    pub changeset_id: i64,
}

/// Operations against the repository server.
#[async_trait]
pub trait RepositoryOps: Send + Sync {
    /// Look a branch up by its full name. `None` when it no longer exists.
    async fn get_branch(&self, repository: &str, branch_name: &str)
        -> Result<Option<BranchInfo>>;

    /// Current full name of the branch with the given id.
    async fn get_branch_name(&self, repository: &str, branch_id: i64) -> Result<Option<String>>;

    async fn get_changeset(&self, repository: &str, changeset_id: i64) -> Result<Changeset>;

    async fn get_branch_attribute(
        &self,
        repository: &str,
        branch_name: &str,
        attribute: &str,
    ) -> Result<Option<String>>;

    async fn set_branch_attribute(
        &self,
        repository: &str,
        branch_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()>;

    async fn attribute_exists(&self, repository: &str, attribute: &str) -> Result<bool>;

    /// Create an attribute type. Returns whether the server accepted it.
    async fn create_attribute(
        &self,
        repository: &str,
        attribute: &str,
        comment: &str,
    ) -> Result<bool>;

    /// Branches under `prefix` whose status attribute equals `resolved_value`.
    async fn find_resolved_branches(
        &self,
        repository: &str,
        prefix: &str,
        attribute: &str,
        resolved_value: &str,
    ) -> Result<Vec<Branch>>;

    /// Branches under `prefix` with code reviews that are not yet merged.
    async fn find_pending_branches_with_reviews(
        &self,
        repository: &str,
        prefix: &str,
        attribute: &str,
        merged_value: &str,
    ) -> Result<Vec<BranchWithReview>>;

    /// Most recent label whose name matches `pattern` (`%` is a wildcard),
    /// optionally limited to labels created after `since`.
    async fn find_most_recent_label(
        &self,
        repository: &str,
        pattern: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Label>>;

    async fn merge_branch_to(
        &self,
        repository: &str,
        source_branch: &str,
        destination_branch: &str,
        comment: &str,
        options: MergeToOptions,
    ) -> Result<MergeToResponse>;

    async fn merge_shelve_to(
        &self,
        repository: &str,
        shelve_id: i64,
        destination_branch: &str,
        comment: &str,
        options: MergeToOptions,
    ) -> Result<MergeToResponse>;

    async fn delete_shelve(&self, repository: &str, shelve_id: i64) -> Result<()>;

    async fn is_merge_allowed(
        &self,
        repository: &str,
        source_branch: &str,
        destination_branch: &str,
    ) -> Result<bool>;

    async fn create_label(
        &self,
        repository: &str,
        name: &str,
        changeset_id: i64,
        comment: &str,
    ) -> Result<()>;

    async fn update_code_review(
        &self,
        repository: &str,
        review_id: i64,
        status: i32,
        title: &str,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_status_names() {
        assert_eq!(
            "DestinationChanges".parse::<MergeToStatus>().unwrap(),
            MergeToStatus::DestinationChanges
        );
        assert_eq!("OK".parse::<MergeToStatus>().unwrap(), MergeToStatus::Ok);
        assert_eq!(
            "merge_not_needed".parse::<MergeToStatus>().unwrap(),
            MergeToStatus::MergeNotNeeded
        );
        assert!("Exploded".parse::<MergeToStatus>().is_err());
    }

    #[test]
    fn test_status_report_text() {
        assert_eq!(MergeToStatus::AncestorNotFound.to_string(), "ancestor_not_found");
        assert_eq!(MergeToStatus::Ok.to_string(), "ok");
    }
}
