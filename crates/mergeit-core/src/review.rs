//! Code reviews tracked per branch.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Status of a code review as reported by the repository server.
///
/// The server sends a numeric id; unknown labels are kept verbatim so they
/// round-trip through persistence unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReviewStatus {
    #[display("Under review")]
    UnderReview,
    #[display("Reviewed")]
    Reviewed,
    #[display("Rework required")]
    ReworkRequired,
    #[display("Deleted")]
    Deleted,
    #[display("{_0}")]
    Other(String),
}

impl ReviewStatus {
    pub const DELETED_ID: i32 = -1;
    pub const UNDER_REVIEW_ID: i32 = 0;
    pub const REVIEWED_ID: i32 = 1;
    pub const REWORK_REQUIRED_ID: i32 = 2;

    pub fn from_id(id: i32) -> Self {
        match id {
            Self::DELETED_ID => ReviewStatus::Deleted,
            Self::UNDER_REVIEW_ID => ReviewStatus::UnderReview,
            Self::REVIEWED_ID => ReviewStatus::Reviewed,
            Self::REWORK_REQUIRED_ID => ReviewStatus::ReworkRequired,
            _ => ReviewStatus::Other(String::new()),
        }
    }

    /// Parse a status coming from the server, either a numeric id or a label.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<i32>() {
            Ok(id) => Self::from_id(id),
            Err(_) => Self::from_label(value),
        }
    }

    fn from_label(label: &str) -> Self {
        let label = label.trim();
        [
            ReviewStatus::UnderReview,
            ReviewStatus::Reviewed,
            ReviewStatus::ReworkRequired,
            ReviewStatus::Deleted,
        ]
        .into_iter()
        .find(|known| known.to_string().eq_ignore_ascii_case(label))
        .unwrap_or_else(|| ReviewStatus::Other(label.to_string()))
    }
}

impl From<String> for ReviewStatus {
    fn from(value: String) -> Self {
        ReviewStatus::from_label(&value)
    }
}

impl From<ReviewStatus> for String {
    fn from(status: ReviewStatus) -> Self {
        status.to_string()
    }
}

/// A code review attached to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub repository: String,
    pub review_id: i64,
    pub branch_id: i64,
    pub status: ReviewStatus,
    pub title: String,
}

impl Review {
    pub fn new(
        repository: impl Into<String>,
        review_id: i64,
        branch_id: i64,
        status: ReviewStatus,
        title: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            review_id,
            branch_id,
            status,
            title: title.into(),
        }
    }

    /// Identity is `(repository, review_id)`, repository compared case-sensitively.
    pub fn is(&self, repository: &str, review_id: i64) -> bool {
        self.review_id == review_id && self.repository == repository
    }

    pub fn belongs_to(&self, repository: &str, branch_id: i64) -> bool {
        self.branch_id == branch_id && self.repository == repository
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ReviewStatus::Deleted
    }

    pub fn is_reviewed(&self) -> bool {
        self.status == ReviewStatus::Reviewed
    }
}

/// Review gate: at least one review, and every review approved.
pub fn all_reviewed(reviews: &[Review]) -> bool {
    !reviews.is_empty() && reviews.iter().all(Review::is_reviewed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(id: i64, status: ReviewStatus) -> Review {
        Review::new("codice", id, 7, status, format!("review {}", id))
    }

    #[test]
    fn test_parse_numeric_ids() {
        assert_eq!(ReviewStatus::parse("-1"), ReviewStatus::Deleted);
        assert_eq!(ReviewStatus::parse("0"), ReviewStatus::UnderReview);
        assert_eq!(ReviewStatus::parse("1"), ReviewStatus::Reviewed);
        assert_eq!(ReviewStatus::parse(" 2 "), ReviewStatus::ReworkRequired);
    }

    #[test]
    fn test_parse_labels_case_insensitive() {
        assert_eq!(ReviewStatus::parse("reviewed"), ReviewStatus::Reviewed);
        assert_eq!(ReviewStatus::parse("UNDER REVIEW"), ReviewStatus::UnderReview);
        assert_eq!(
            ReviewStatus::parse("Waiting"),
            ReviewStatus::Other("Waiting".to_string())
        );
    }

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&ReviewStatus::ReworkRequired).unwrap();
        assert_eq!(json, "\"Rework required\"");

        let back: ReviewStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReviewStatus::ReworkRequired);
    }

    #[test]
    fn test_gate_requires_at_least_one_review() {
        assert!(!all_reviewed(&[]));
    }

    #[test]
    fn test_gate_requires_every_review_approved() {
        let mut reviews = vec![review(1, ReviewStatus::Reviewed)];
        assert!(all_reviewed(&reviews));

        reviews.push(review(2, ReviewStatus::UnderReview));
        assert!(!all_reviewed(&reviews));
    }
}
