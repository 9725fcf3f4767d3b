//! Code reviews tracked per branch.

use mergeit_core::Review;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::{DbResult, JsonFile};

/// Reviews of queued branches, unique by `(repository, review_id)`.
pub struct ReviewStore {
    reviews: Mutex<Vec<Review>>,
    file: Option<JsonFile<Vec<Review>>>,
}

impl ReviewStore {
    pub fn in_memory() -> Self {
        Self {
            reviews: Mutex::new(Vec::new()),
            file: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let file: JsonFile<Vec<Review>> = JsonFile::new(path);
        let reviews = file.load()?.unwrap_or_default();
        debug!(path = %file.path().display(), count = reviews.len(), "Loaded tracked reviews");

        Ok(Self {
            reviews: Mutex::new(reviews),
            file: Some(file),
        })
    }

    /// Insert `review`, replacing a stored review with the same identity.
    pub fn add(&self, review: Review) {
        let mut reviews = self.reviews.lock();
        match reviews
            .iter_mut()
            .find(|r| r.is(&review.repository, review.review_id))
        {
            Some(existing) => *existing = review,
            None => reviews.push(review),
        }
        self.persist(&reviews);
    }

    pub fn delete(&self, review: &Review) {
        let mut reviews = self.reviews.lock();
        let before = reviews.len();
        reviews.retain(|r| !r.is(&review.repository, review.review_id));
        if reviews.len() != before {
            self.persist(&reviews);
        }
    }

    pub fn get(&self, repository: &str, branch_id: i64) -> Vec<Review> {
        self.reviews
            .lock()
            .iter()
            .filter(|r| r.belongs_to(repository, branch_id))
            .cloned()
            .collect()
    }

    pub fn delete_all(&self, repository: &str, branch_id: i64) {
        let mut reviews = self.reviews.lock();
        let before = reviews.len();
        reviews.retain(|r| !r.belongs_to(repository, branch_id));
        if reviews.len() != before {
            self.persist(&reviews);
        }
    }

    fn persist(&self, reviews: &[Review]) {
        let Some(file) = &self.file else {
            return;
        };

        if let Err(e) = file.save(&reviews.to_vec()) {
            warn!(error = %e, "Failed to persist tracked reviews");
        }
    }
}
