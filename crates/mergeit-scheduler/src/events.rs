//! Routes repository events into the branch queue and the review store.

use mergeit_config::BotConfig;
use mergeit_core::{Branch, BranchAttributeChanged, CodeReviewChanged, RepoEvent, Review};
use mergeit_db::{BranchQueue, ReviewStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::task_number;
use crate::worker::WakeSignal;

pub struct EventRouter {
    config: Arc<BotConfig>,
    queue: Arc<BranchQueue>,
    reviews: Arc<ReviewStore>,
    wake: WakeSignal,
}

impl EventRouter {
    pub fn new(
        config: Arc<BotConfig>,
        queue: Arc<BranchQueue>,
        reviews: Arc<ReviewStore>,
        wake: WakeSignal,
    ) -> Self {
        Self {
            config,
            queue,
            reviews,
            wake,
        }
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<RepoEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        debug!("Event router stopped");
    }

    pub fn handle(&self, event: RepoEvent) {
        match event {
            RepoEvent::BranchAttributeChanged(e) => self.attribute_changed(e),
            RepoEvent::CodeReviewChanged(e) => self.review_changed(e),
        }
    }

    fn attribute_changed(&self, e: BranchAttributeChanged) {
        if !self.is_tracked(&e.repository, &e.branch_name) {
            return;
        }

        let status = &self.config.vcs.status_attribute;
        if !e.attribute_name.eq_ignore_ascii_case(&status.name) {
            return;
        }

        if !e.attribute_value.eq_ignore_ascii_case(&status.resolved_value) {
            if self.queue.remove(&e.repository, e.branch_id) {
                info!(branch = %e.branch_name, value = %e.attribute_value, "Branch is no longer resolved; removed from queue");
            }
            return;
        }

        self.enqueue(Branch::new(
            e.repository,
            e.branch_id,
            e.branch_name,
            e.owner,
            e.comment,
        ));
    }

    fn review_changed(&self, e: CodeReviewChanged) {
        if !self.is_tracked(&e.repository, &e.branch_name) {
            return;
        }

        let review = Review::new(
            e.repository.clone(),
            e.review_id,
            e.branch_id,
            e.review_status,
            e.review_title,
        );
        let filter_by_attribute = self.config.vcs.is_branch_attr_filter_enabled();

        if review.is_deleted() {
            self.reviews.delete(&review);
            if filter_by_attribute || !self.reviews.get(&e.repository, e.branch_id).is_empty() {
                return;
            }
            if self.queue.remove(&e.repository, e.branch_id) {
                info!(branch = %e.branch_name, "Branch has no reviews left; removed from queue");
            }
            return;
        }

        self.reviews.add(review);
        if filter_by_attribute {
            return;
        }

        self.enqueue(Branch::new(
            e.repository,
            e.branch_id,
            e.branch_name,
            e.owner,
            e.comment,
        ));
    }

    fn enqueue(&self, branch: Branch) {
        let name = branch.full_name.clone();
        if self.queue.enqueue_if_absent(branch) {
            info!(branch = %name, "Branch queued");
        }
        self.wake.notify();
    }

    fn is_tracked(&self, repository: &str, branch_name: &str) -> bool {
        repository == self.config.repository
            && task_number(branch_name, self.config.branch_prefix()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bot_config;
    use crate::worker::wake_channel;
    use mergeit_core::ReviewStatus;

    struct Harness {
        queue: Arc<BranchQueue>,
        reviews: Arc<ReviewStore>,
        wake: mpsc::Receiver<()>,
        router: EventRouter,
    }

    fn harness(config: BotConfig) -> Harness {
        let queue = Arc::new(BranchQueue::in_memory());
        let reviews = Arc::new(ReviewStore::in_memory());
        let (signal, wake) = wake_channel();
        let router = EventRouter::new(Arc::new(config), queue.clone(), reviews.clone(), signal);
        Harness {
            queue,
            reviews,
            wake,
            router,
        }
    }

    fn attribute(repository: &str, name: &str, attribute: &str, value: &str) -> RepoEvent {
        RepoEvent::BranchAttributeChanged(BranchAttributeChanged {
            repository: repository.to_string(),
            branch_id: 7,
            branch_name: name.to_string(),
            owner: "alice".to_string(),
            comment: String::new(),
            attribute_name: attribute.to_string(),
            attribute_value: value.to_string(),
        })
    }

    fn review(review_id: i64, status: ReviewStatus) -> RepoEvent {
        RepoEvent::CodeReviewChanged(CodeReviewChanged {
            repository: "codice".to_string(),
            branch_id: 7,
            branch_name: "/main/task7".to_string(),
            owner: "alice".to_string(),
            comment: String::new(),
            review_id,
            review_title: "please look".to_string(),
            review_status: status,
        })
    }

    fn review_config() -> BotConfig {
        let mut config = bot_config();
        config.vcs.code_review_enabled = true;
        config.vcs.status_attribute.resolved_value = String::new();
        config
    }

    #[test]
    fn test_resolved_attribute_enqueues_and_wakes() {
        let mut h = harness(bot_config());

        h.router
            .handle(attribute("codice", "/main/task7", "STATUS", "Resolved"));
        h.router
            .handle(attribute("codice", "/main/task7", "status", "resolved"));

        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.peek().unwrap().full_name, "/main/task7");
        assert!(h.wake.try_recv().is_ok());
    }

    #[test]
    fn test_other_value_removes_branch() {
        let h = harness(bot_config());
        h.router
            .handle(attribute("codice", "/main/task7", "status", "resolved"));

        h.router
            .handle(attribute("codice", "/main/task7", "status", "open"));

        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_untracked_events_are_ignored() {
        let h = harness(bot_config());

        h.router
            .handle(attribute("other", "/main/task7", "status", "resolved"));
        h.router
            .handle(attribute("Codice", "/main/task7", "status", "resolved"));
        h.router
            .handle(attribute("codice", "/main/bug7", "status", "resolved"));
        h.router
            .handle(attribute("codice", "/main/task7", "reviewer", "resolved"));

        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_prefix_match_ignores_case() {
        let h = harness(bot_config());
        h.router
            .handle(attribute("codice", "/main/TASK7", "status", "resolved"));
        assert!(h.queue.contains("codice", 7));
    }

    #[test]
    fn test_review_is_tracked_and_branch_queued() {
        let mut h = harness(review_config());

        h.router.handle(review(1, ReviewStatus::UnderReview));

        assert_eq!(h.reviews.get("codice", 7).len(), 1);
        assert!(h.queue.contains("codice", 7));
        assert!(h.wake.try_recv().is_ok());
    }

    #[test]
    fn test_review_updates_replace_by_identity() {
        let h = harness(review_config());

        h.router.handle(review(1, ReviewStatus::UnderReview));
        h.router.handle(review(1, ReviewStatus::Reviewed));

        let reviews = h.reviews.get("codice", 7);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].status, ReviewStatus::Reviewed);
        assert_eq!(h.queue.len(), 1);
    }

    #[test]
    fn test_deleting_last_review_evicts_branch() {
        let h = harness(review_config());
        h.router.handle(review(1, ReviewStatus::Reviewed));
        h.router.handle(review(2, ReviewStatus::Reviewed));

        h.router.handle(review(1, ReviewStatus::Deleted));
        assert!(h.queue.contains("codice", 7));

        h.router.handle(review(2, ReviewStatus::Deleted));
        assert!(h.reviews.get("codice", 7).is_empty());
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_reviews_do_not_queue_when_attribute_filter_is_on() {
        let mut config = bot_config();
        config.vcs.code_review_enabled = true;
        let h = harness(config);

        h.router.handle(review(1, ReviewStatus::Reviewed));
        assert_eq!(h.reviews.get("codice", 7).len(), 1);
        assert!(h.queue.is_empty());

        h.router
            .handle(attribute("codice", "/main/task7", "status", "resolved"));
        h.router.handle(review(1, ReviewStatus::Deleted));
        assert!(h.queue.contains("codice", 7));
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let h = harness(bot_config());
        let (tx, rx) = mpsc::channel(4);
        tx.send(attribute("codice", "/main/task7", "status", "resolved"))
            .await
            .unwrap();
        drop(tx);

        h.router.run(rx, CancellationToken::new()).await;

        assert!(h.queue.contains("codice", 7));
    }
}
