//! Startup work done before the scheduler takes over.

use mergeit_config::BotConfig;
use mergeit_core::{Error, RepositoryOps};
use mergeit_db::{BranchQueue, ReviewStore};
use std::collections::HashSet;
use tracing::info;

/// Create the status attribute on the repository unless it exists.
pub async fn ensure_status_attribute(
    repo: &dyn RepositoryOps,
    config: &BotConfig,
    bot_name: &str,
) -> mergeit_core::Result<()> {
    let status = &config.vcs.status_attribute;
    if repo
        .attribute_exists(&config.repository, &status.name)
        .await?
    {
        return Ok(());
    }

    let comment = attribute_comment(&status.values(), bot_name);
    if repo
        .create_attribute(&config.repository, &status.name, &comment)
        .await?
    {
        info!(attribute = %status.name, repository = %config.repository, "Status attribute created");
        return Ok(());
    }

    Err(Error::Internal(format!(
        "Trunkbot {}: Unable to create attribute name {} on repository {}. Check the server log.",
        bot_name, status.name, config.repository
    )))
}

/// Comment of an attribute created by the bot, listing its known values.
pub fn attribute_comment(values: &[&str], bot_name: &str) -> String {
    let signature = format!("Attribute automatically created by trunk-bot: {}", bot_name);

    let mut seen = HashSet::new();
    let values: Vec<String> = values
        .iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            if v.contains(' ') || v.contains(',') {
                format!("\"{}\"", v)
            } else {
                v.to_string()
            }
        })
        .filter(|v| seen.insert(v.clone()))
        .collect();

    if values.is_empty() {
        return signature;
    }
    format!("{}\ndefault: {}", signature, values.join(", "))
}

/// Fill the queue and the review store with the branches that became ready
/// while the bot was not listening.
pub async fn load_branches_to_process(
    repo: &dyn RepositoryOps,
    config: &BotConfig,
    queue: &BranchQueue,
    reviews: &ReviewStore,
) -> mergeit_core::Result<()> {
    info!("Retrieving branches to process");

    let status = &config.vcs.status_attribute;
    let filter_by_attribute = config.vcs.is_branch_attr_filter_enabled();

    if config.vcs.code_review_enabled {
        let pending = repo
            .find_pending_branches_with_reviews(
                &config.repository,
                config.branch_prefix(),
                &status.name,
                &status.merged_value,
            )
            .await?;

        let mut batch = Vec::new();
        for row in pending {
            reviews.add(row.review);
            if !filter_by_attribute {
                batch.push(row.branch);
            }
        }
        info!(count = batch.len(), "Branches with code reviews found");
        queue.add_batch(batch);
    }

    if !filter_by_attribute {
        return Ok(());
    }

    let resolved = repo
        .find_resolved_branches(
            &config.repository,
            config.branch_prefix(),
            &status.name,
            &status.resolved_value,
        )
        .await?;
    info!(count = resolved.len(), "Resolved branches found");
    queue.add_batch(resolved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRepo, bot_config};
    use mergeit_core::{Branch, BranchWithReview, Review, ReviewStatus};

    fn branch(id: i64) -> Branch {
        Branch::new("codice", id, format!("/main/task{}", id), "alice", "")
    }

    fn with_review(id: i64, review_id: i64) -> BranchWithReview {
        BranchWithReview {
            branch: branch(id),
            review: Review::new("codice", review_id, id, ReviewStatus::UnderReview, "r"),
        }
    }

    #[test]
    fn test_attribute_comment() {
        assert_eq!(
            attribute_comment(&["resolved", "", "in test", "a,b", "resolved"], "bot"),
            "Attribute automatically created by trunk-bot: bot\ndefault: resolved, \"in test\", \"a,b\""
        );
        assert_eq!(
            attribute_comment(&["", " "], "bot"),
            "Attribute automatically created by trunk-bot: bot"
        );
    }

    #[tokio::test]
    async fn test_existing_attribute_is_left_alone() {
        let repo = FakeRepo::default();
        repo.add_attribute_type("status");

        ensure_status_attribute(&repo, &bot_config(), "bot")
            .await
            .unwrap();

        assert!(repo.created_attribute_types().is_empty());
    }

    #[tokio::test]
    async fn test_missing_attribute_is_created() {
        let repo = FakeRepo::default();

        ensure_status_attribute(&repo, &bot_config(), "bot")
            .await
            .unwrap();

        let created = repo.created_attribute_types();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "status");
        assert!(created[0].1.ends_with("default: resolved, testing, failed, merged"));
    }

    #[tokio::test]
    async fn test_rejected_attribute_creation_is_fatal() {
        let repo = FakeRepo::default();
        repo.reject_attribute_creation();

        let err = ensure_status_attribute(&repo, &bot_config(), "bot")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unable to create attribute name status"));
    }

    #[tokio::test]
    async fn test_load_resolved_branches() {
        let repo = FakeRepo::default();
        repo.set_resolved(vec![branch(1), branch(2)]);
        let queue = BranchQueue::in_memory();
        queue.enqueue_if_absent(branch(9));
        let reviews = ReviewStore::in_memory();

        load_branches_to_process(&repo, &bot_config(), &queue, &reviews)
            .await
            .unwrap();

        assert_eq!(queue.dequeue().unwrap().id, 1);
        assert_eq!(queue.dequeue().unwrap().id, 2);
        assert_eq!(queue.dequeue().unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_load_reviewed_branches_without_attribute_filter() {
        let repo = FakeRepo::default();
        repo.set_pending(vec![with_review(1, 10), with_review(1, 11), with_review(2, 12)]);
        let mut config = bot_config();
        config.vcs.code_review_enabled = true;
        config.vcs.status_attribute.resolved_value = String::new();
        let queue = BranchQueue::in_memory();
        let reviews = ReviewStore::in_memory();

        load_branches_to_process(&repo, &config, &queue, &reviews)
            .await
            .unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(reviews.get("codice", 1).len(), 2);
        assert_eq!(reviews.get("codice", 2).len(), 1);
    }

    #[tokio::test]
    async fn test_reviews_are_tracked_but_attribute_filter_decides_queue() {
        let repo = FakeRepo::default();
        repo.set_pending(vec![with_review(1, 10)]);
        repo.set_resolved(vec![branch(2)]);
        let mut config = bot_config();
        config.vcs.code_review_enabled = true;
        let queue = BranchQueue::in_memory();
        let reviews = ReviewStore::in_memory();

        load_branches_to_process(&repo, &config, &queue, &reviews)
            .await
            .unwrap();

        assert_eq!(reviews.get("codice", 1).len(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("codice", 2));
    }
}
