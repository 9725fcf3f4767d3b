//! Task status transitions: testing, failed, merged.
//!
//! Each transition updates the branch status attribute, the issue tracker
//! status field (when configured) and notifies the owner. A failure inside a
//! transition is reported to the owner and swallowed, so it never changes the
//! outcome the pipeline already decided.

use mergeit_config::BotConfig;
use mergeit_core::{Branch, IssueTracker, RepositoryOps, ReviewStatus};
use mergeit_db::ReviewStore;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::notify::TaskNotifier;

#[derive(Clone)]
pub struct TaskStatus {
    config: Arc<BotConfig>,
    repo: Arc<dyn RepositoryOps>,
    issues: Arc<dyn IssueTracker>,
    reviews: Arc<ReviewStore>,
    notifier: TaskNotifier,
}

impl TaskStatus {
    pub fn new(
        config: Arc<BotConfig>,
        repo: Arc<dyn RepositoryOps>,
        issues: Arc<dyn IssueTracker>,
        reviews: Arc<ReviewStore>,
        notifier: TaskNotifier,
    ) -> Self {
        Self {
            config,
            repo,
            issues,
            reviews,
            notifier,
        }
    }

    pub async fn set_testing(&self, branch: &Branch, task: Option<&str>, message: &str) {
        if let Err(e) = self.try_set_testing(branch, task).await {
            warn!(branch = %branch.full_name, error = %e, "Unable to set task as testing");
            self.notifier
                .notify_status_error(branch, "testing", &e.to_string(), message)
                .await;
            return;
        }
        self.notifier
            .notify_task_status(&branch.owner, message)
            .await;
    }

    pub async fn set_failed(&self, branch: &Branch, task: Option<&str>, message: &str) {
        if let Err(e) = self.try_set_failed(branch, task).await {
            warn!(branch = %branch.full_name, error = %e, "Unable to set task as failed");
            self.notifier
                .notify_status_error(branch, "failed", &e.to_string(), message)
                .await;
            return;
        }
        self.notifier
            .notify_task_status(&branch.owner, message)
            .await;
    }

    pub async fn set_merged(&self, branch: &Branch, task: Option<&str>, message: &str) {
        if let Err(e) = self.try_set_merged(branch, task).await {
            warn!(branch = %branch.full_name, error = %e, "Unable to set task as merged");
            self.notifier
                .notify_status_error(branch, "merged", &e.to_string(), message)
                .await;
            return;
        }
        self.notifier
            .notify_task_status(&branch.owner, message)
            .await;
    }

    async fn try_set_testing(&self, branch: &Branch, task: Option<&str>) -> mergeit_core::Result<()> {
        let status = &self.config.vcs.status_attribute;
        if !status.testing_value.is_empty() {
            self.set_attribute(branch, &status.testing_value).await?;
        }

        if let Some(issues) = &self.config.issues {
            if !issues.status_field.testing_value.is_empty() {
                self.set_issue_status(task, &issues.status_field.testing_value)
                    .await?;
            }
        }
        Ok(())
    }

    async fn try_set_failed(&self, branch: &Branch, task: Option<&str>) -> mergeit_core::Result<()> {
        if self.config.vcs.code_review_enabled {
            self.reset_reviews_to_pending(branch).await?;
        }

        self.set_attribute(branch, &self.config.vcs.status_attribute.failed_value)
            .await?;

        if let Some(issues) = &self.config.issues {
            self.set_issue_status(task, &issues.status_field.failed_value)
                .await?;
        }
        Ok(())
    }

    async fn try_set_merged(&self, branch: &Branch, task: Option<&str>) -> mergeit_core::Result<()> {
        if self.config.vcs.code_review_enabled {
            self.reviews.delete_all(&branch.repository, branch.id);
        }

        self.set_attribute(branch, &self.config.vcs.status_attribute.merged_value)
            .await?;

        if let Some(issues) = &self.config.issues {
            self.set_issue_status(task, &issues.status_field.merged_value)
                .await?;
        }
        Ok(())
    }

    /// Failed branches go back to review: every tracked review is reopened.
    async fn reset_reviews_to_pending(&self, branch: &Branch) -> mergeit_core::Result<()> {
        for review in self.reviews.get(&branch.repository, branch.id) {
            debug!(review = review.review_id, branch = %branch.full_name, "Reopening code review");
            self.repo
                .update_code_review(
                    &branch.repository,
                    review.review_id,
                    ReviewStatus::UNDER_REVIEW_ID,
                    &review.title,
                )
                .await?;
        }
        Ok(())
    }

    async fn set_attribute(&self, branch: &Branch, value: &str) -> mergeit_core::Result<()> {
        self.repo
            .set_branch_attribute(
                &branch.repository,
                &branch.full_name,
                &self.config.vcs.status_attribute.name,
                value,
            )
            .await
    }

    async fn set_issue_status(&self, task: Option<&str>, value: &str) -> mergeit_core::Result<()> {
        let (Some(task), Some(issues)) = (task, &self.config.issues) else {
            return Ok(());
        };

        self.issues
            .set_issue_field(
                &issues.plug,
                &issues.project_key,
                task,
                &issues.status_field.name,
                value,
            )
            .await
    }
}
