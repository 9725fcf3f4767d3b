//! Server-side merges: branch to shelve, then shelve to trunk.

use mergeit_core::{
    Branch, MergeReport, MergeToOptions, MergeToStatus, RepositoryOps, XlinkChangeset,
};
use std::sync::Arc;
use tracing::debug;

use crate::status::TaskStatus;

/// Outcome of a merge step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// `created_id` is the shelve for a merge to shelve and the new trunk
    /// changeset for a checkin.
    Succeed {
        created_id: i64,
        xlinks: Vec<XlinkChangeset>,
    },
    Failed,
    /// Trunk moved under the shelve; try the branch again later.
    QueueAgain,
}

pub struct MergeStage {
    repo: Arc<dyn RepositoryOps>,
    status: TaskStatus,
    queue_again_on_fail: bool,
}

impl MergeStage {
    pub fn new(repo: Arc<dyn RepositoryOps>, status: TaskStatus, queue_again_on_fail: bool) -> Self {
        Self {
            repo,
            status,
            queue_again_on_fail,
        }
    }

    /// Merge `branch` into `destination` as a shelve, without touching trunk.
    pub async fn to_shelve(
        &self,
        branch: &Branch,
        destination: &str,
        comment: &str,
        task: Option<&str>,
        report: &mut MergeReport,
    ) -> mergeit_core::Result<MergeOutcome> {
        let response = self
            .repo
            .merge_branch_to(
                &branch.repository,
                &branch.full_name,
                destination,
                comment,
                MergeToOptions::create_shelve(),
            )
            .await?;

        if response.status == MergeToStatus::MergeNotNeeded {
            let message = format!(
                "Branch {} was already merged to {} (MergeNotNeeded).",
                branch.full_name, destination
            );
            debug!("{}", message);
            self.status.set_merged(branch, task, &message).await;
            return Ok(MergeOutcome::Failed);
        }

        let failed = matches!(
            response.status,
            MergeToStatus::AncestorNotFound | MergeToStatus::Conflicts | MergeToStatus::Error
        );
        if failed || response.changeset_number == 0 {
            let message = format!(
                "Can't merge branch {}. Reason: {}",
                branch.full_name, response.message
            );
            debug!("{}", message);
            report.add_merge_failed(response.status, &response.message);
            self.status.set_failed(branch, task, &message).await;
            return Ok(MergeOutcome::Failed);
        }

        report.add_merge_succeeded(response.status);
        Ok(MergeOutcome::Succeed {
            created_id: response.changeset_number,
            xlinks: response.xlink_changesets,
        })
    }

    /// Check the shelve in to `destination`, refusing if it changed meanwhile.
    pub async fn apply_shelve(
        &self,
        branch: &Branch,
        destination: &str,
        shelve_id: i64,
        comment: &str,
        task: Option<&str>,
        report: &mut MergeReport,
    ) -> mergeit_core::Result<MergeOutcome> {
        let response = self
            .repo
            .merge_shelve_to(
                &branch.repository,
                shelve_id,
                destination,
                comment,
                MergeToOptions::ensure_no_dst_changes(),
            )
            .await?;

        let changeset = (response.status == MergeToStatus::Ok && response.changeset_number > 0)
            .then_some(response.changeset_number);
        report.update_merge(response.status, changeset);

        if let Some(created_id) = changeset {
            return Ok(MergeOutcome::Succeed {
                created_id,
                xlinks: response.xlink_changesets,
            });
        }

        let message = format!(
            "Can't merge branch {}. Reason: {}",
            branch.full_name, response.message
        );
        debug!("{}", message);

        if response.status == MergeToStatus::DestinationChanges && self.queue_again_on_fail {
            return Ok(MergeOutcome::QueueAgain);
        }

        self.status.set_failed(branch, task, &message).await;
        Ok(MergeOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fakes, bot_config, merge_response};
    use mergeit_core::report::{MERGE_FAILED, MERGE_OK};
    use mergeit_db::ReviewStore;

    fn stage(fakes: &Fakes, queue_again: bool) -> MergeStage {
        let config = bot_config();
        let status = fakes.task_status(&config, Arc::new(ReviewStore::in_memory()));
        MergeStage::new(fakes.repo.clone(), status, queue_again)
    }

    fn branch() -> Branch {
        Branch::new("codice", 7, "/main/task7", "alice", "")
    }

    #[tokio::test]
    async fn test_shelve_succeeds_with_xlinks() {
        let fakes = Fakes::new();
        let mut response = merge_response(MergeToStatus::Ok, 31);
        response.xlink_changesets.push(XlinkChangeset {
            repository: "lib".to_string(),
            changeset_id: 4,
        });
        fakes.repo.set_merge_response(response);

        let mut report = MergeReport::new("1", 7);
        let outcome = stage(&fakes, false)
            .to_shelve(&branch(), "/main", "c", Some("7"), &mut report)
            .await
            .unwrap();

        match outcome {
            MergeOutcome::Succeed { created_id, xlinks } => {
                assert_eq!(created_id, 31);
                assert_eq!(xlinks.len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(report.has_entry(MERGE_OK));
    }

    #[tokio::test]
    async fn test_shelve_conflicts_mark_failed() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_merge_response(merge_response(MergeToStatus::Conflicts, 0));

        let mut report = MergeReport::new("1", 7);
        let outcome = stage(&fakes, false)
            .to_shelve(&branch(), "/main", "c", Some("7"), &mut report)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Failed);
        assert_eq!(report.entry(MERGE_FAILED).unwrap().text, "conflicts");
        assert_eq!(
            fakes.repo.attribute("/main/task7", "status").as_deref(),
            Some("failed")
        );
    }

    #[tokio::test]
    async fn test_zero_changeset_is_a_failure() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_merge_response(merge_response(MergeToStatus::Ok, 0));

        let mut report = MergeReport::new("1", 7);
        let outcome = stage(&fakes, false)
            .to_shelve(&branch(), "/main", "c", None, &mut report)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Failed);
    }

    #[tokio::test]
    async fn test_merge_not_needed_marks_merged() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_merge_response(merge_response(MergeToStatus::MergeNotNeeded, 0));

        let mut report = MergeReport::new("1", 7);
        let outcome = stage(&fakes, false)
            .to_shelve(&branch(), "/main", "c", Some("7"), &mut report)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Failed);
        assert_eq!(
            fakes.repo.attribute("/main/task7", "status").as_deref(),
            Some("merged")
        );
    }

    #[tokio::test]
    async fn test_destination_changes_queue_again_without_marking() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_apply_response(merge_response(MergeToStatus::DestinationChanges, 0));

        let mut report = MergeReport::new("1", 7);
        report.add_merge_succeeded(MergeToStatus::Ok);
        let outcome = stage(&fakes, true)
            .apply_shelve(&branch(), "/main", 31, "c", Some("7"), &mut report)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::QueueAgain);
        assert!(fakes.repo.attribute("/main/task7", "status").is_none());
        assert_eq!(report.entry(MERGE_FAILED).unwrap().text, "destination_changes");
    }

    #[tokio::test]
    async fn test_destination_changes_fail_without_retry_policy() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_apply_response(merge_response(MergeToStatus::DestinationChanges, 0));

        let mut report = MergeReport::new("1", 7);
        let outcome = stage(&fakes, false)
            .apply_shelve(&branch(), "/main", 31, "c", Some("7"), &mut report)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Failed);
        assert_eq!(
            fakes.repo.attribute("/main/task7", "status").as_deref(),
            Some("failed")
        );
    }

    #[tokio::test]
    async fn test_checkin_records_changeset() {
        let fakes = Fakes::new();
        fakes
            .repo
            .set_apply_response(merge_response(MergeToStatus::Ok, 456));

        let mut report = MergeReport::new("1", 7);
        report.add_merge_succeeded(MergeToStatus::Ok);
        let outcome = stage(&fakes, false)
            .apply_shelve(&branch(), "/main", 31, "c", Some("7"), &mut report)
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Succeed { created_id: 456, .. }));
        assert_eq!(report.entry(MERGE_OK).unwrap().value.as_deref(), Some("456"));
    }
}
