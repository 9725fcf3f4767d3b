//! Branch pipeline - drives one branch from readiness check to trunk.
//!
//! The stages run in a fixed order:
//!
//! 1. readiness (task number, code reviews, issue tracker status)
//! 2. merge allowed check
//! 3. merge to shelve
//! 4. pre-checkin build of the shelve
//! 5. shelve checkin to trunk
//! 6. task marked as merged
//! 7. automatic label (when enabled)
//! 8. after-checkin build (when a plan is configured)
//!
//! Every run that reaches a terminal outcome uploads its merge report and
//! deletes the shelves it created. A cancelled run does neither: the
//! persisted build record lets the next start pick it up again. Shelves are
//! also deleted once the checkin returns, and the after-checkin record
//! carries the report so far.

use chrono::{DateTime, Utc};
use mergeit_config::BotConfig;
use mergeit_core::branch::short_name;
use mergeit_core::ci::{STAGE_POST_CHECKIN, STAGE_PRE_CHECKIN};
use mergeit_core::review::all_reviewed;
use mergeit_core::{
    Branch, BuildInProgress, BuildProperties, BuildStep, Error, MergeReport, MergeToStatus,
    XlinkChangeset,
};
use mergeit_db::{BuildProgressStore, ReviewStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::Services;
use crate::notify::TaskNotifier;
use crate::stages::{
    BuildOutcome, BuildStage, LabelResult, LabelStage, MergeOutcome, MergeStage, PlanRequest,
};
use crate::status::TaskStatus;

/// How processing a branch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Ok,
    Failed,
    /// A gate was not satisfied; try again later.
    NotReady,
    /// Trunk moved under the shelve; retry first thing.
    QueueAgain,
    /// Shutdown while a build was running.
    Cancelled,
}

/// Bookkeeping of one run, settled once the outcome is known.
#[derive(Default)]
struct Run {
    report: Option<MergeReport>,
    shelves: Vec<XlinkChangeset>,
}

fn track_shelves(
    shelves: &mut Vec<XlinkChangeset>,
    repository: &str,
    shelve_id: i64,
    xlinks: &[XlinkChangeset],
) {
    shelves.push(XlinkChangeset {
        repository: repository.to_string(),
        changeset_id: shelve_id,
    });
    shelves.extend(xlinks.iter().cloned());
}

pub struct BranchPipeline {
    bot_name: String,
    config: Arc<BotConfig>,
    services: Services,
    reviews: Arc<ReviewStore>,
    notifier: TaskNotifier,
    status: TaskStatus,
    merge: MergeStage,
    build: BuildStage,
    label: LabelStage,
}

impl BranchPipeline {
    pub fn new(
        bot_name: impl Into<String>,
        config: Arc<BotConfig>,
        services: Services,
        reviews: Arc<ReviewStore>,
        build_store: Arc<dyn BuildProgressStore>,
    ) -> Self {
        let notifier = TaskNotifier::new(
            services.notifier.clone(),
            services.profiles.clone(),
            config.notifier.clone(),
        );
        let status = TaskStatus::new(
            config.clone(),
            services.repo.clone(),
            services.issues.clone(),
            reviews.clone(),
            notifier.clone(),
        );
        let merge = MergeStage::new(
            services.repo.clone(),
            status.clone(),
            config.queue_again_on_fail,
        );
        let build = BuildStage::new(
            services.ci.clone(),
            build_store,
            config.timing.build_poll_interval,
            config.timing.build_timeout,
        );
        let label = LabelStage::new(services.repo.clone());

        Self {
            bot_name: bot_name.into(),
            config,
            services,
            reviews,
            notifier,
            status,
            merge,
            build,
            label,
        }
    }

    /// Run the whole pipeline for `branch`.
    pub async fn process(&self, branch: &Branch, cancel: &CancellationToken) -> PipelineOutcome {
        info!(branch = %branch.full_name, "Getting task number");
        let Some(task) = task_number(&branch.full_name, self.config.branch_prefix()) else {
            info!(branch = %branch.full_name, prefix = %self.config.branch_prefix(), "Branch name does not match the task prefix");
            return PipelineOutcome::NotReady;
        };

        let mut run = Run::default();
        let result = self.run(branch, &task, &mut run, cancel).await;
        self.settle(branch, &task, run, result).await
    }

    /// Pick up a build that was in flight when the process stopped.
    ///
    /// Returns the branch with the outcome, or `None` when the branch could
    /// not be found. A record whose branch no longer exists is discarded.
    pub async fn resume(
        &self,
        record: BuildInProgress,
        cancel: &CancellationToken,
    ) -> Option<(Branch, PipelineOutcome)> {
        info!(
            branch = %record.branch_name,
            build_id = %record.build_id,
            stage = ?record.stage,
            "Resuming build in progress"
        );

        let info = match self
            .services
            .repo
            .get_branch(&record.repository, &record.branch_name)
            .await
        {
            Ok(Some(info)) => info,
            Ok(None) => {
                warn!(branch = %record.branch_name, "Branch of the build in progress no longer exists; discarding it");
                self.build.discard();
                return None;
            }
            Err(e) => {
                error!(branch = %record.branch_name, error = %e, "Unable to look up the branch of the build in progress");
                return None;
            }
        };

        let branch = info.branch;
        let task = task_number(&branch.full_name, self.config.branch_prefix())
            .unwrap_or_else(|| branch.short_name().to_string());

        let report = record
            .report
            .clone()
            .unwrap_or_else(|| MergeReport::new(info.repository_id, branch.id));
        let mut run = Run {
            report: Some(report),
            ..Default::default()
        };

        let result = match record.stage {
            BuildStep::Build => {
                track_shelves(
                    &mut run.shelves,
                    &branch.repository,
                    record.cset_or_shelve_id,
                    &record.xlink_shelves,
                );
                self.resume_pre_checkin(&branch, &task, record, &mut run, cancel)
                    .await
            }
            BuildStep::AfterCheckinBuild => {
                self.resume_after_checkin(&branch, record, &mut run, cancel)
                    .await
            }
        };

        let outcome = self.settle(&branch, &task, run, result).await;
        Some((branch, outcome))
    }

    async fn run(
        &self,
        branch: &Branch,
        task: &str,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<PipelineOutcome> {
        if !self.is_ready(branch, task).await? {
            return Ok(PipelineOutcome::NotReady);
        }

        let repo = &self.services.repo;
        let trunk = &self.config.trunk_branch;

        if !repo
            .is_merge_allowed(&branch.repository, &branch.full_name, trunk)
            .await?
        {
            info!(branch = %branch.full_name, trunk = %trunk, "Merge is not allowed yet");
            return Ok(PipelineOutcome::NotReady);
        }

        info!(task = %task, "Building the merge report");
        let info = repo
            .get_branch(&branch.repository, &branch.full_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("branch {}", branch.full_name)))?;
        let report = run
            .report
            .insert(MergeReport::new(info.repository_id, branch.id));

        let title = self.issue_info(task, report).await?;
        let comment = merge_comment(&self.bot_name, &branch.full_name, title.as_deref());

        info!(branch = %branch.full_name, trunk = %trunk, "Trying shelve server-side merge");
        let (shelve_id, xlinks) = match self
            .merge
            .to_shelve(branch, trunk, &comment, Some(task), report)
            .await?
        {
            MergeOutcome::Succeed { created_id, xlinks } => (created_id, xlinks),
            MergeOutcome::Failed => return Ok(PipelineOutcome::Failed),
            MergeOutcome::QueueAgain => return Ok(PipelineOutcome::QueueAgain),
        };
        track_shelves(&mut run.shelves, &branch.repository, shelve_id, &xlinks);

        info!(branch = %branch.full_name, shelve = shelve_id, "Testing branch");
        match self
            .pre_checkin_build(branch, task, shelve_id, xlinks, report, cancel)
            .await?
        {
            BuildOutcome::Succeeded => {}
            BuildOutcome::Failed(_) => return Ok(PipelineOutcome::Failed),
            BuildOutcome::Cancelled => return Ok(PipelineOutcome::Cancelled),
        }

        self.checkin(
            branch,
            task,
            shelve_id,
            &comment,
            report,
            &mut run.shelves,
            cancel,
        )
        .await
    }

    async fn resume_pre_checkin(
        &self,
        branch: &Branch,
        task: &str,
        record: BuildInProgress,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<PipelineOutcome> {
        let report = run
            .report
            .get_or_insert_with(|| MergeReport::new(branch.repository.clone(), branch.id));

        let title = self.issue_info(task, report).await?;
        let comment = merge_comment(&self.bot_name, &branch.full_name, title.as_deref());
        report.add_merge_succeeded(MergeToStatus::Ok);

        let shelve_id = record.cset_or_shelve_id;
        let started = record.start_time;
        let request = self.pre_checkin_request(branch, shelve_id);
        let outcome = self.build.wait(record, &request, cancel).await?;

        match self
            .record_pre_checkin(branch, task, outcome, elapsed_since(started), report)
            .await
        {
            BuildOutcome::Succeeded => {}
            BuildOutcome::Failed(_) => return Ok(PipelineOutcome::Failed),
            BuildOutcome::Cancelled => return Ok(PipelineOutcome::Cancelled),
        }

        self.checkin(
            branch,
            task,
            shelve_id,
            &comment,
            report,
            &mut run.shelves,
            cancel,
        )
        .await
    }

    async fn resume_after_checkin(
        &self,
        branch: &Branch,
        record: BuildInProgress,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<PipelineOutcome> {
        let Some(plan) = self.after_checkin_plan() else {
            warn!(branch = %branch.full_name, "No after-checkin plan configured anymore; discarding build in progress");
            self.build.discard();
            return Ok(PipelineOutcome::Failed);
        };

        let report = run
            .report
            .get_or_insert_with(|| MergeReport::new(branch.repository.clone(), branch.id));

        let started = record.start_time;
        let request = self.after_checkin_request(branch, record.cset_or_shelve_id, plan);
        let outcome = self.build.wait(record, &request, cancel).await?;

        Ok(self
            .record_after_checkin(branch, plan, outcome, elapsed_since(started), report)
            .await)
    }

    /// Everything after a green pre-checkin build. The shelves are gone
    /// once the checkin attempt returns, whatever its result.
    #[allow(clippy::too_many_arguments)]
    async fn checkin(
        &self,
        branch: &Branch,
        task: &str,
        shelve_id: i64,
        comment: &str,
        report: &mut MergeReport,
        shelves: &mut Vec<XlinkChangeset>,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<PipelineOutcome> {
        let trunk = &self.config.trunk_branch;

        info!(shelve = shelve_id, branch = %branch.full_name, trunk = %trunk, "Checking in shelved merge");
        let applied = self
            .merge
            .apply_shelve(branch, trunk, shelve_id, comment, Some(task), report)
            .await;
        self.delete_shelves(shelves).await;

        let changeset = match applied? {
            MergeOutcome::Succeed { created_id, .. } => created_id,
            MergeOutcome::Failed => return Ok(PipelineOutcome::Failed),
            MergeOutcome::QueueAgain => return Ok(PipelineOutcome::QueueAgain),
        };
        info!(changeset = changeset, trunk = %trunk, "Checkin created changeset");

        self.status
            .set_merged(
                branch,
                Some(task),
                &format!(
                    "Branch {} was correctly merged to {}.",
                    branch.full_name, trunk
                ),
            )
            .await;

        let label = match self.create_label(branch, changeset, report).await {
            None => String::new(),
            Some(result) if result.succeeded => result.name,
            Some(_) => return Ok(PipelineOutcome::Failed),
        };

        self.after_checkin_build(branch, task, changeset, &label, report, cancel)
            .await
    }

    async fn is_ready(&self, branch: &Branch, task: &str) -> mergeit_core::Result<bool> {
        if self.config.vcs.code_review_enabled
            && !all_reviewed(&self.reviews.get(&branch.repository, branch.id))
        {
            info!(branch = %branch.full_name, "Branch has code reviews pending approval");
            return Ok(false);
        }

        let Some(issues) = &self.config.issues else {
            return Ok(true);
        };

        info!(plug = %issues.plug, "Checking if issue tracker is available");
        if !self.services.issues.is_connected(&issues.plug).await? {
            warn!(plug = %issues.plug, "Issue tracker is not available");
            return Ok(false);
        }

        let status = self
            .services
            .issues
            .get_issue_field(&issues.plug, &issues.project_key, task, &issues.status_field.name)
            .await?;
        debug!(
            task = %task,
            expected = %issues.status_field.resolved_value,
            actual = %status,
            "Issue tracker status"
        );
        Ok(status == issues.status_field.resolved_value)
    }

    /// Add the issue to the report and return its title.
    async fn issue_info(
        &self,
        task: &str,
        report: &mut MergeReport,
    ) -> mergeit_core::Result<Option<String>> {
        let Some(issues) = &self.config.issues else {
            return Ok(None);
        };

        let title = self
            .services
            .issues
            .get_issue_field(&issues.plug, &issues.project_key, task, &issues.title_field)
            .await?;
        let url = self
            .services
            .issues
            .get_issue_url(&issues.plug, &issues.project_key, task)
            .await?;

        report.add_issue(title.clone(), url);
        Ok(Some(title))
    }

    async fn pre_checkin_build(
        &self,
        branch: &Branch,
        task: &str,
        shelve_id: i64,
        xlinks: Vec<XlinkChangeset>,
        report: &mut MergeReport,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<BuildOutcome> {
        self.status
            .set_testing(
                branch,
                Some(task),
                &format!("Starting to test branch {}.", branch.full_name),
            )
            .await;

        let request = self.pre_checkin_request(branch, shelve_id);
        let properties = self
            .build_properties(
                branch,
                task,
                "",
                STAGE_PRE_CHECKIN,
                &self.config.ci.forward_attributes,
            )
            .await?;

        let record = BuildInProgress::new(
            branch.repository.clone(),
            branch.full_name.clone(),
            shelve_id,
            xlinks,
            BuildStep::Build,
        );
        let started = record.start_time;
        let outcome = self
            .build
            .build(record, &request, &properties.to_map(), cancel)
            .await?;

        Ok(self
            .record_pre_checkin(branch, task, outcome, elapsed_since(started), report)
            .await)
    }

    async fn record_pre_checkin(
        &self,
        branch: &Branch,
        task: &str,
        outcome: BuildOutcome,
        elapsed: Duration,
        report: &mut MergeReport,
    ) -> BuildOutcome {
        if outcome == BuildOutcome::Cancelled {
            return outcome;
        }

        let plan = &self.config.ci.plan;
        report.add_build_time(elapsed);

        match &outcome {
            BuildOutcome::Succeeded => report.add_build_succeeded(plan),
            BuildOutcome::Failed(explanation) => {
                report.add_build_failed(plan, explanation.clone());
                self.status
                    .set_failed(
                        branch,
                        Some(task),
                        &format!(
                            "Branch {} build failed. \nReason: {}",
                            branch.full_name, explanation
                        ),
                    )
                    .await;
            }
            BuildOutcome::Cancelled => {}
        }
        outcome
    }

    async fn after_checkin_build(
        &self,
        branch: &Branch,
        task: &str,
        changeset: i64,
        label: &str,
        report: &mut MergeReport,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<PipelineOutcome> {
        let Some(plan) = self.after_checkin_plan() else {
            return Ok(PipelineOutcome::Ok);
        };

        let request = self.after_checkin_request(branch, changeset, plan);
        let properties = self
            .build_properties(
                branch,
                task,
                label,
                STAGE_POST_CHECKIN,
                &self.config.ci.forward_attributes_after_checkin,
            )
            .await?;

        let record = BuildInProgress::new(
            branch.repository.clone(),
            branch.full_name.clone(),
            changeset,
            Vec::new(),
            BuildStep::AfterCheckinBuild,
        )
        .with_report(report.clone());
        let started = record.start_time;
        let outcome = self
            .build
            .build(record, &request, &properties.to_map(), cancel)
            .await?;

        Ok(self
            .record_after_checkin(branch, plan, outcome, elapsed_since(started), report)
            .await)
    }

    async fn record_after_checkin(
        &self,
        branch: &Branch,
        plan: &str,
        outcome: BuildOutcome,
        elapsed: Duration,
        report: &mut MergeReport,
    ) -> PipelineOutcome {
        if outcome == BuildOutcome::Cancelled {
            return PipelineOutcome::Cancelled;
        }

        report.add_build_time(elapsed);

        let (message, result) = match outcome {
            BuildOutcome::Failed(explanation) => {
                report.add_build_failed(plan, explanation.clone());
                (
                    format!(
                        "Plan execution failed after merging branch {}.\nReason: {}",
                        branch.full_name, explanation
                    ),
                    PipelineOutcome::Failed,
                )
            }
            _ => {
                report.add_build_succeeded(plan);
                (
                    format!(
                        "Plan execution after merging branch {} was successful.",
                        branch.full_name
                    ),
                    PipelineOutcome::Ok,
                )
            }
        };

        self.notifier
            .notify_task_status(&branch.owner, &message)
            .await;
        result
    }

    /// `None` when automatic labels are off.
    async fn create_label(
        &self,
        branch: &Branch,
        changeset: i64,
        report: &mut MergeReport,
    ) -> Option<LabelResult> {
        if !self.config.vcs.is_auto_label_enabled() {
            return None;
        }

        let repository = &branch.repository;
        let result = match self
            .label
            .create(repository, changeset, &self.config.vcs.label_pattern, Utc::now())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(
                    branch = %branch.full_name,
                    changeset = changeset,
                    error = %e,
                    "An error occurred labeling the merged branch"
                );
                LabelResult {
                    succeeded: false,
                    name: String::new(),
                    error: e.to_string(),
                }
            }
        };

        report.add_label(result.succeeded, &result.name, result.error.clone());

        let trunk = &self.config.trunk_branch;
        let message = if result.succeeded {
            format!(
                "Label {} created successfully in {} branch, changeset cs:{}@{}",
                result.name, trunk, changeset, repository
            )
        } else {
            format!(
                "Failed to create label after merging branch {} in {} branch, changeset cs:{}@{}. Error: {}",
                branch.full_name, trunk, changeset, repository, result.error
            )
        };
        self.notifier
            .notify_task_status(&branch.owner, &message)
            .await;

        Some(result)
    }

    async fn build_properties(
        &self,
        branch: &Branch,
        task: &str,
        label: &str,
        stage: &str,
        forward: &[String],
    ) -> mergeit_core::Result<BuildProperties> {
        let repo = &self.services.repo;
        let repository = &branch.repository;

        let branch_info = repo
            .get_branch(repository, &branch.full_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("branch {}", branch.full_name)))?;
        let branch_head = repo
            .get_changeset(repository, branch_info.head_changeset)
            .await?;

        let trunk_info = repo
            .get_branch(repository, &self.config.trunk_branch)
            .await?
            .ok_or_else(|| Error::NotFound(format!("branch {}", self.config.trunk_branch)))?;
        let trunk_head = repo
            .get_changeset(repository, trunk_info.head_changeset)
            .await?;

        let mut user_attributes = BTreeMap::new();
        for name in forward {
            if let Some(value) = repo
                .get_branch_attribute(repository, &branch.full_name, name)
                .await?
            {
                user_attributes.insert(name.clone(), value);
            }
        }

        Ok(BuildProperties {
            task_number: task.to_string(),
            branch_name: branch.full_name.clone(),
            branch_head: branch_head.id.to_string(),
            branch_head_guid: branch_head.guid,
            branch_head_author: branch_head.owner,
            trunk_head: trunk_head.id.to_string(),
            trunk_head_guid: trunk_head.guid,
            repspec: self.repspec(branch),
            label: label.to_string(),
            stage: stage.to_string(),
            user_attributes,
            ..Default::default()
        })
    }

    fn repspec(&self, branch: &Branch) -> String {
        format!("{}@{}", branch.repository, self.config.server)
    }

    fn pre_checkin_request(&self, branch: &Branch, shelve_id: i64) -> PlanRequest {
        PlanRequest {
            ci_name: self.config.ci.plug.clone(),
            plan: self.config.ci.plan.clone(),
            object_spec: format!("sh:{}@{}", shelve_id, self.repspec(branch)),
            comment: format!("Building branch {}", branch.full_name),
        }
    }

    fn after_checkin_request(&self, branch: &Branch, changeset: i64, plan: &str) -> PlanRequest {
        PlanRequest {
            ci_name: self.config.ci.plug.clone(),
            plan: plan.to_string(),
            object_spec: format!("cs:{}@{}", changeset, self.repspec(branch)),
            comment: format!("Running plan after merging branch {}", branch.full_name),
        }
    }

    fn after_checkin_plan(&self) -> Option<&str> {
        self.config
            .ci
            .plan_after_checkin
            .as_deref()
            .filter(|plan| !plan.is_empty())
    }

    /// Fold errors into a failure, then upload the report and drop the
    /// shelves unless the run was cancelled.
    async fn settle(
        &self,
        branch: &Branch,
        task: &str,
        mut run: Run,
        result: mergeit_core::Result<PipelineOutcome>,
    ) -> PipelineOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    task = %task,
                    branch = %branch.full_name,
                    error = %e,
                    "The attempt to process task failed"
                );
                self.build.discard();
                self.status
                    .set_failed(
                        branch,
                        Some(task),
                        &format!(
                            "Can't process branch {} because of an unexpected error: {}.",
                            branch.full_name, e
                        ),
                    )
                    .await;
                if let Some(report) = run.report.as_mut() {
                    report.set_unexpected_error(e.to_string());
                }
                PipelineOutcome::Failed
            }
        };

        if outcome == PipelineOutcome::Cancelled {
            return outcome;
        }

        if let Some(report) = &run.report {
            if let Err(e) = self.services.reports.report(&self.bot_name, report).await {
                error!(
                    branch = %branch.full_name,
                    repository = %branch.repository,
                    error = %e,
                    "Unable to report merge"
                );
            }
        }

        self.delete_shelves(&mut run.shelves).await;
        outcome
    }

    async fn delete_shelves(&self, shelves: &mut Vec<XlinkChangeset>) {
        for shelve in shelves.drain(..) {
            if let Err(e) = self
                .services
                .repo
                .delete_shelve(&shelve.repository, shelve.changeset_id)
                .await
            {
                error!(
                    shelve = shelve.changeset_id,
                    repository = %shelve.repository,
                    error = %e,
                    "Unable to delete shelve"
                );
            }
        }
    }
}

/// Task number of a branch: its last path segment without the prefix.
/// `None` when the segment does not start with the prefix.
pub fn task_number(full_name: &str, prefix: &str) -> Option<String> {
    let name = short_name(full_name);
    if prefix.is_empty() {
        return Some(name.to_string());
    }

    let head = name.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(name[prefix.len()..].to_string())
}

pub fn merge_comment(bot_name: &str, branch: &str, title: Option<&str>) -> String {
    match title {
        Some(title) if !title.is_empty() => format!("{}: merged {} : {}", bot_name, branch, title),
        _ => format!("{}: merged {}", bot_name, branch),
    }
}

fn elapsed_since(start: DateTime<Utc>) -> Duration {
    (Utc::now() - start).to_std().unwrap_or_default()
}
