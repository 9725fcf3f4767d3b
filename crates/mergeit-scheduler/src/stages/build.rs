//! CI plan executions and the resumable polling protocol.

use mergeit_core::{BuildInProgress, ContinuousIntegration};
use mergeit_db::BuildProgressStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a plan execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    /// Failed or timed out; carries the explanation.
    Failed(String),
    /// Shutdown while waiting. The build record is kept for the next run.
    Cancelled,
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub ci_name: String,
    pub plan: String,
    pub object_spec: String,
    pub comment: String,
}

pub struct BuildStage {
    ci: Arc<dyn ContinuousIntegration>,
    store: Arc<dyn BuildProgressStore>,
    poll_interval: Duration,
    timeout: Duration,
}

impl BuildStage {
    pub fn new(
        ci: Arc<dyn ContinuousIntegration>,
        store: Arc<dyn BuildProgressStore>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            ci,
            store,
            poll_interval,
            timeout,
        }
    }

    /// Launch the plan, persist `record` with the execution id and wait for
    /// the execution to end.
    pub async fn build(
        &self,
        mut record: BuildInProgress,
        request: &PlanRequest,
        properties: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<BuildOutcome> {
        let build_id = self
            .ci
            .launch_plan(
                &request.ci_name,
                &request.plan,
                &request.object_spec,
                &request.comment,
                properties,
            )
            .await?;

        info!(plan = %request.plan, build_id = %build_id, spec = %request.object_spec, "Plan launched");
        record.build_id = build_id;
        self.save(&record);

        self.wait(record, request, cancel).await
    }

    /// Poll an already launched execution until it ends.
    pub async fn wait(
        &self,
        mut record: BuildInProgress,
        request: &PlanRequest,
        cancel: &CancellationToken,
    ) -> mergeit_core::Result<BuildOutcome> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if cancel.is_cancelled() {
                info!(build_id = %record.build_id, "Stopped waiting for build");
                return Ok(BuildOutcome::Cancelled);
            }

            let status = self
                .ci
                .get_plan_status(&request.ci_name, &request.plan, &record.build_id)
                .await?;

            if let Some(translated) = status
                .translated_build_id
                .filter(|id| !id.is_empty() && *id != record.build_id)
            {
                debug!(from = %record.build_id, to = %translated, "Build id translated");
                record.build_id = translated;
                self.save(&record);
            }

            if status.finished {
                self.delete();
                let outcome = if status.succeeded {
                    BuildOutcome::Succeeded
                } else {
                    BuildOutcome::Failed(status.explanation)
                };
                return Ok(outcome);
            }

            if Instant::now() >= deadline {
                self.delete();
                return Ok(BuildOutcome::Failed(format!(
                    "{} reached the time limit to get the status for plan:'{}' and executionId:'{}'\nRequest details: objectSpec:'{}' and comment:'{}'",
                    request.ci_name,
                    request.plan,
                    record.build_id,
                    request.object_spec,
                    request.comment
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(build_id = %record.build_id, "Stopped waiting for build");
                    return Ok(BuildOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Forget the persisted build. Used when the pipeline gives up on it.
    pub fn discard(&self) {
        self.delete();
    }

    fn save(&self, record: &BuildInProgress) {
        if let Err(e) = self.store.save(record) {
            warn!(error = %e, build_id = %record.build_id, "Failed to persist build in progress");
        }
    }

    fn delete(&self) {
        if let Err(e) = self.store.delete() {
            warn!(error = %e, "Failed to delete build in progress");
        }
    }
}
