//! Continuous integration plans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::report::MergeReport;
use crate::vcs::XlinkChangeset;

/// Status of a plan execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStatus {
    pub finished: bool,
    pub succeeded: bool,
    pub explanation: String,
    /// Some CI backends hand out a queue ticket first and the real build id
    /// later. When set, the execution should be tracked under this id.
    pub translated_build_id: Option<String>,
}

#[async_trait]
pub trait ContinuousIntegration: Send + Sync {
    /// Launch `plan` switched to `object_spec`; returns the execution id.
    async fn launch_plan(
        &self,
        ci_name: &str,
        plan: &str,
        object_spec: &str,
        comment: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String>;

    async fn get_plan_status(&self, ci_name: &str, plan: &str, build_id: &str)
        -> Result<PlanStatus>;
}

/// Which build of the pipeline is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    /// Pre-checkin build of the merge shelve.
    Build,
    /// Build of the changeset created on trunk.
    AfterCheckinBuild,
}

/// The build currently running, persisted so a restart resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInProgress {
    pub repository: String,
    pub branch_name: String,
    /// Shelve id for [`BuildStep::Build`], trunk changeset for
    /// [`BuildStep::AfterCheckinBuild`].
    pub cset_or_shelve_id: i64,
    #[serde(default)]
    pub xlink_shelves: Vec<XlinkChangeset>,
    pub stage: BuildStep,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub build_id: String,
    /// Report of the run that checked the branch in, finished by whoever
    /// completes the after-checkin build.
    #[serde(default)]
    pub report: Option<MergeReport>,
}

impl BuildInProgress {
    pub fn new(
        repository: impl Into<String>,
        branch_name: impl Into<String>,
        cset_or_shelve_id: i64,
        xlink_shelves: Vec<XlinkChangeset>,
        stage: BuildStep,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch_name: branch_name.into(),
            cset_or_shelve_id,
            xlink_shelves,
            stage,
            start_time: Utc::now(),
            build_id: String::new(),
            report: None,
        }
    }

    pub fn with_report(mut self, report: MergeReport) -> Self {
        self.report = Some(report);
        self
    }
}

pub const STAGE_PRE_CHECKIN: &str = "pre";
pub const STAGE_POST_CHECKIN: &str = "post";

/// Properties forwarded to a plan execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildProperties {
    pub build_number: String,
    pub build_name: String,
    pub task_number: String,
    pub branch_name: String,
    pub branch_head: String,
    pub branch_head_guid: String,
    pub branch_head_author: String,
    pub trunk_head: String,
    pub trunk_head_guid: String,
    pub release_notes: String,
    pub repspec: String,
    pub label: String,
    pub stage: String,
    /// Branch attributes the user asked to forward. They never replace a
    /// built-in key.
    pub user_attributes: BTreeMap<String, String>,
}

impl BuildProperties {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = [
            ("build.number", &self.build_number),
            ("build.name", &self.build_name),
            ("task.number", &self.task_number),
            ("branch.name", &self.branch_name),
            ("branch.head.changeset.number", &self.branch_head),
            ("branch.head.changeset.guid", &self.branch_head_guid),
            ("branch.head.changeset.author", &self.branch_head_author),
            ("trunk.head.changeset.number", &self.trunk_head),
            ("trunk.head.changeset.guid", &self.trunk_head_guid),
            ("release.notes", &self.release_notes),
            ("repspec", &self.repspec),
            ("label", &self.label),
            ("stage", &self.stage),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

        for (key, value) in &self.user_attributes {
            if map.contains_key(key) {
                tracing::warn!(
                    key = %key,
                    original = %map[key],
                    user_value = %value,
                    "Ignoring branch attribute that would override a built-in build property"
                );
                continue;
            }
            map.insert(key.clone(), value.clone());
        }

        map
    }
}
