//! Merge reports: the audit trail of one pipeline run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::vcs::MergeToStatus;

pub const BUILD_FAILED: &str = "build_failed";
pub const BUILD_OK: &str = "build_ok";
pub const MERGE_FAILED: &str = "merge_failed";
pub const MERGE_OK: &str = "merge_ok";
pub const LABEL_FAILED: &str = "label_failed";
pub const LABEL_OK: &str = "label_ok";
pub const ISSUE_TRACKER: &str = "issuetracker";
pub const NUMBER: &str = "number";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub text: String,
    pub link: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Option<String>,
}

impl ReportEntry {
    fn new(kind: &str, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// One report per branch per pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub timestamp: DateTime<Utc>,
    pub repository_id: String,
    pub branch_id: i64,
    #[serde(rename = "properties")]
    pub entries: Vec<ReportEntry>,
}

impl MergeReport {
    pub fn new(repository_id: impl Into<String>, branch_id: i64) -> Self {
        Self {
            timestamp: Utc::now(),
            repository_id: repository_id.into(),
            branch_id,
            entries: Vec::new(),
        }
    }

    pub fn add_issue(&mut self, title: impl Into<String>, link: impl Into<String>) {
        let mut entry = ReportEntry::new(ISSUE_TRACKER, title);
        entry.link = Some(link.into());
        self.entries.push(entry);
    }

    pub fn add_merge_succeeded(&mut self, status: MergeToStatus) {
        self.entries
            .push(ReportEntry::new(MERGE_OK, status.to_string()));
    }

    pub fn add_merge_failed(&mut self, status: MergeToStatus, message: impl Into<String>) {
        self.entries
            .push(ReportEntry::new(MERGE_FAILED, status.to_string()).with_value(message));
    }

    /// Record the checkin result on the earlier `merge_ok` entry. A checkin
    /// that produced no changeset flips the entry to `merge_failed`.
    pub fn update_merge(&mut self, status: MergeToStatus, changeset_id: Option<i64>) {
        let Some(entry) = self.find_mut(MERGE_OK) else {
            return;
        };

        match changeset_id {
            Some(id) => entry.value = Some(id.to_string()),
            None => {
                entry.text = status.to_string();
                entry.kind = MERGE_FAILED.to_string();
            }
        }
    }

    pub fn add_build_succeeded(&mut self, plan: &str) {
        self.entries
            .push(ReportEntry::new(BUILD_OK, format!("build ok (plan: {})", plan)));
    }

    pub fn add_build_failed(&mut self, plan: &str, explanation: impl Into<String>) {
        self.entries.push(
            ReportEntry::new(BUILD_FAILED, format!("build ko (plan: {})", plan))
                .with_value(explanation),
        );
    }

    pub fn add_build_time(&mut self, elapsed: Duration) {
        let minutes = (elapsed.as_secs_f64() / 60.0 * 100.0).round() / 100.0;
        self.entries
            .push(ReportEntry::new(NUMBER, "build time (min)").with_value(minutes.to_string()));
    }

    pub fn add_label(&mut self, succeeded: bool, name: &str, message: impl Into<String>) {
        let (kind, verdict) = if succeeded {
            (LABEL_OK, "ok")
        } else {
            (LABEL_FAILED, "ko")
        };
        self.entries.push(
            ReportEntry::new(kind, format!("label {} ({})", verdict, name)).with_value(message),
        );
    }

    /// Annotate the report with an unexpected error, reusing an existing
    /// `build_failed` entry when there is one.
    pub fn set_unexpected_error(&mut self, message: impl Into<String>) {
        let text = "build ko (unexpected exception)";
        let message = message.into();

        match self.find_mut(BUILD_FAILED) {
            Some(entry) => {
                entry.text = text.to_string();
                entry.value = Some(message);
            }
            None => self
                .entries
                .push(ReportEntry::new(BUILD_FAILED, text).with_value(message)),
        }
    }

    pub fn has_entry(&self, kind: &str) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    pub fn entry(&self, kind: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    fn find_mut(&mut self, kind: &str) -> Option<&mut ReportEntry> {
        self.entries.iter_mut().find(|e| e.kind == kind)
    }
}

/// Where finished merge reports are uploaded.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn report(&self, bot_name: &str, report: &MergeReport) -> Result<()>;
}
