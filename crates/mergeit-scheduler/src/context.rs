//! Collaborators shared by every stage of the pipeline.

use mergeit_core::{
    ContinuousIntegration, IssueTracker, Notifier, ReportSink, RepositoryOps, UserProfiles,
};
use std::sync::Arc;

/// Handles to the external systems the bot talks to.
#[derive(Clone)]
pub struct Services {
    pub repo: Arc<dyn RepositoryOps>,
    pub issues: Arc<dyn IssueTracker>,
    pub notifier: Arc<dyn Notifier>,
    pub profiles: Arc<dyn UserProfiles>,
    pub ci: Arc<dyn ContinuousIntegration>,
    pub reports: Arc<dyn ReportSink>,
}
