//! Issue tracker capability.

use async_trait::async_trait;

use crate::error::Result;

/// An issue tracker reached through a named plug.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn is_connected(&self, plug: &str) -> Result<bool>;

    async fn get_issue_url(&self, plug: &str, project_key: &str, task: &str) -> Result<String>;

    async fn get_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String>;

    async fn set_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()>;
}
