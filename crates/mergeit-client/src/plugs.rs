//! Issue tracker, notifier, CI, user profile and merge report endpoints.

use async_trait::async_trait;
use mergeit_core::{
    ContinuousIntegration, IssueTracker, MergeReport, Notifier, PlanStatus, ReportSink, Result,
    UserProfiles,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, warn};

use crate::error::ClientResult;
use crate::repository::SingleResponse;
use crate::rest::{RestApi, endpoint, parse_bool};

const ISSUE_IS_CONNECTED: &str = "/api/v1/issues/{}/checkconnection";
const ISSUE_URL: &str = "/api/v1/issues/{}/{}/{}";
const ISSUE_FIELD: &str = "/api/v1/issues/{}/{}/{}/{}";
const NOTIFY_MESSAGE: &str = "/api/v1/notify/{}";
const CI_LAUNCH_PLAN: &str = "/api/v1/ci/{}/{}";
const CI_PLAN_STATUS: &str = "/api/v1/ci/{}/{}/plan/{}";
const CI_LEGACY_PLAN_STATUS: &str = "/api/v1/ci/{}/{}/{}";
const USER_PROFILE: &str = "/api/v1/users/{}/profile";
const MERGE_REPORT: &str = "/api/v1/mergereports/{}";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetIssueFieldRequest<'a> {
    new_value: &'a str,
}

#[derive(Debug, Serialize)]
struct NotifyMessageRequest<'a> {
    message: &'a str,
    recipients: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchPlanRequest<'a> {
    object_spec: &'a str,
    comment: String,
    properties: &'a BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PlanStatusModel {
    is_finished: bool,
    succeeded: bool,
    explanation: Option<String>,
    translated_build_id: Option<String>,
}

impl From<PlanStatusModel> for PlanStatus {
    fn from(model: PlanStatusModel) -> Self {
        PlanStatus {
            finished: model.is_finished,
            succeeded: model.succeeded,
            explanation: model.explanation.unwrap_or_default(),
            translated_build_id: model.translated_build_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

impl RestApi {
    async fn plan_status(
        &self,
        ci_name: &str,
        plan: &str,
        build_id: &str,
    ) -> ClientResult<PlanStatusModel> {
        let path = endpoint(CI_PLAN_STATUS, &[ci_name, build_id, plan]);
        let err = match self.get(&path, "retrieve CI plan status").await {
            Ok(status) => return Ok(status),
            Err(e) => e,
        };

        warn!(endpoint = %path, error = %err, "Plan status query failed");
        if !err.is_not_found() {
            return Err(err);
        }

        if plan.contains('/') {
            error!(
                plan = %plan,
                "The server does not support querying the build status of a plan path \
                 (plan name with slashes). Please upgrade the server"
            );
            return Err(err);
        }

        let legacy = endpoint(CI_LEGACY_PLAN_STATUS, &[ci_name, plan, build_id]);
        warn!(endpoint = %legacy, "Falling back to the legacy plan status endpoint");
        self.get(&legacy, "retrieve CI plan status - deprecated")
            .await
    }
}

#[async_trait]
impl IssueTracker for RestApi {
    async fn is_connected(&self, plug: &str) -> Result<bool> {
        let response: SingleResponse = self
            .get(
                &endpoint(ISSUE_IS_CONNECTED, &[plug]),
                "test connection to the issue tracker",
            )
            .await?;
        Ok(parse_bool(&response.value))
    }

    async fn get_issue_url(&self, plug: &str, project_key: &str, task: &str) -> Result<String> {
        let response: SingleResponse = self
            .get(
                &endpoint(ISSUE_URL, &[plug, project_key, task]),
                "get issue url",
            )
            .await?;
        Ok(response.value)
    }

    async fn get_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String> {
        let response: SingleResponse = self
            .get(
                &endpoint(ISSUE_FIELD, &[plug, project_key, task, field]),
                "get issue field",
            )
            .await?;
        Ok(response.value)
    }

    async fn set_issue_field(
        &self,
        plug: &str,
        project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()> {
        let _: SingleResponse = self
            .send_json(
                Method::PUT,
                &endpoint(ISSUE_FIELD, &[plug, project_key, task, field]),
                &SetIssueFieldRequest { new_value: value },
                "set issue field",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for RestApi {
    async fn notify(&self, plug: &str, message: &str, recipients: &[String]) -> Result<()> {
        let request = NotifyMessageRequest {
            message,
            recipients,
        };
        self.execute(
            Method::POST,
            &endpoint(NOTIFY_MESSAGE, &[plug]),
            Some(&request),
            "send notification",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ContinuousIntegration for RestApi {
    async fn launch_plan(
        &self,
        ci_name: &str,
        plan: &str,
        object_spec: &str,
        comment: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String> {
        let request = LaunchPlanRequest {
            object_spec,
            comment: format!("MergeBot - {}", comment),
            properties,
        };
        let response: SingleResponse = self
            .send_json(
                Method::POST,
                &endpoint(CI_LAUNCH_PLAN, &[ci_name, plan]),
                &request,
                "launch CI plan",
            )
            .await?;
        Ok(response.value)
    }

    async fn get_plan_status(
        &self,
        ci_name: &str,
        plan: &str,
        build_id: &str,
    ) -> Result<PlanStatus> {
        Ok(self.plan_status(ci_name, plan, build_id).await?.into())
    }
}

#[async_trait]
impl UserProfiles for RestApi {
    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value> {
        Ok(self
            .get(&endpoint(USER_PROFILE, &[user]), "get user profile")
            .await?)
    }
}

#[async_trait]
impl ReportSink for RestApi {
    async fn report(&self, bot_name: &str, report: &MergeReport) -> Result<()> {
        self.execute(
            Method::PUT,
            &endpoint(MERGE_REPORT, &[bot_name]),
            Some(report),
            "put merge report",
        )
        .await?;
        Ok(())
    }
}
