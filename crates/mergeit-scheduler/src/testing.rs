//! In-memory collaborators for pipeline tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mergeit_config::{
    BotConfig, CiConfig, IssueTrackerConfig, NotifierConfig, StatusProperty, VcsConfig,
};
use mergeit_core::{
    Branch, BranchInfo, BranchWithReview, Changeset, ContinuousIntegration, Error, IssueTracker,
    Label, MergeReport, MergeToOptions, MergeToResponse, MergeToStatus, Notifier, PlanStatus,
    ReportSink, RepositoryOps, Result, UserProfiles,
};
use mergeit_db::ReviewStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::context::Services;
use crate::notify::TaskNotifier;
use crate::status::TaskStatus;

pub fn bot_config() -> BotConfig {
    BotConfig {
        server: "localhost:8087".to_string(),
        repository: "codice".to_string(),
        trunk_branch: "/main".to_string(),
        branch_prefix: Some("task".to_string()),
        user_api_key: "secret".to_string(),
        vcs: VcsConfig {
            status_attribute: StatusProperty {
                name: "status".to_string(),
                resolved_value: "resolved".to_string(),
                testing_value: "testing".to_string(),
                failed_value: "failed".to_string(),
                merged_value: "merged".to_string(),
            },
            ..Default::default()
        },
        ci: CiConfig {
            plug: "jenkins".to_string(),
            plan: "build".to_string(),
            ..Default::default()
        },
        notifier: Some(NotifierConfig {
            plug: "slack".to_string(),
            user_profile_field: None,
            recipients: Vec::new(),
        }),
        ..Default::default()
    }
}

pub fn issue_config() -> IssueTrackerConfig {
    IssueTrackerConfig {
        plug: "jira".to_string(),
        project_key: "PRJ".to_string(),
        title_field: "summary".to_string(),
        status_field: StatusProperty {
            name: "status".to_string(),
            resolved_value: "Done".to_string(),
            testing_value: "Testing".to_string(),
            failed_value: "Failed".to_string(),
            merged_value: "Merged".to_string(),
        },
    }
}

pub fn merge_response(status: MergeToStatus, changeset_number: i64) -> MergeToResponse {
    MergeToResponse {
        status,
        message: format!("server said {}", status),
        changeset_number,
        xlink_changesets: Vec::new(),
    }
}

pub fn finished(succeeded: bool, explanation: &str) -> PlanStatus {
    PlanStatus {
        finished: true,
        succeeded,
        explanation: explanation.to_string(),
        translated_build_id: None,
    }
}

pub fn running() -> PlanStatus {
    PlanStatus::default()
}

/// Every fake collaborator, shared between the code under test and the
/// assertions.
pub struct Fakes {
    pub repo: Arc<FakeRepo>,
    pub issues: Arc<FakeIssues>,
    pub notifier: Arc<FakeNotifier>,
    pub profiles: Arc<FakeProfiles>,
    pub ci: Arc<FakeCi>,
    pub reports: Arc<FakeReports>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            repo: Arc::new(FakeRepo::default()),
            issues: Arc::new(FakeIssues::default()),
            notifier: Arc::new(FakeNotifier::default()),
            profiles: Arc::new(FakeProfiles::default()),
            ci: Arc::new(FakeCi::default()),
            reports: Arc::new(FakeReports::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            repo: self.repo.clone(),
            issues: self.issues.clone(),
            notifier: self.notifier.clone(),
            profiles: self.profiles.clone(),
            ci: self.ci.clone(),
            reports: self.reports.clone(),
        }
    }

    pub fn task_notifier(&self, config: &BotConfig) -> TaskNotifier {
        TaskNotifier::new(
            self.notifier.clone(),
            self.profiles.clone(),
            config.notifier.clone(),
        )
    }

    pub fn task_status(&self, config: &BotConfig, reviews: Arc<ReviewStore>) -> TaskStatus {
        TaskStatus::new(
            Arc::new(config.clone()),
            self.repo.clone(),
            self.issues.clone(),
            reviews,
            self.task_notifier(config),
        )
    }
}

/// Converts a `%` wildcard pattern into an anchored regex.
fn wildcard_matches(pattern: &str, name: &str) -> bool {
    let regex = pattern
        .split('%')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    regex::Regex::new(&format!("^{}$", regex)).is_ok_and(|re| re.is_match(name))
}

#[derive(Default)]
struct RepoState {
    branches: HashMap<String, BranchInfo>,
    attributes: HashMap<(String, String), String>,
    fail_attribute_updates: bool,
    attribute_types: Vec<String>,
    created_attribute_types: Vec<(String, String)>,
    reject_attribute_creation: bool,
    resolved: Vec<Branch>,
    pending: Vec<BranchWithReview>,
    labels: Vec<Label>,
    created_labels: Vec<(String, i64)>,
    fail_label_creation: bool,
    merge_response: Option<MergeToResponse>,
    apply_response: Option<MergeToResponse>,
    fail_merges: bool,
    merge_comments: Vec<String>,
    merge_denied: bool,
    deleted_shelves: Vec<(String, i64)>,
    updated_reviews: Vec<(i64, i32)>,
}

#[derive(Default)]
pub struct FakeRepo {
    state: Mutex<RepoState>,
}

impl FakeRepo {
    pub fn add_branch(&self, branch: &Branch, repository_id: &str, head: i64) {
        self.state.lock().branches.insert(
            branch.full_name.clone(),
            BranchInfo {
                branch: branch.clone(),
                repository_id: repository_id.to_string(),
                head_changeset: head,
            },
        );
    }

    pub fn set_attribute(&self, branch: &str, attribute: &str, value: &str) {
        self.state
            .lock()
            .attributes
            .insert((branch.to_string(), attribute.to_string()), value.to_string());
    }

    pub fn attribute(&self, branch: &str, attribute: &str) -> Option<String> {
        self.state
            .lock()
            .attributes
            .get(&(branch.to_string(), attribute.to_string()))
            .cloned()
    }

    pub fn fail_attribute_updates(&self) {
        self.state.lock().fail_attribute_updates = true;
    }

    pub fn add_attribute_type(&self, name: &str) {
        self.state.lock().attribute_types.push(name.to_string());
    }

    pub fn created_attribute_types(&self) -> Vec<(String, String)> {
        self.state.lock().created_attribute_types.clone()
    }

    pub fn reject_attribute_creation(&self) {
        self.state.lock().reject_attribute_creation = true;
    }

    pub fn set_resolved(&self, branches: Vec<Branch>) {
        self.state.lock().resolved = branches;
    }

    pub fn set_pending(&self, pending: Vec<BranchWithReview>) {
        self.state.lock().pending = pending;
    }

    pub fn add_label(&self, name: &str, date: DateTime<Utc>) {
        self.state.lock().labels.push(Label {
            name: name.to_string(),
            date,
            changeset_id: 1,
        });
    }

    pub fn created_labels(&self) -> Vec<(String, i64)> {
        self.state.lock().created_labels.clone()
    }

    pub fn fail_label_creation(&self) {
        self.state.lock().fail_label_creation = true;
    }

    pub fn set_merge_response(&self, response: MergeToResponse) {
        self.state.lock().merge_response = Some(response);
    }

    pub fn set_apply_response(&self, response: MergeToResponse) {
        self.state.lock().apply_response = Some(response);
    }

    pub fn fail_merges(&self) {
        self.state.lock().fail_merges = true;
    }

    pub fn merge_comments(&self) -> Vec<String> {
        self.state.lock().merge_comments.clone()
    }

    pub fn deny_merges(&self) {
        self.state.lock().merge_denied = true;
    }

    pub fn deleted_shelves(&self) -> Vec<(String, i64)> {
        self.state.lock().deleted_shelves.clone()
    }

    pub fn updated_reviews(&self) -> Vec<(i64, i32)> {
        self.state.lock().updated_reviews.clone()
    }
}

#[async_trait]
impl RepositoryOps for FakeRepo {
    async fn get_branch(&self, _repository: &str, branch_name: &str) -> Result<Option<BranchInfo>> {
        Ok(self.state.lock().branches.get(branch_name).cloned())
    }

    async fn get_branch_name(&self, repository: &str, branch_id: i64) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .branches
            .values()
            .find(|info| info.branch.is(repository, branch_id))
            .map(|info| info.branch.full_name.clone()))
    }

    async fn get_changeset(&self, _repository: &str, changeset_id: i64) -> Result<Changeset> {
        Ok(Changeset {
            id: changeset_id,
            guid: format!("guid-{}", changeset_id),
            owner: "alice".to_string(),
        })
    }

    async fn get_branch_attribute(
        &self,
        _repository: &str,
        branch_name: &str,
        attribute: &str,
    ) -> Result<Option<String>> {
        Ok(self.attribute(branch_name, attribute))
    }

    async fn set_branch_attribute(
        &self,
        _repository: &str,
        branch_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        if self.state.lock().fail_attribute_updates {
            return Err(Error::remote("attribute update rejected"));
        }
        self.set_attribute(branch_name, attribute, value);
        Ok(())
    }

    async fn attribute_exists(&self, _repository: &str, attribute: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .attribute_types
            .iter()
            .any(|a| a == attribute))
    }

    async fn create_attribute(
        &self,
        _repository: &str,
        attribute: &str,
        comment: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if state.reject_attribute_creation {
            return Ok(false);
        }
        state
            .created_attribute_types
            .push((attribute.to_string(), comment.to_string()));
        state.attribute_types.push(attribute.to_string());
        Ok(true)
    }

    async fn find_resolved_branches(
        &self,
        _repository: &str,
        _prefix: &str,
        _attribute: &str,
        _resolved_value: &str,
    ) -> Result<Vec<Branch>> {
        Ok(self.state.lock().resolved.clone())
    }

    async fn find_pending_branches_with_reviews(
        &self,
        _repository: &str,
        _prefix: &str,
        _attribute: &str,
        _merged_value: &str,
    ) -> Result<Vec<BranchWithReview>> {
        Ok(self.state.lock().pending.clone())
    }

    async fn find_most_recent_label(
        &self,
        _repository: &str,
        pattern: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Label>> {
        Ok(self
            .state
            .lock()
            .labels
            .iter()
            .filter(|l| wildcard_matches(pattern, &l.name))
            .filter(|l| since.is_none_or(|since| l.date >= since))
            .max_by_key(|l| l.date)
            .cloned())
    }

    async fn merge_branch_to(
        &self,
        _repository: &str,
        _source_branch: &str,
        _destination_branch: &str,
        comment: &str,
        _options: MergeToOptions,
    ) -> Result<MergeToResponse> {
        let mut state = self.state.lock();
        if state.fail_merges {
            return Err(Error::remote("connection reset"));
        }
        state.merge_comments.push(comment.to_string());
        Ok(state
            .merge_response
            .clone()
            .unwrap_or_else(|| merge_response(MergeToStatus::Ok, 31)))
    }

    async fn merge_shelve_to(
        &self,
        _repository: &str,
        _shelve_id: i64,
        _destination_branch: &str,
        _comment: &str,
        _options: MergeToOptions,
    ) -> Result<MergeToResponse> {
        Ok(self
            .state
            .lock()
            .apply_response
            .clone()
            .unwrap_or_else(|| merge_response(MergeToStatus::Ok, 456)))
    }

    async fn delete_shelve(&self, repository: &str, shelve_id: i64) -> Result<()> {
        self.state
            .lock()
            .deleted_shelves
            .push((repository.to_string(), shelve_id));
        Ok(())
    }

    async fn is_merge_allowed(
        &self,
        _repository: &str,
        _source_branch: &str,
        _destination_branch: &str,
    ) -> Result<bool> {
        Ok(!self.state.lock().merge_denied)
    }

    async fn create_label(
        &self,
        _repository: &str,
        name: &str,
        changeset_id: i64,
        _comment: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_label_creation {
            return Err(Error::remote("label already exists"));
        }
        state.created_labels.push((name.to_string(), changeset_id));
        state.labels.push(Label {
            name: name.to_string(),
            date: Utc::now(),
            changeset_id,
        });
        Ok(())
    }

    async fn update_code_review(
        &self,
        _repository: &str,
        review_id: i64,
        status: i32,
        _title: &str,
    ) -> Result<()> {
        self.state.lock().updated_reviews.push((review_id, status));
        Ok(())
    }
}

#[derive(Default)]
struct IssuesState {
    disconnected: bool,
    fields: HashMap<(String, String), String>,
}

#[derive(Default)]
pub struct FakeIssues {
    state: Mutex<IssuesState>,
}

impl FakeIssues {
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn set_field(&self, task: &str, field: &str, value: &str) {
        self.state
            .lock()
            .fields
            .insert((task.to_string(), field.to_string()), value.to_string());
    }

    pub fn field(&self, task: &str, field: &str) -> Option<String> {
        self.state
            .lock()
            .fields
            .get(&(task.to_string(), field.to_string()))
            .cloned()
    }
}

#[async_trait]
impl IssueTracker for FakeIssues {
    async fn is_connected(&self, _plug: &str) -> Result<bool> {
        Ok(!self.state.lock().disconnected)
    }

    async fn get_issue_url(&self, _plug: &str, project_key: &str, task: &str) -> Result<String> {
        Ok(format!("https://issues.example.com/{}-{}", project_key, task))
    }

    async fn get_issue_field(
        &self,
        _plug: &str,
        _project_key: &str,
        task: &str,
        field: &str,
    ) -> Result<String> {
        Ok(self.field(task, field).unwrap_or_default())
    }

    async fn set_issue_field(
        &self,
        _plug: &str,
        _project_key: &str,
        task: &str,
        field: &str,
        value: &str,
    ) -> Result<()> {
        self.set_field(task, field, value);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<(String, Vec<String>)> {
        self.sent.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(m, _)| m.clone()).collect()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, _plug: &str, message: &str, recipients: &[String]) -> Result<()> {
        self.sent
            .lock()
            .push((message.to_string(), recipients.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    profiles: Mutex<HashMap<String, serde_json::Value>>,
}

impl FakeProfiles {
    pub fn insert(&self, user: &str, profile: serde_json::Value) {
        self.profiles.lock().insert(user.to_string(), profile);
    }
}

#[async_trait]
impl UserProfiles for FakeProfiles {
    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value> {
        self.profiles
            .lock()
            .get(user)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("profile of {}", user)))
    }
}

/// A launched plan, as seen by the CI.
#[derive(Debug, Clone)]
pub struct Launch {
    pub plan: String,
    pub object_spec: String,
    pub comment: String,
    pub properties: BTreeMap<String, String>,
}

#[derive(Default)]
struct CiState {
    script: VecDeque<PlanStatus>,
    launches: Vec<Launch>,
    polled_ids: Vec<String>,
}

/// CI whose status answers are scripted. Once the script runs out every
/// poll reports the build as still running.
#[derive(Default)]
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl FakeCi {
    pub fn script(&self, statuses: impl IntoIterator<Item = PlanStatus>) {
        self.state.lock().script.extend(statuses);
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.state.lock().launches.clone()
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.state.lock().polled_ids.clone()
    }
}

#[async_trait]
impl ContinuousIntegration for FakeCi {
    async fn launch_plan(
        &self,
        _ci_name: &str,
        plan: &str,
        object_spec: &str,
        comment: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.launches.push(Launch {
            plan: plan.to_string(),
            object_spec: object_spec.to_string(),
            comment: comment.to_string(),
            properties: properties.clone(),
        });
        Ok(format!("build-{}", state.launches.len()))
    }

    async fn get_plan_status(
        &self,
        _ci_name: &str,
        _plan: &str,
        build_id: &str,
    ) -> Result<PlanStatus> {
        let mut state = self.state.lock();
        state.polled_ids.push(build_id.to_string());
        Ok(state.script.pop_front().unwrap_or_else(running))
    }
}

#[derive(Default)]
pub struct FakeReports {
    reports: Mutex<Vec<MergeReport>>,
}

impl FakeReports {
    pub fn reports(&self) -> Vec<MergeReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ReportSink for FakeReports {
    async fn report(&self, _bot_name: &str, report: &MergeReport) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}
