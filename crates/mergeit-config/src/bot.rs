//! Bot configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Complete configuration of one merge bot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BotConfig {
    pub server: String,
    pub repository: String,
    pub trunk_branch: String,
    pub branch_prefix: Option<String>,
    /// API key of the user the bot acts as.
    #[serde(skip_serializing)]
    pub user_api_key: String,
    /// Requeue with priority when trunk moved under a shelve instead of
    /// failing the task.
    pub queue_again_on_fail: bool,
    pub vcs: VcsConfig,
    pub issues: Option<IssueTrackerConfig>,
    pub ci: CiConfig,
    pub notifier: Option<NotifierConfig>,
    pub timing: TimingConfig,
}

impl BotConfig {
    pub fn branch_prefix(&self) -> &str {
        self.branch_prefix.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VcsConfig {
    /// Only merge branches whose code reviews are all approved.
    pub code_review_enabled: bool,
    pub status_attribute: StatusProperty,
    pub label_enabled: bool,
    pub label_pattern: String,
}

impl VcsConfig {
    /// Branches are selected by the value of the status attribute.
    pub fn is_branch_attr_filter_enabled(&self) -> bool {
        !self.status_attribute.name.trim().is_empty()
            && !self.status_attribute.resolved_value.trim().is_empty()
    }

    pub fn is_auto_label_enabled(&self) -> bool {
        self.label_enabled && !self.label_pattern.is_empty()
    }
}

/// A field (branch attribute or issue field) that tracks task status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusProperty {
    pub name: String,
    pub resolved_value: String,
    pub testing_value: String,
    pub failed_value: String,
    pub merged_value: String,
}

impl StatusProperty {
    pub fn values(&self) -> [&str; 4] {
        [
            &self.resolved_value,
            &self.testing_value,
            &self.failed_value,
            &self.merged_value,
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueTrackerConfig {
    pub plug: String,
    pub project_key: String,
    pub title_field: String,
    pub status_field: StatusProperty,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CiConfig {
    pub plug: String,
    pub plan: String,
    pub plan_after_checkin: Option<String>,
    pub forward_attributes: Vec<String>,
    pub forward_attributes_after_checkin: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifierConfig {
    pub plug: String,
    /// Dotted path into the user profile holding the notifier's user id.
    pub user_profile_field: Option<String>,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingConfig {
    pub not_ready_backoff_step: Duration,
    pub not_ready_backoff_max: Duration,
    pub build_timeout: Duration,
    pub build_poll_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            not_ready_backoff_step: Duration::from_secs(10),
            not_ready_backoff_max: Duration::from_secs(60),
            build_timeout: Duration::from_secs(4 * 60 * 60),
            build_poll_interval: Duration::from_secs(5),
        }
    }
}

const DEFAULT_PROJECT_KEY: &str = "default_proj";

/// Read and parse a bot configuration file.
pub fn load_bot_config(path: &Path) -> ConfigResult<BotConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_bot_config(&text)
}

/// Parse a bot configuration from KDL text.
///
/// Missing required values are left empty; call
/// [`validate_config`](crate::validate_config) to report them.
pub fn parse_bot_config(kdl: &str) -> ConfigResult<BotConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = BotConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => config.server = get_first_string_arg(node).unwrap_or_default(),
            "repository" => config.repository = get_first_string_arg(node).unwrap_or_default(),
            "trunk-branch" => {
                config.trunk_branch = get_first_string_arg(node).unwrap_or_default()
            }
            "branch-prefix" => {
                config.branch_prefix = get_first_string_arg(node).filter(|p| !p.is_empty())
            }
            "bot-user" => config.user_api_key = get_first_string_arg(node).unwrap_or_default(),
            "queue-again-on-fail" => {
                config.queue_again_on_fail = get_first_bool_arg(node, "queue-again-on-fail")?
            }
            "vcs" => config.vcs = parse_vcs(node)?,
            "issues" => config.issues = parse_issues(node),
            "ci" => config.ci = parse_ci(node),
            "notifier" => config.notifier = parse_notifier(node),
            "timing" => config.timing = parse_timing(node)?,
            other => tracing::debug!(node = %other, "Ignoring unknown configuration node"),
        }
    }

    Ok(config)
}

fn parse_vcs(node: &KdlNode) -> ConfigResult<VcsConfig> {
    let mut vcs = VcsConfig::default();

    for child in child_nodes(node) {
        match child.name().value() {
            "code-review" => {
                vcs.code_review_enabled = get_bool_prop(child, "enabled")?.unwrap_or(false)
            }
            "status-attribute" => vcs.status_attribute = parse_status_property(child),
            "label" => {
                vcs.label_enabled = get_bool_prop(child, "enabled")?.unwrap_or(false);
                vcs.label_pattern = get_string_prop(child, "pattern").unwrap_or_default();
            }
            _ => {}
        }
    }

    Ok(vcs)
}

fn parse_issues(node: &KdlNode) -> Option<IssueTrackerConfig> {
    let plug = get_string_prop(node, "plug").filter(|p| !p.is_empty())?;

    let status_field = child_nodes(node)
        .find(|c| c.name().value() == "status-field")
        .map(parse_status_property)
        .unwrap_or_default();

    Some(IssueTrackerConfig {
        plug,
        project_key: get_string_prop(node, "project-key")
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_PROJECT_KEY.to_string()),
        title_field: get_string_prop(node, "title-field").unwrap_or_default(),
        status_field,
    })
}

fn parse_ci(node: &KdlNode) -> CiConfig {
    CiConfig {
        plug: get_string_prop(node, "plug").unwrap_or_default(),
        plan: get_string_prop(node, "plan").unwrap_or_default(),
        plan_after_checkin: get_string_prop(node, "plan-after-checkin").filter(|p| !p.is_empty()),
        forward_attributes: get_separated_list_child(node, "forward-attributes"),
        forward_attributes_after_checkin: get_separated_list_child(
            node,
            "forward-attributes-after-checkin",
        ),
    }
}

fn parse_notifier(node: &KdlNode) -> Option<NotifierConfig> {
    let plug = get_string_prop(node, "plug").filter(|p| !p.is_empty())?;

    Some(NotifierConfig {
        plug,
        user_profile_field: get_string_prop(node, "user-profile-field").filter(|f| !f.is_empty()),
        recipients: get_separated_list_child(node, "recipients"),
    })
}

fn parse_timing(node: &KdlNode) -> ConfigResult<TimingConfig> {
    let mut timing = TimingConfig::default();

    for child in child_nodes(node) {
        let field = child.name().value();
        let target = match field {
            "not-ready-backoff-step" => &mut timing.not_ready_backoff_step,
            "not-ready-backoff-max" => &mut timing.not_ready_backoff_max,
            "build-timeout" => &mut timing.build_timeout,
            "build-poll-interval" => &mut timing.build_poll_interval,
            _ => continue,
        };
        *target = Duration::from_secs(get_first_seconds_arg(child, field)?);
    }

    Ok(timing)
}

fn parse_status_property(node: &KdlNode) -> StatusProperty {
    StatusProperty {
        name: get_first_string_arg(node).unwrap_or_default(),
        resolved_value: get_string_prop(node, "resolved").unwrap_or_default(),
        testing_value: get_string_prop(node, "testing").unwrap_or_default(),
        failed_value: get_string_prop(node, "failed").unwrap_or_default(),
        merged_value: get_string_prop(node, "merged").unwrap_or_default(),
    }
}

// Helper functions for extracting values from KDL nodes

fn child_nodes(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|c| c.nodes().iter())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Booleans may be written as KDL booleans or as `"yes"` / `"no"`.
fn get_bool_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<bool>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => parse_bool(value, name).map(Some),
    }
}

fn get_first_bool_arg(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    match node.entries().iter().find(|e| e.name().is_none()) {
        None => Ok(false),
        Some(entry) => parse_bool(entry.value(), field),
    }
}

fn parse_bool(value: &kdl::KdlValue, field: &str) -> ConfigResult<bool> {
    if let Some(b) = value.as_bool() {
        return Ok(b);
    }

    match value.as_string().map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("yes") | Some("true") => Ok(true),
        Some("no") | Some("false") => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a boolean, got {}", value),
        }),
    }
}

fn get_first_seconds_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected a non-negative number of seconds".to_string(),
        })
}

/// Arguments of the named child node, each split on `,` and `;`.
fn get_separated_list_child(node: &KdlNode, name: &str) -> Vec<String> {
    child_nodes(node)
        .filter(|c| c.name().value() == name)
        .flat_map(get_all_string_args)
        .flat_map(|arg| {
            arg.split([',', ';'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
