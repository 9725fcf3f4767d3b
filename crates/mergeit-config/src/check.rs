//! Configuration validation.

use crate::bot::{BotConfig, CiConfig, IssueTrackerConfig, NotifierConfig, StatusProperty};
use crate::{ConfigError, ConfigResult};

/// Check that every required field is present, reporting all problems at once.
pub fn validate_config(config: &BotConfig) -> ConfigResult<()> {
    let mut errors = String::new();

    require(&mut errors, &config.server, "server");
    require(&mut errors, &config.repository, "repository");
    require(&mut errors, &config.trunk_branch, "trunk branch");
    require(&mut errors, &config.user_api_key, "user api key");

    check_status_property(
        &mut errors,
        &config.vcs.status_attribute,
        "of the status attribute",
    );

    if let Some(issues) = &config.issues {
        check_issues(&mut errors, issues);
    }

    check_ci(&mut errors, &config.ci);

    if let Some(notifier) = &config.notifier {
        check_notifier(&mut errors, notifier);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

fn check_issues(errors: &mut String, issues: &IssueTrackerConfig) {
    require(errors, &issues.plug, "plug name for issue tracker config");
    require(errors, &issues.title_field, "title field for issue tracker config");
    check_status_property(
        errors,
        &issues.status_field,
        "of the status field for issue tracker config",
    );
}

fn check_ci(errors: &mut String, ci: &CiConfig) {
    require(errors, &ci.plug, "plug name for CI config");
    require(errors, &ci.plan, "plan for CI config");
}

fn check_notifier(errors: &mut String, notifier: &NotifierConfig) {
    require(errors, &notifier.plug, "plug name for notifications config");

    if notifier.user_profile_field.is_none() && notifier.recipients.is_empty() {
        errors.push_str(
            "* There is no destination info in the notifications config. \
             Please specify a user profile field, a list of recipients or both.\n",
        );
    }
}

fn check_status_property(errors: &mut String, status: &StatusProperty, group: &str) {
    require(errors, &status.name, &format!("name {}", group));
    require(errors, &status.resolved_value, &format!("resolved value {}", group));
    require(errors, &status.failed_value, &format!("failed value {}", group));
    require(errors, &status.merged_value, &format!("merged value {}", group));
}

fn require(errors: &mut String, value: &str, field: &str) {
    if value.trim().is_empty() {
        errors.push_str(&format!("* The {} must be defined.\n", field));
    }
}
