//! Owner notifications.

use mergeit_config::NotifierConfig;
use mergeit_core::notifier::profile_field;
use mergeit_core::{Branch, Notifier, UserProfiles};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Sends task status messages to the branch owner and the fixed recipients.
///
/// Without a notifier configured every call is a no-op. Delivery failures are
/// logged and never propagated.
#[derive(Clone)]
pub struct TaskNotifier {
    notifier: Arc<dyn Notifier>,
    profiles: Arc<dyn UserProfiles>,
    config: Option<NotifierConfig>,
}

impl TaskNotifier {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        profiles: Arc<dyn UserProfiles>,
        config: Option<NotifierConfig>,
    ) -> Self {
        Self {
            notifier,
            profiles,
            config,
        }
    }

    pub async fn notify_task_status(&self, owner: &str, message: &str) {
        let Some(config) = &self.config else {
            return;
        };

        let recipients = self.recipients(config, owner).await;
        if recipients.is_empty() {
            debug!(message = %message, "No recipients to notify");
            return;
        }

        if let Err(e) = self.notifier.notify(&config.plug, message, &recipients).await {
            error!(error = %e, message = %message, "Error notifying task status");
        }
    }

    /// Tell the owner that moving the branch to `status` went wrong.
    pub async fn notify_status_error(
        &self,
        branch: &Branch,
        status: &str,
        error: &str,
        message: &str,
    ) {
        let text = format!(
            "There was an error setting the branch '{}' as '{}'. Error: {}. Inner error: {}",
            branch.full_name, status, error, message
        );
        self.notify_task_status(&branch.owner, &text).await;
    }

    async fn recipients(&self, config: &NotifierConfig, owner: &str) -> Vec<String> {
        let mut users: Vec<String> = Vec::new();
        if !owner.trim().is_empty() {
            users.push(owner.to_string());
        }
        users.extend(config.recipients.iter().cloned());

        let Some(field) = &config.user_profile_field else {
            return users;
        };

        let mut resolved = Vec::with_capacity(users.len());
        for user in users {
            resolved.push(self.resolve(&user, field).await.unwrap_or(user));
        }
        resolved
    }

    async fn resolve(&self, user: &str, field: &str) -> Option<String> {
        match self.profiles.get_user_profile(user).await {
            Ok(profile) => profile_field(&profile, field),
            Err(e) => {
                warn!(user = %user, error = %e, "Unable to read user profile");
                None
            }
        }
    }
}
