//! Notification delivery and the user profiles used to address it.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, plug: &str, message: &str, recipients: &[String]) -> Result<()>;
}

/// Source of user profiles (arbitrary JSON documents keyed by user name).
#[async_trait]
pub trait UserProfiles: Send + Sync {
    async fn get_user_profile(&self, user: &str) -> Result<serde_json::Value>;
}

/// Walk a dotted path (`slack.user`) into a profile document.
///
/// Returns `None` when a segment is missing or the leaf is not a scalar.
pub fn profile_field(profile: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = profile;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }

    match current {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
