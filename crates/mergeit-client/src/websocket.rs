//! Repository event subscription over the server websocket.

use futures::{SinkExt, StreamExt};
use mergeit_core::{BranchAttributeChanged, CodeReviewChanged, RepoEvent, ReviewStatus};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ClientResult;

pub const BRANCH_ATTRIBUTE_CHANGED: &str = "branchAttributeChanged";
pub const CODE_REVIEW_CHANGED: &str = "codeReviewChanged";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Events to subscribe to for the given bot configuration.
pub fn event_names(code_review_enabled: bool, attribute_filter_enabled: bool) -> Vec<&'static str> {
    let mut names = Vec::new();
    if code_review_enabled {
        names.push(CODE_REVIEW_CHANGED);
    }
    if attribute_filter_enabled {
        names.push(BRANCH_ATTRIBUTE_CHANGED);
    }
    names
}

/// Websocket subscription that turns server triggers into [`RepoEvent`]s.
///
/// The connection is kept alive for the whole life of the bot; whenever it
/// drops, the client logs in again and re-registers its triggers.
pub struct WebSocketEventSource {
    url: String,
    name: String,
    api_key: String,
    event_names: Vec<String>,
}

impl WebSocketEventSource {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        api_key: impl Into<String>,
        event_names: &[&str],
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            api_key: api_key.into(),
            event_names: event_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Forward events to `tx` until cancelled or the receiver goes away.
    pub async fn run(self, tx: mpsc::Sender<RepoEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.session(&tx) => match result {
                    Ok(()) => info!(bot = %self.name, "Websocket connection closed"),
                    Err(e) => error!(bot = %self.name, error = %e, "Websocket connection error"),
                },
            }

            if tx.is_closed() {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    async fn session(&self, tx: &mpsc::Sender<RepoEvent>) -> ClientResult<()> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        sink.send(Message::Text(login_message(&self.api_key))).await?;
        for event in &self.event_names {
            sink.send(Message::Text(register_message(event))).await?;
        }
        info!(bot = %self.name, "Bot connected");

        while let Some(message) = source.next().await {
            match message? {
                Message::Text(text) => {
                    debug!(message = %text, "Event received");
                    let Some(event) = parse_event(&text) else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    info!(frame = ?frame, "Server closed the websocket");
                    return Ok(());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn login_message(api_key: &str) -> String {
    json!({"action": "login", "key": api_key}).to_string()
}

fn register_message(event: &str) -> String {
    json!({"action": "register", "type": "trigger", "eventlist": [event]}).to_string()
}

/// Parse a trigger message. Unknown events and malformed payloads yield `None`.
pub fn parse_event(text: &str) -> Option<RepoEvent> {
    let message: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            error!(message = %text, error = %e, "Unable to parse incoming event");
            return None;
        }
    };

    let kind = message.get("event").and_then(Value::as_str).unwrap_or_default();
    if kind != BRANCH_ATTRIBUTE_CHANGED && kind != CODE_REVIEW_CHANGED {
        return None;
    }

    let Some(properties) = message.get("properties").filter(|p| p.is_object()) else {
        warn!(message = %text, "Incoming event has no properties");
        return None;
    };
    let field = |name: &str| property(properties, name);

    let Ok(branch_id) = field("branchId").trim().parse::<i64>() else {
        warn!(message = %text, "Incoming event has an invalid branch id");
        return None;
    };

    if kind == BRANCH_ATTRIBUTE_CHANGED {
        return Some(RepoEvent::BranchAttributeChanged(BranchAttributeChanged {
            repository: field("repository"),
            branch_id,
            branch_name: field("branchFullName"),
            owner: field("branchOwner"),
            comment: field("branchComment"),
            attribute_name: field("attributeName"),
            attribute_value: field("attributeValue"),
        }));
    }

    let Ok(review_id) = field("codeReviewId").trim().parse::<i64>() else {
        warn!(message = %text, "Incoming event has an invalid code review id");
        return None;
    };

    Some(RepoEvent::CodeReviewChanged(CodeReviewChanged {
        repository: field("repository"),
        branch_id,
        branch_name: field("branchFullName"),
        owner: field("branchOwner"),
        comment: field("branchComment"),
        review_id,
        review_title: field("codeReviewTitle"),
        review_status: ReviewStatus::parse(&field("codeReviewStatus")),
    }))
}

/// Case-insensitive property lookup; scalars are rendered as text.
fn property(properties: &Value, name: &str) -> String {
    let Some(map) = properties.as_object() else {
        return String::new();
    };
    let value = map
        .get(name)
        .or_else(|| {
            map.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        });

    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
