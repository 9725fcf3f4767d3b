//! The bot daemon.

use anyhow::{Context, Result};
use mergeit_client::{RestApi, WebSocketEventSource, event_names};
use mergeit_config::{BotConfig, load_bot_config, validate_config};
use mergeit_db::{BranchQueue, BuildProgressStore, FileBuildProgressStore, ReviewStore, StatePaths};
use mergeit_scheduler::bootstrap::{ensure_status_attribute, load_branches_to_process};
use mergeit_scheduler::{BranchPipeline, EventRouter, Scheduler, Services, wake_channel};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::DaemonArgs;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn required<'a>(value: &'a Option<String>, flag: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("--{} is required", flag))
}

fn load_config(path: &Path) -> Result<BotConfig> {
    let config = load_bot_config(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    validate_config(&config).context("Invalid bot configuration")?;
    Ok(config)
}

fn services(rest: Arc<RestApi>) -> Services {
    Services {
        repo: rest.clone(),
        issues: rest.clone(),
        notifier: rest.clone(),
        profiles: rest.clone(),
        ci: rest.clone(),
        reports: rest,
    }
}

/// Run the bot until Ctrl-C.
pub async fn run(args: DaemonArgs) -> Result<()> {
    let websocket = required(&args.websocket, "websocket")?;
    let restapi = required(&args.restapi, "restapi")?;
    let apikey = required(&args.apikey, "apikey")?;
    let name = required(&args.name, "name")?;
    let config_path = args.config.as_deref().context("--config is required")?;

    let config = Arc::new(load_config(config_path)?);
    info!(bot = %name, repository = %config.repository, "Starting merge bot");

    std::fs::create_dir_all(&args.state_dir).with_context(|| {
        format!("Failed to create state directory: {}", args.state_dir.display())
    })?;
    let paths = StatePaths::new(&args.state_dir, name);
    let queue = Arc::new(
        BranchQueue::open(&paths.queue)
            .with_context(|| format!("Failed to load queue: {}", paths.queue.display()))?,
    );
    let reviews = Arc::new(
        ReviewStore::open(&paths.reviews)
            .with_context(|| format!("Failed to load reviews: {}", paths.reviews.display()))?,
    );
    let build_store: Arc<dyn BuildProgressStore> =
        Arc::new(FileBuildProgressStore::new(&paths.build));

    let rest = Arc::new(
        RestApi::from_url(restapi, config.user_api_key.clone())
            .context("Invalid REST API url")?,
    );

    ensure_status_attribute(rest.as_ref(), &config, name)
        .await
        .context("Failed to prepare the status attribute")?;
    load_branches_to_process(rest.as_ref(), &config, &queue, &reviews)
        .await
        .context("Failed to load the branches to process")?;

    let (wake, wake_rx) = wake_channel();
    let pipeline = BranchPipeline::new(
        name,
        config.clone(),
        services(rest.clone()),
        reviews.clone(),
        build_store.clone(),
    );
    let scheduler = Scheduler::new(
        queue.clone(),
        pipeline,
        rest.clone(),
        build_store,
        wake_rx,
        &config.timing,
    );
    let router = EventRouter::new(config.clone(), queue, reviews, wake);

    let subscriptions = event_names(
        config.vcs.code_review_enabled,
        config.vcs.is_branch_attr_filter_enabled(),
    );
    if subscriptions.is_empty() {
        warn!("Neither code review nor the status attribute filter is enabled; no events will be received");
    }
    let source = WebSocketEventSource::new(websocket, name, apikey, &subscriptions);

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let scheduler = tokio::spawn(scheduler.run(cancel.clone()));
    let router = tokio::spawn(router.run(event_rx, cancel.clone()));
    let source = tokio::spawn(source.run(event_tx, cancel.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!(error = %e, "Unable to listen for the shutdown signal"),
    }
    cancel.cancel();

    let (scheduler, router, source) = tokio::join!(scheduler, router, source);
    scheduler.context("Scheduler task failed")?;
    router.context("Event router task failed")?;
    source.context("Event source task failed")?;

    info!(bot = %name, "Merge bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_missing_and_blank() {
        assert!(required(&None, "name").is_err());
        assert!(required(&Some("  ".to_string()), "name").is_err());
        assert_eq!(required(&Some("bot".to_string()), "name").unwrap(), "bot");
    }

    #[test]
    fn test_load_config_reports_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mergeit.kdl");
        std::fs::write(&path, "repository \"codice\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("server"));
    }
}
