//! Scheduler that feeds queued branches to the pipeline, one at a time.

use mergeit_config::TimingConfig;
use mergeit_core::{Branch, RepositoryOps};
use mergeit_db::{BranchQueue, BuildProgressStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::{BranchPipeline, PipelineOutcome};

const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Nudges the scheduler out of its idle wait. Signals coalesce: any number of
/// calls before the scheduler looks count as one.
#[derive(Clone)]
pub struct WakeSignal {
    tx: mpsc::Sender<()>,
}

impl WakeSignal {
    pub fn notify(&self) {
        // A full channel already holds a pending wake-up.
        let _ = self.tx.try_send(());
    }
}

pub fn wake_channel() -> (WakeSignal, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (WakeSignal { tx }, rx)
}

/// Extra delay before retrying branches that were not ready.
struct Backoff {
    step: Duration,
    max: Duration,
    delays: HashMap<(String, i64), Duration>,
}

impl Backoff {
    fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            delays: HashMap::new(),
        }
    }

    fn delay(&self, branch: &Branch) -> Duration {
        self.delays
            .get(&Self::key(branch))
            .copied()
            .unwrap_or_default()
    }

    fn grow(&mut self, branch: &Branch) -> Duration {
        let delay = self.delays.entry(Self::key(branch)).or_default();
        *delay = (*delay + self.step).min(self.max);
        *delay
    }

    fn reset(&mut self, branch: &Branch) {
        self.delays.remove(&Self::key(branch));
    }

    /// Forget branches that left the queue without being processed.
    fn retain_queued(&mut self, queue: &BranchQueue) {
        self.delays.retain(|(repository, id), _| queue.contains(repository, *id));
    }

    fn key(branch: &Branch) -> (String, i64) {
        (branch.repository.clone(), branch.id)
    }
}

enum Step {
    Empty,
    Processed,
    Stopped,
}

pub struct Scheduler {
    queue: Arc<BranchQueue>,
    pipeline: BranchPipeline,
    repo: Arc<dyn RepositoryOps>,
    build_store: Arc<dyn BuildProgressStore>,
    wake: mpsc::Receiver<()>,
    backoff: Backoff,
}

impl Scheduler {
    pub fn new(
        queue: Arc<BranchQueue>,
        pipeline: BranchPipeline,
        repo: Arc<dyn RepositoryOps>,
        build_store: Arc<dyn BuildProgressStore>,
        wake: mpsc::Receiver<()>,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            repo,
            build_store,
            wake,
            backoff: Backoff::new(timing.not_ready_backoff_step, timing.not_ready_backoff_max),
        }
    }

    /// Resume the persisted build, then process branches until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(queued = self.queue.len(), "Starting scheduler");
        self.resume_build(&cancel).await;

        let mut queue_was_empty = false;
        while !cancel.is_cancelled() {
            if !self.idle(queue_was_empty, &cancel).await {
                break;
            }

            match self.step(&cancel).await {
                Step::Empty => queue_was_empty = true,
                Step::Processed => queue_was_empty = false,
                Step::Stopped => break,
            }
        }

        info!("Scheduler stopped");
    }

    async fn resume_build(&mut self, cancel: &CancellationToken) {
        let record = match self.build_store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Unable to read the build in progress");
                return;
            }
        };

        if let Some((branch, outcome)) = self.pipeline.resume(record, cancel).await {
            self.dispatch(branch, outcome);
        }
    }

    /// Wait between iterations. Returns false once cancelled.
    async fn idle(&mut self, queue_was_empty: bool, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = sleep(IDLE_INTERVAL) => {}
        }

        if !queue_was_empty {
            return true;
        }

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.wake.recv() => true,
            _ = sleep(IDLE_INTERVAL) => true,
        }
    }

    async fn step(&mut self, cancel: &CancellationToken) -> Step {
        self.backoff.retain_queued(&self.queue);
        let Some(head) = self.queue.peek() else {
            return Step::Empty;
        };

        let delay = self.backoff.delay(&head);
        if !delay.is_zero() {
            debug!(branch = %head.full_name, delay = ?delay, "Delaying branch that was not ready");
            tokio::select! {
                _ = cancel.cancelled() => return Step::Stopped,
                _ = sleep(delay) => {}
            }
        }

        let Some(mut branch) = self.queue.dequeue() else {
            return Step::Empty;
        };

        match self
            .repo
            .get_branch_name(&branch.repository, branch.id)
            .await
        {
            Ok(Some(name)) => branch.full_name = name,
            Ok(None) => {
                info!(branch = %branch.full_name, id = branch.id, "Branch no longer exists; dropping it");
                self.backoff.reset(&branch);
                return Step::Processed;
            }
            Err(e) => {
                warn!(branch = %branch.full_name, error = %e, "Unable to refresh branch name");
            }
        }

        info!(branch = %branch.full_name, "Processing branch");
        let outcome = self.pipeline.process(&branch, cancel).await;
        self.dispatch(branch, outcome);
        Step::Processed
    }

    fn dispatch(&mut self, branch: Branch, outcome: PipelineOutcome) {
        match outcome {
            PipelineOutcome::Ok => {
                info!(branch = %branch.full_name, "Branch process completed");
                self.backoff.reset(&branch);
            }
            PipelineOutcome::Failed => {
                info!(branch = %branch.full_name, "Branch process failed");
                self.backoff.reset(&branch);
            }
            PipelineOutcome::Cancelled => {
                info!(branch = %branch.full_name, "Branch process cancelled");
                self.backoff.reset(&branch);
            }
            PipelineOutcome::QueueAgain => {
                info!(branch = %branch.full_name, "Trunk changed during the merge; branch queued again first");
                self.backoff.reset(&branch);
                self.queue.enqueue_with_priority(branch);
            }
            PipelineOutcome::NotReady => {
                let delay = self.backoff.grow(&branch);
                info!(branch = %branch.full_name, delay = ?delay, "Branch is not ready; it will be queued again");
                self.queue.enqueue_if_absent(branch);
            }
        }
    }
}
