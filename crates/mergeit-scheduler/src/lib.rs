//! Branch processing for mergeit.
//!
//! Takes branches off the queue one at a time and drives each through the
//! merge pipeline. Repository events and the startup bulk load feed the queue.

pub mod bootstrap;
pub mod context;
pub mod events;
pub mod notify;
pub mod orchestrator;
pub mod stages;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

pub use context::Services;
pub use events::EventRouter;
pub use orchestrator::{BranchPipeline, PipelineOutcome};
pub use worker::{Scheduler, WakeSignal, wake_channel};
