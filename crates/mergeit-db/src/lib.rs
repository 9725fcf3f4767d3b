//! Persistent state for the mergeit merge bot.
//!
//! Everything the bot must remember across restarts lives here: the branch
//! queue, the code reviews being tracked, and the build currently in flight.
//! Each one is a small JSON file rewritten atomically on every change.

pub mod build_progress;
pub mod error;
pub mod paths;
pub mod queue;
pub mod reviews;
pub mod snapshot;

pub use build_progress::{BuildProgressStore, FileBuildProgressStore, MemoryBuildProgressStore};
pub use error::{DbError, DbResult};
pub use paths::{StatePaths, escape_bot_name};
pub use queue::BranchQueue;
pub use reviews::ReviewStore;
pub use snapshot::JsonFile;
