//! Single-slot store for the build in flight.

use mergeit_core::BuildInProgress;
use parking_lot::Mutex;
use std::path::PathBuf;

use crate::{DbResult, JsonFile};

/// Holds at most one [`BuildInProgress`].
///
/// A record is saved right after a plan is launched and deleted once the
/// execution is finished. Finding one at startup means a build must be
/// resumed.
pub trait BuildProgressStore: Send + Sync {
    fn load(&self) -> DbResult<Option<BuildInProgress>>;
    fn save(&self, build: &BuildInProgress) -> DbResult<()>;
    fn delete(&self) -> DbResult<()>;
}

/// File-backed store; writes are atomic.
pub struct FileBuildProgressStore {
    file: JsonFile<BuildInProgress>,
}

impl FileBuildProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }
}

impl BuildProgressStore for FileBuildProgressStore {
    fn load(&self) -> DbResult<Option<BuildInProgress>> {
        self.file.load()
    }

    fn save(&self, build: &BuildInProgress) -> DbResult<()> {
        self.file.save(build)
    }

    fn delete(&self) -> DbResult<()> {
        self.file.delete()
    }
}

/// In-memory store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryBuildProgressStore {
    slot: Mutex<Option<BuildInProgress>>,
}

impl BuildProgressStore for MemoryBuildProgressStore {
    fn load(&self) -> DbResult<Option<BuildInProgress>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, build: &BuildInProgress) -> DbResult<()> {
        *self.slot.lock() = Some(build.clone());
        Ok(())
    }

    fn delete(&self) -> DbResult<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}
