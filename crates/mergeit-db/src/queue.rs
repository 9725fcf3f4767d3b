//! The branch work queue.

use mergeit_core::Branch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::{DbResult, JsonFile};

/// Double-ended queue of branches waiting to be processed.
///
/// The front of the deque is the next branch returned by [`dequeue`]. Normal
/// inserts go to the back (FIFO among themselves); priority inserts go to the
/// front and are therefore returned next. No two entries share the same
/// `(repository, id)`.
///
/// When backed by a file every mutation rewrites the snapshot. A failed write
/// is logged and the in-memory queue stays authoritative.
///
/// [`dequeue`]: BranchQueue::dequeue
pub struct BranchQueue {
    branches: Mutex<VecDeque<Branch>>,
    file: Option<JsonFile<Vec<Branch>>>,
}

impl BranchQueue {
    pub fn in_memory() -> Self {
        Self {
            branches: Mutex::new(VecDeque::new()),
            file: None,
        }
    }

    /// Open a file-backed queue, restoring any snapshot already on disk.
    pub fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let file: JsonFile<Vec<Branch>> = JsonFile::new(path);
        let branches: VecDeque<Branch> = file.load()?.unwrap_or_default().into();
        debug!(path = %file.path().display(), count = branches.len(), "Loaded branch queue");

        Ok(Self {
            branches: Mutex::new(branches),
            file: Some(file),
        })
    }

    /// Bulk load: every branch not already queued is put ahead of the
    /// existing entries, keeping the batch's own order.
    pub fn add_batch(&self, batch: Vec<Branch>) {
        let mut branches = self.branches.lock();

        let mut fresh: Vec<Branch> = Vec::with_capacity(batch.len());
        for branch in batch {
            let queued = branches.iter().any(|b| b.same_identity(&branch));
            let repeated = fresh.iter().any(|b| b.same_identity(&branch));
            if !queued && !repeated {
                fresh.push(branch);
            }
        }

        for branch in fresh.into_iter().rev() {
            branches.push_front(branch);
        }
        self.persist(&branches);
    }

    /// Append `branch` unless it is already queued. Returns whether it was added.
    pub fn enqueue_if_absent(&self, branch: Branch) -> bool {
        let mut branches = self.branches.lock();
        if branches.iter().any(|b| b.same_identity(&branch)) {
            return false;
        }

        branches.push_back(branch);
        self.persist(&branches);
        true
    }

    /// Make `branch` the very next one returned by [`dequeue`](Self::dequeue).
    /// An existing entry with the same identity is moved rather than duplicated.
    pub fn enqueue_with_priority(&self, branch: Branch) {
        let mut branches = self.branches.lock();
        branches.retain(|b| !b.same_identity(&branch));
        branches.push_front(branch);
        self.persist(&branches);
    }

    pub fn dequeue(&self) -> Option<Branch> {
        let mut branches = self.branches.lock();
        let branch = branches.pop_front()?;
        self.persist(&branches);
        Some(branch)
    }

    pub fn peek(&self) -> Option<Branch> {
        self.branches.lock().front().cloned()
    }

    /// Remove `(repository, id)` if queued. Returns whether it was present.
    pub fn remove(&self, repository: &str, id: i64) -> bool {
        let mut branches = self.branches.lock();
        let before = branches.len();
        branches.retain(|b| !b.is(repository, id));

        let removed = branches.len() != before;
        if removed {
            self.persist(&branches);
        }
        removed
    }

    pub fn contains(&self, repository: &str, id: i64) -> bool {
        self.branches.lock().iter().any(|b| b.is(repository, id))
    }

    pub fn len(&self) -> usize {
        self.branches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.lock().is_empty()
    }

    fn persist(&self, branches: &VecDeque<Branch>) {
        let Some(file) = &self.file else {
            return;
        };

        let snapshot: Vec<Branch> = branches.iter().cloned().collect();
        if let Err(e) = file.save(&snapshot) {
            warn!(error = %e, "Failed to persist branch queue");
        }
    }
}
