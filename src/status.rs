//! Per-upload status registry.
//!
//! Every accepted upload gets an entry here when it is queued; the worker
//! moves it through `processing` to `completed` or `failed`. Backs
//! `GET /uploads/{id}`.
//!
//! Finished entries are retained up to a limit; past it the oldest finished
//! entry is evicted and its id reads as unknown. Queued and processing
//! entries are never evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::models::{UploadState, UploadStatus};

/// Finished entries kept by [`StatusRegistry::new`].
pub const DEFAULT_RETAINED: usize = 10_000;

pub struct StatusRegistry {
    inner: RwLock<Statuses>,
    retain_finished: usize,
}

#[derive(Default)]
struct Statuses {
    by_id: HashMap<Uuid, UploadStatus>,
    // Finished ids, oldest first.
    finished: VecDeque<Uuid>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED)
    }

    /// Keeps at most `retain_finished` completed or failed entries (minimum 1).
    pub fn with_retention(retain_finished: usize) -> Self {
        Self {
            inner: RwLock::new(Statuses::default()),
            retain_finished: retain_finished.max(1),
        }
    }

    /// Records `state` for `upload_id`, stamping the current time.
    pub fn set(&self, upload_id: Uuid, state: UploadState) {
        let finished = state.is_finished();
        let status = UploadStatus {
            upload_id,
            state,
            updated_at: Utc::now(),
        };

        let mut inner = self.write();
        let was_finished = inner
            .by_id
            .insert(upload_id, status)
            .is_some_and(|prev| prev.state.is_finished());

        if finished && !was_finished {
            inner.finished.push_back(upload_id);
            while inner.finished.len() > self.retain_finished {
                if let Some(oldest) = inner.finished.pop_front() {
                    inner.by_id.remove(&oldest);
                }
            }
        } else if !finished && was_finished {
            inner.finished.retain(|id| *id != upload_id);
        }
    }

    pub fn get(&self, upload_id: &Uuid) -> Option<UploadStatus> {
        self.read().by_id.get(upload_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every update leaves the map and queue consistent, so a poisoned lock
    // is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Statuses> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Statuses> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
