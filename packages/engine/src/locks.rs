//! Exclusive claims on domain entities.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use job_core::{JobId, LockObjectReference};

/// Tracks which job holds which entities.
///
/// A job acquires all of its objects at once or none of them, so two jobs
/// with overlapping objects never run tasks at the same time. The registry
/// can be shared between engines through an `Arc`.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashMap<JobId, BTreeSet<LockObjectReference>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `objects` for `job`. Returns true if the job now holds them.
    ///
    /// Re-acquiring for a job that already holds its lock succeeds.
    pub fn try_acquire(&self, job: JobId, objects: &BTreeSet<LockObjectReference>) -> bool {
        let mut held = self.lock();
        if held.contains_key(&job) {
            return true;
        }

        let conflict = held
            .iter()
            .find(|(_, claimed)| !claimed.is_disjoint(objects))
            .map(|(holder, _)| *holder);
        if let Some(holder) = conflict {
            tracing::debug!(job_id = %job, holder = %holder, "Lock busy");
            return false;
        }

        held.insert(job, objects.clone());
        true
    }

    /// Release everything held by `job`. Returns false if it held nothing.
    pub fn release(&self, job: JobId) -> bool {
        self.lock().remove(&job).is_some()
    }

    /// Job currently holding `object`, if any.
    pub fn holder_of(&self, object: &LockObjectReference) -> Option<JobId> {
        self.lock()
            .iter()
            .find(|(_, claimed)| claimed.contains(object))
            .map(|(holder, _)| *holder)
    }

    pub fn is_held(&self, job: JobId) -> bool {
        self.lock().contains_key(&job)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, BTreeSet<LockObjectReference>>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
