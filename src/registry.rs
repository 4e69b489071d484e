//! Task id to request bookkeeping

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::types::TaskId;

/// Map from live task ids to the request that owns them.
///
/// Every access takes the lock for a single map operation, so the map stays
/// consistent even if a holder panicked.
pub(crate) struct TaskRegistry<T> {
    tasks: Mutex<HashMap<TaskId, Arc<T>>>,
}

impl<T> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> TaskRegistry<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<T>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, task: TaskId) -> Option<Arc<T>> {
        self.lock().get(&task).cloned()
    }

    /// Insert, or remove when `request` is `None`
    pub(crate) fn set(&self, task: TaskId, request: Option<Arc<T>>) {
        let mut tasks = self.lock();
        match request {
            Some(request) => {
                tasks.insert(task, request);
            }
            None => {
                tasks.remove(&task);
            }
        }
    }

    pub(crate) fn remove(&self, task: TaskId) -> Option<Arc<T>> {
        self.lock().remove(&task)
    }

    /// Move `request` from `old` to `new` in one critical section
    pub(crate) fn replace(&self, old: Option<TaskId>, new: TaskId, request: Arc<T>) {
        let mut tasks = self.lock();
        if let Some(old) = old {
            tasks.remove(&old);
        }
        tasks.insert(new, request);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, task: TaskId) -> bool {
        self.lock().contains_key(&task)
    }
}
