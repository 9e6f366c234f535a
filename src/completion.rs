use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{CalendarDay, CompletionKey, TaskWithCompletions, completion_key};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionStore {
    checked: HashMap<CompletionKey, bool>,
    record_ids: HashMap<CompletionKey, String>,
}

impl CompletionStore {
    pub fn is_checked(&self, key: &CompletionKey) -> bool {
        self.checked.get(key).copied().unwrap_or(false)
    }

    pub fn is_task_checked(&self, task_id: &str, date: &impl CalendarDay) -> bool {
        self.is_checked(&completion_key(task_id, date))
    }

    pub fn record_id(&self, key: &CompletionKey) -> Option<&str> {
        self.record_ids.get(key).map(String::as_str)
    }

    pub fn checked_count(&self) -> usize {
        self.checked.values().filter(|checked| **checked).count()
    }

    pub(crate) fn mark_checked(&mut self, key: CompletionKey, record_id: String) {
        self.checked.insert(key.clone(), true);
        self.record_ids.insert(key, record_id);
    }

    pub(crate) fn mark_unchecked(&mut self, key: &CompletionKey) {
        self.checked.insert(key.clone(), false);
        self.record_ids.remove(key);
    }
}

pub fn build_store(tasks: &[TaskWithCompletions]) -> CompletionStore {
    let mut store = CompletionStore::default();
    let mut ignored = 0usize;

    for entry in tasks {
        for record in &entry.completions {
            if !record.is_completed() {
                ignored += 1;
                continue;
            }
            let key = completion_key(&entry.task.id, &record.date);
            store.mark_checked(key, record.id.clone());
        }
    }

    tracing::debug!(
        tasks = tasks.len(),
        checked = store.checked_count(),
        ignored,
        "seeded completion store"
    );
    store
}

#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<CompletionStore>>,
}

impl SharedStore {
    pub fn new(store: CompletionStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn snapshot(&self) -> CompletionStore {
        self.lock().clone()
    }

    pub fn is_checked(&self, key: &CompletionKey) -> bool {
        self.lock().is_checked(key)
    }

    pub fn record_id(&self, key: &CompletionKey) -> Option<String> {
        self.lock().record_id(key).map(str::to_string)
    }

    pub(crate) fn update<R>(&self, apply: impl FnOnce(&mut CompletionStore) -> R) -> R {
        apply(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, CompletionStore> {
        // Writers never leave the two maps out of step, so a poisoned lock is still usable.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
