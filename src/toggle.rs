use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::watch;

use crate::backend::{BackendError, CompletionBackend, NewCompletion};
use crate::completion::{CompletionStore, SharedStore, build_store};
use crate::domain::{CompletionKey, TaskWithCompletions, completion_key};

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("a toggle for {0} is already in flight")]
    AlreadyPending(CompletionKey),
    #[error("no completion record is known for {0}; reload completions and retry")]
    MissingRecordId(CompletionKey),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("toggle for {0} was aborted")]
    Aborted(CompletionKey),
    #[error("completions were reloaded while the toggle for {0} was in flight")]
    Superseded(CompletionKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Idle,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Checked,
    Unchecked,
}

/// Fires once; every in-flight toggle observing it resolves as aborted.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn aborted(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns once aborted.
        let _ = receiver.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ToggleCoordinator<B> {
    backend: B,
    store: SharedStore,
    pending: Mutex<HashMap<CompletionKey, u64>>,
    next_request: AtomicU64,
    generation: AtomicU64,
    abort: AbortSignal,
}

impl<B: CompletionBackend> ToggleCoordinator<B> {
    pub fn new(backend: B, store: SharedStore) -> Self {
        Self {
            backend,
            store,
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn state(&self, key: &CompletionKey) -> ToggleState {
        if self.pending_keys().contains_key(key) {
            ToggleState::Pending
        } else {
            ToggleState::Idle
        }
    }

    pub fn is_pending(&self, key: &CompletionKey) -> bool {
        self.state(key) == ToggleState::Pending
    }

    /// Replaces the store contents with a fresh seed. Responses to requests
    /// issued before the reseed are discarded.
    pub fn reseed(&self, tasks: &[TaskWithCompletions]) {
        let seeded = build_store(tasks);
        self.store.update(|store| {
            *store = seeded;
            self.generation.fetch_add(1, Ordering::SeqCst);
        });
    }

    pub async fn toggle(
        &self,
        task_id: &str,
        date: NaiveDate,
        currently_checked: bool,
    ) -> Result<ToggleOutcome, ToggleError> {
        let key = completion_key(task_id, &date);
        let _pending = self.begin(&key)?;
        if self.abort.is_aborted() {
            return Err(ToggleError::Aborted(key));
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let result = if currently_checked {
            self.uncheck(&key, generation).await
        } else {
            self.check(task_id, date, &key, generation).await
        };

        match &result {
            Ok(outcome) => tracing::info!(%key, ?outcome, "toggle committed"),
            Err(err) => tracing::warn!(%key, error = %err, "toggle failed; store left unchanged"),
        }
        result
    }

    async fn check(
        &self,
        task_id: &str,
        date: NaiveDate,
        key: &CompletionKey,
        generation: u64,
    ) -> Result<ToggleOutcome, ToggleError> {
        let request = NewCompletion::completed(task_id, date);
        let created = self
            .until_aborted(key, self.backend.create_completion(request))
            .await??;
        if created.id.trim().is_empty() {
            return Err(BackendError::Server("create response carried no record id".to_string()).into());
        }

        self.commit(key, generation, |store| {
            store.mark_checked(key.clone(), created.id)
        })?;
        Ok(ToggleOutcome::Checked)
    }

    async fn uncheck(&self, key: &CompletionKey, generation: u64) -> Result<ToggleOutcome, ToggleError> {
        let Some(record_id) = self.store.record_id(key) else {
            return Err(ToggleError::MissingRecordId(key.clone()));
        };

        let outcome = self
            .until_aborted(key, self.backend.delete_completions(std::slice::from_ref(&record_id)))
            .await??;
        if !outcome.success {
            return Err(BackendError::Rejected.into());
        }

        self.commit(key, generation, |store| store.mark_unchecked(key))?;
        Ok(ToggleOutcome::Unchecked)
    }

    async fn until_aborted<T>(
        &self,
        key: &CompletionKey,
        request: impl Future<Output = T>,
    ) -> Result<T, ToggleError> {
        tokio::select! {
            biased;
            _ = self.abort.aborted() => Err(ToggleError::Aborted(key.clone())),
            outcome = request => Ok(outcome),
        }
    }

    fn commit(
        &self,
        key: &CompletionKey,
        generation: u64,
        apply: impl FnOnce(&mut CompletionStore),
    ) -> Result<(), ToggleError> {
        self.store.update(|store| {
            if self.abort.is_aborted() {
                return Err(ToggleError::Aborted(key.clone()));
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(ToggleError::Superseded(key.clone()));
            }
            apply(store);
            Ok(())
        })
    }

    fn begin(&self, key: &CompletionKey) -> Result<PendingGuard<'_>, ToggleError> {
        let mut pending = self.pending_keys();
        if pending.contains_key(key) {
            return Err(ToggleError::AlreadyPending(key.clone()));
        }
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        pending.insert(key.clone(), request_id);
        Ok(PendingGuard {
            pending: &self.pending,
            key: key.clone(),
            request_id,
        })
    }

    fn pending_keys(&self) -> std::sync::MutexGuard<'_, HashMap<CompletionKey, u64>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<CompletionKey, u64>>,
    key: CompletionKey,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.get(&self.key) == Some(&self.request_id) {
            pending.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use super::{ToggleCoordinator, ToggleError, ToggleOutcome, ToggleState};
    use crate::backend::{
        BackendError, CompletionBackend, CreatedCompletion, DeleteOutcome, NewCompletion,
    };
    use crate::completion::{SharedStore, build_store};
    use crate::domain::{
        CompletionRecord, CompletionStatus, Period, Task, TaskWithCompletions, completion_key,
    };

    #[derive(Default)]
    struct FakeBackend {
        next_id: AtomicU64,
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
        reject_delete: AtomicBool,
        blank_id: AtomicBool,
        hold_requests: AtomicBool,
        release: Notify,
        created: Mutex<Vec<NewCompletion>>,
        deleted: Mutex<Vec<Vec<String>>>,
    }

    impl FakeBackend {
        async fn maybe_hold(&self) {
            if self.hold_requests.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn fetch_tasks_and_completions(
            &self,
            _site_id: &str,
            _start: NaiveDate,
            _end: NaiveDate,
            _year: i32,
        ) -> Result<Vec<TaskWithCompletions>, BackendError> {
            Ok(Vec::new())
        }

        async fn create_completion(
            &self,
            request: NewCompletion,
        ) -> Result<CreatedCompletion, BackendError> {
            self.maybe_hold().await;
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(BackendError::Network("connection reset".to_string()));
            }
            self.created.lock().unwrap().push(request);
            if self.blank_id.load(Ordering::SeqCst) {
                return Ok(CreatedCompletion { id: String::new() });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(CreatedCompletion {
                id: format!("rec-{id}"),
            })
        }

        async fn delete_completions(
            &self,
            record_ids: &[String],
        ) -> Result<DeleteOutcome, BackendError> {
            self.maybe_hold().await;
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(BackendError::Server("500".to_string()));
            }
            self.deleted.lock().unwrap().push(record_ids.to_vec());
            Ok(DeleteOutcome {
                success: !self.reject_delete.load(Ordering::SeqCst),
            })
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn seeded_with(task_id: &str, record_id: &str, date: NaiveDate) -> Vec<TaskWithCompletions> {
        vec![TaskWithCompletions {
            task: Task {
                id: task_id.to_string(),
                site_id: "site".to_string(),
                name: task_id.to_string(),
                period: Period::Day,
            },
            completions: vec![CompletionRecord {
                id: record_id.to_string(),
                task_id: task_id.to_string(),
                date,
                status: CompletionStatus::Completed,
            }],
        }]
    }

    fn coordinator(backend: FakeBackend) -> Arc<ToggleCoordinator<FakeBackend>> {
        Arc::new(ToggleCoordinator::new(backend, SharedStore::default()))
    }

    async fn wait_until_pending(
        coordinator: &ToggleCoordinator<FakeBackend>,
        key: &crate::domain::CompletionKey,
    ) {
        while !coordinator.is_pending(key) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn check_then_uncheck_returns_to_unchecked() {
        let coordinator = coordinator(FakeBackend::default());
        let key = completion_key("t1", &day(7));

        let outcome = coordinator.toggle("t1", day(7), false).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Checked);
        assert!(coordinator.store().is_checked(&key));
        assert_eq!(coordinator.store().record_id(&key).as_deref(), Some("rec-0"));

        let sent = coordinator.backend().created.lock().unwrap().clone();
        assert_eq!(sent, vec![NewCompletion::completed("t1", day(7))]);

        let outcome = coordinator.toggle("t1", day(7), true).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Unchecked);
        assert!(!coordinator.store().is_checked(&key));
        assert_eq!(coordinator.store().record_id(&key), None);
        assert_eq!(
            *coordinator.backend().deleted.lock().unwrap(),
            vec![vec!["rec-0".to_string()]]
        );
        assert_eq!(coordinator.state(&key), ToggleState::Idle);
    }

    #[tokio::test]
    async fn failed_create_leaves_store_untouched() {
        let backend = FakeBackend::default();
        backend.fail_create.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);
        coordinator.reseed(&seeded_with("t2", "r9", day(1)));
        let before = coordinator.store().snapshot();

        let result = coordinator.toggle("t1", day(7), false).await;
        assert!(matches!(result, Err(ToggleError::Backend(BackendError::Network(_)))));
        assert_eq!(coordinator.store().snapshot(), before);
        assert!(!coordinator.is_pending(&completion_key("t1", &day(7))));
    }

    #[tokio::test]
    async fn failed_or_rejected_delete_leaves_store_untouched() {
        let backend = FakeBackend::default();
        backend.fail_delete.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);
        coordinator.reseed(&seeded_with("t1", "r1", day(3)));
        let before = coordinator.store().snapshot();

        let result = coordinator.toggle("t1", day(3), true).await;
        assert!(matches!(result, Err(ToggleError::Backend(BackendError::Server(_)))));
        assert_eq!(coordinator.store().snapshot(), before);

        coordinator.backend().fail_delete.store(false, Ordering::SeqCst);
        coordinator.backend().reject_delete.store(true, Ordering::SeqCst);
        let result = coordinator.toggle("t1", day(3), true).await;
        assert!(matches!(result, Err(ToggleError::Backend(BackendError::Rejected))));
        assert_eq!(coordinator.store().snapshot(), before);
    }

    #[tokio::test]
    async fn uncheck_without_record_id_is_an_error() {
        let coordinator = coordinator(FakeBackend::default());
        let result = coordinator.toggle("t1", day(4), true).await;

        assert!(matches!(result, Err(ToggleError::MissingRecordId(_))));
        assert!(coordinator.backend().deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_record_id_is_not_committed() {
        let backend = FakeBackend::default();
        backend.blank_id.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);

        let result = coordinator.toggle("t1", day(4), false).await;
        assert!(matches!(result, Err(ToggleError::Backend(BackendError::Server(_)))));
        assert!(!coordinator.store().is_checked(&completion_key("t1", &day(4))));
    }

    #[tokio::test]
    async fn same_key_is_gated_while_other_keys_proceed() {
        let backend = FakeBackend::default();
        backend.hold_requests.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);
        let key = completion_key("t1", &day(9));

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.toggle("t1", day(9), false).await }
        });
        wait_until_pending(&coordinator, &key).await;

        let duplicate = coordinator.toggle("t1", day(9), false).await;
        assert!(matches!(duplicate, Err(ToggleError::AlreadyPending(_))));

        let other_key = completion_key("t2", &day(9));
        let second = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.toggle("t2", day(9), false).await }
        });
        wait_until_pending(&coordinator, &other_key).await;
        assert!(coordinator.is_pending(&key));

        coordinator.backend().release.notify_waiters();
        assert_eq!(first.await.unwrap().unwrap(), ToggleOutcome::Checked);
        assert_eq!(second.await.unwrap().unwrap(), ToggleOutcome::Checked);

        assert!(coordinator.store().is_checked(&key));
        assert!(coordinator.store().is_checked(&other_key));
        assert!(!coordinator.is_pending(&key));
        assert!(!coordinator.is_pending(&other_key));
    }

    #[tokio::test]
    async fn abort_resolves_in_flight_toggle_without_mutation() {
        let backend = FakeBackend::default();
        backend.hold_requests.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);
        let key = completion_key("t1", &day(10));

        let in_flight = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.toggle("t1", day(10), false).await }
        });
        wait_until_pending(&coordinator, &key).await;

        coordinator.abort();
        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(ToggleError::Aborted(_))));
        assert!(!coordinator.store().is_checked(&key));
        assert!(!coordinator.is_pending(&key));

        let after = coordinator.toggle("t1", day(10), false).await;
        assert!(matches!(after, Err(ToggleError::Aborted(_))));
    }

    #[tokio::test]
    async fn response_after_reseed_is_discarded() {
        let backend = FakeBackend::default();
        backend.hold_requests.store(true, Ordering::SeqCst);
        let coordinator = coordinator(backend);
        let key = completion_key("t1", &day(11));

        let in_flight = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.toggle("t1", day(11), false).await }
        });
        wait_until_pending(&coordinator, &key).await;

        let reseeded = seeded_with("t2", "r5", day(11));
        coordinator.reseed(&reseeded);
        coordinator.backend().release.notify_waiters();

        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(ToggleError::Superseded(_))));
        assert_eq!(coordinator.store().snapshot(), build_store(&reseeded));
    }
}
