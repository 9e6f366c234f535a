use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CompletionStatus, TaskWithCompletions, Tracker, TrackerError};
use crate::storage::{StorageError, load_tracker, save_tracker};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("server rejected the request")]
    Rejected,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<TrackerError> for BackendError {
    fn from(err: TrackerError) -> Self {
        BackendError::Server(err.to_string())
    }
}

/// Body of a create-completion request. `date` always goes out as `yyyy-mm-dd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCompletion {
    pub task_id: String,
    #[serde(with = "plain_day")]
    pub date: NaiveDate,
    pub status: CompletionStatus,
}

impl NewCompletion {
    pub fn completed(task_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            task_id: task_id.into(),
            date,
            status: CompletionStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCompletion {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn fetch_tasks_and_completions(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        year: i32,
    ) -> Result<Vec<TaskWithCompletions>, BackendError>;

    async fn create_completion(
        &self,
        request: NewCompletion,
    ) -> Result<CreatedCompletion, BackendError>;

    /// Accepts a batch; the toggle flow only ever sends one id.
    async fn delete_completions(&self, record_ids: &[String]) -> Result<DeleteOutcome, BackendError>;
}

pub struct LedgerBackend {
    path: PathBuf,
    tracker: Mutex<Tracker>,
}

impl LedgerBackend {
    pub fn open(path: PathBuf) -> Result<Self, BackendError> {
        let tracker = load_tracker(&path)?;
        Ok(Self {
            path,
            tracker: Mutex::new(tracker),
        })
    }

    fn with_tracker<R>(
        &self,
        apply: impl FnOnce(&mut Tracker) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut guard = self
            .tracker
            .lock()
            .map_err(|_| BackendError::Server("tracker state poisoned".to_string()))?;
        apply(&mut guard)
    }
}

#[async_trait]
impl CompletionBackend for LedgerBackend {
    async fn fetch_tasks_and_completions(
        &self,
        site_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        year: i32,
    ) -> Result<Vec<TaskWithCompletions>, BackendError> {
        self.with_tracker(|tracker| {
            if tracker.site(site_id).is_none() {
                return Err(TrackerError::UnknownSite(site_id.to_string()).into());
            }
            Ok(tracker
                .tasks_for_site(site_id)
                .into_iter()
                .map(|task| TaskWithCompletions {
                    task: task.clone(),
                    completions: tracker.completions_for_task(&task.id, start, end, year),
                })
                .collect())
        })
    }

    async fn create_completion(
        &self,
        request: NewCompletion,
    ) -> Result<CreatedCompletion, BackendError> {
        if request.status != CompletionStatus::Completed {
            return Err(BackendError::Server(
                "only completed records can be created".to_string(),
            ));
        }

        self.with_tracker(|tracker| {
            let id = tracker.add_completion(&request.task_id, request.date)?;
            if let Err(err) = save_tracker(&self.path, tracker) {
                tracker.remove_completions(std::slice::from_ref(&id));
                return Err(err.into());
            }
            tracing::debug!(record_id = %id, task_id = %request.task_id, date = %request.date, "created completion");
            Ok(CreatedCompletion { id })
        })
    }

    async fn delete_completions(&self, record_ids: &[String]) -> Result<DeleteOutcome, BackendError> {
        self.with_tracker(|tracker| {
            let snapshot = tracker.records.clone();
            let removed = tracker.remove_completions(record_ids);
            if removed > 0 {
                if let Err(err) = save_tracker(&self.path, tracker) {
                    tracker.records = snapshot;
                    return Err(err.into());
                }
            }
            tracing::debug!(requested = record_ids.len(), removed, "deleted completions");
            Ok(DeleteOutcome {
                success: removed > 0,
            })
        })
    }
}

mod plain_day {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::domain::{DAY_FORMAT, parse_day};

    pub fn serialize<S: Serializer>(day: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&day.format(DAY_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_day(&raw).map_err(D::Error::custom)
    }
}
