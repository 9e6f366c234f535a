use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ID_LEN: usize = 8;
pub const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Morning,
    Day,
    Evening,
    #[serde(other)]
    Unknown,
}

impl Period {
    pub const KNOWN: [Period; 3] = [Period::Morning, Period::Day, Period::Evening];

    pub fn label(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Day => "day",
            Period::Evening => "evening",
            Period::Unknown => "unknown",
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(Period::Morning),
            "day" => Ok(Period::Day),
            "evening" => Ok(Period::Evening),
            other => Err(format!("unknown period: {other} (expected morning, day or evening)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub site_id: String,
    pub name: String,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    Completed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub id: String,
    pub task_id: String,
    #[serde(with = "wire_day")]
    pub date: NaiveDate,
    pub status: CompletionStatus,
}

impl CompletionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == CompletionStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithCompletions {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub completions: Vec<CompletionRecord>,
}

/// Anything that can be pinned to a single calendar day.
///
/// Zoned timestamps resolve to the wall-clock date in their own offset, so the
/// time of day and the offset never leak into the result.
pub trait CalendarDay {
    fn calendar_day(&self) -> NaiveDate;
}

impl CalendarDay for NaiveDate {
    fn calendar_day(&self) -> NaiveDate {
        *self
    }
}

impl CalendarDay for NaiveDateTime {
    fn calendar_day(&self) -> NaiveDate {
        self.date()
    }
}

impl<Tz: TimeZone> CalendarDay for DateTime<Tz> {
    fn calendar_day(&self) -> NaiveDate {
        self.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompletionKey(String);

impl CompletionKey {
    pub fn new(task_id: &str, date: &impl CalendarDay) -> Self {
        // The day suffix is fixed-width, so task ids containing '@' stay unambiguous.
        Self(format!(
            "{task_id}@{}",
            date.calendar_day().format(DAY_FORMAT)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CompletionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn completion_key(task_id: &str, date: &impl CalendarDay) -> CompletionKey {
    CompletionKey::new(task_id, date)
}

pub fn group_by_period(tasks: &[Task]) -> BTreeMap<Period, Vec<&Task>> {
    let mut groups: BTreeMap<Period, Vec<&Task>> = Period::KNOWN
        .iter()
        .map(|period| (*period, Vec::new()))
        .collect();

    let mut dropped = 0usize;
    for task in tasks {
        match groups.get_mut(&task.period) {
            Some(bucket) => bucket.push(task),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(dropped, "tasks with an unknown period were not grouped");
    }

    groups
}

pub fn parse_day(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    let raw = raw.trim();
    match NaiveDate::parse_from_str(raw, DAY_FORMAT) {
        Ok(day) => Ok(day),
        Err(day_err) => DateTime::parse_from_rfc3339(raw)
            .map(|timestamp| timestamp.calendar_day())
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|timestamp| timestamp.calendar_day())
            })
            .map_err(|_| day_err),
    }
}

mod wire_day {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{DAY_FORMAT, parse_day};

    pub fn serialize<S: Serializer>(day: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&day.format(DAY_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_day(&raw).map_err(|err| D::Error::custom(format!("invalid date {raw:?}: {err}")))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("site not found: {0}")]
    UnknownSite(String),
    #[error("task not found: {0}")]
    UnknownTask(String),
    #[error("{0} cannot be empty")]
    EmptyName(&'static str),
    #[error("task {task_id} is already completed on {day}")]
    AlreadyCompleted { task_id: String, day: NaiveDate },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerHeader {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sites: Vec<Site>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TrackerHeader {
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            created_at: Utc::now(),
            sites: Vec::new(),
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tracker {
    pub header: TrackerHeader,
    pub records: Vec<CompletionRecord>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            header: TrackerHeader::new(),
            records: Vec::new(),
        }
    }

    pub fn site(&self, id: &str) -> Option<&Site> {
        self.header.sites.iter().find(|site| site.id == id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.header.tasks.iter().find(|task| task.id == id)
    }

    pub fn tasks_for_site(&self, site_id: &str) -> Vec<&Task> {
        self.header
            .tasks
            .iter()
            .filter(|task| task.site_id == site_id)
            .collect()
    }

    pub fn add_site(&mut self, name: String) -> Result<String, TrackerError> {
        let name = required_name(name, "site name")?;
        let id = generate_id();
        self.header.sites.push(Site {
            id: id.clone(),
            name,
        });
        Ok(id)
    }

    pub fn add_task(
        &mut self,
        site_id: String,
        name: String,
        period: Period,
    ) -> Result<String, TrackerError> {
        if self.site(&site_id).is_none() {
            return Err(TrackerError::UnknownSite(site_id));
        }
        let name = required_name(name, "task name")?;

        let id = generate_id();
        self.header.tasks.push(Task {
            id: id.clone(),
            site_id,
            name,
            period,
        });
        Ok(id)
    }

    pub fn completions_for_task(
        &self,
        task_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        year: i32,
    ) -> Vec<CompletionRecord> {
        self.records
            .iter()
            .filter(|record| record.task_id == task_id)
            .filter(|record| record.date >= start && record.date <= end)
            .filter(|record| record.date.year() == year)
            .cloned()
            .collect()
    }

    pub fn add_completion(&mut self, task_id: &str, day: NaiveDate) -> Result<String, TrackerError> {
        if self.task(task_id).is_none() {
            return Err(TrackerError::UnknownTask(task_id.to_string()));
        }

        let duplicate = self
            .records
            .iter()
            .any(|record| record.task_id == task_id && record.date == day && record.is_completed());
        if duplicate {
            return Err(TrackerError::AlreadyCompleted {
                task_id: task_id.to_string(),
                day,
            });
        }

        let id = generate_id();
        self.records.push(CompletionRecord {
            id: id.clone(),
            task_id: task_id.to_string(),
            date: day,
            status: CompletionStatus::Completed,
        });
        Ok(id)
    }

    pub fn remove_completions(&mut self, record_ids: &[String]) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !record_ids.contains(&record.id));
        before - self.records.len()
    }
}

fn required_name(name: String, field: &'static str) -> Result<String, TrackerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::EmptyName(field));
    }
    Ok(trimmed.to_string())
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}
