use chrono::NaiveDate;

use crate::calendar::{MonthPartition, Week, WeekKind};
use crate::completion::CompletionStore;
use crate::domain::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayCounts {
    pub total: usize,
    pub completed: usize,
}

impl DayCounts {
    pub fn percentage(&self) -> u32 {
        percentage(self.completed, self.total)
    }

    pub fn not_completed_percentage(&self) -> u32 {
        not_completed_percentage(self.completed, self.total)
    }

    fn add(self, other: DayCounts) -> DayCounts {
        DayCounts {
            total: self.total + other.total,
            completed: self.completed + other.completed,
        }
    }
}

pub fn percentage(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((completed * 200 + total) / (total * 2)) as u32
}

/// Rounded on its own, so it need not add up to 100 with `percentage`.
pub fn not_completed_percentage(completed: usize, total: usize) -> u32 {
    percentage(total.saturating_sub(completed), total)
}

pub fn counts_for_day(tasks: &[Task], store: &CompletionStore, date: NaiveDate) -> DayCounts {
    let completed = tasks
        .iter()
        .filter(|task| store.is_task_checked(&task.id, &date))
        .count();
    DayCounts {
        total: tasks.len(),
        completed,
    }
}

pub fn counts_for_week(tasks: &[Task], store: &CompletionStore, week: &Week) -> DayCounts {
    week.days()
        .map(|date| counts_for_day(tasks, store, date))
        .fold(DayCounts::default(), DayCounts::add)
}

pub fn counts_for_month(
    tasks: &[Task],
    store: &CompletionStore,
    partition: &MonthPartition,
) -> DayCounts {
    partition
        .weeks()
        .map(|week| counts_for_week(tasks, store, week))
        .fold(DayCounts::default(), DayCounts::add)
}

pub fn task_counts_for_week(task: &Task, store: &CompletionStore, week: &Week) -> DayCounts {
    counts_for_week(std::slice::from_ref(task), store, week)
}

pub fn percentage_for_week(tasks: &[Task], store: &CompletionStore, week: &Week) -> u32 {
    counts_for_week(tasks, store, week).percentage()
}

pub fn percentage_for_month(
    tasks: &[Task],
    store: &CompletionStore,
    partition: &MonthPartition,
) -> u32 {
    counts_for_month(tasks, store, partition).percentage()
}

#[derive(Debug, Clone)]
pub struct WeekSummary {
    pub kind: WeekKind,
    pub days: Vec<(NaiveDate, DayCounts)>,
    pub totals: DayCounts,
}

#[derive(Debug, Clone)]
pub struct MonthSummary {
    pub weeks: Vec<WeekSummary>,
    pub totals: DayCounts,
}

impl MonthSummary {
    pub fn build(tasks: &[Task], store: &CompletionStore, partition: &MonthPartition) -> Self {
        let weeks = partition
            .labelled_weeks()
            .map(|(kind, week)| {
                let days = week
                    .days()
                    .map(|date| (date, counts_for_day(tasks, store, date)))
                    .collect::<Vec<_>>();
                let totals = days
                    .iter()
                    .map(|(_, counts)| *counts)
                    .fold(DayCounts::default(), DayCounts::add);
                WeekSummary { kind, days, totals }
            })
            .collect::<Vec<_>>();
        let totals = weeks
            .iter()
            .map(|week| week.totals)
            .fold(DayCounts::default(), DayCounts::add);

        Self { weeks, totals }
    }

    pub fn day(&self, date: NaiveDate) -> Option<DayCounts> {
        self.weeks
            .iter()
            .flat_map(|week| week.days.iter())
            .find(|(day, _)| *day == date)
            .map(|(_, counts)| *counts)
    }
}
