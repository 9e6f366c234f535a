use chrono::{Datelike, Duration, NaiveDate};
use thiserror::Error;

pub const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("month index out of range: {0} (expected 0-11)")]
    MonthOutOfRange(u32),
    #[error("year out of range: {0}")]
    YearOutOfRange(i32),
}

/// A displayed month. `month` is zero-based (0 = January).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarMonth {
    year: i32,
    month: u32,
    first: NaiveDate,
    last: NaiveDate,
}

impl CalendarMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, PartitionError> {
        if month > 11 {
            return Err(PartitionError::MonthOutOfRange(month));
        }
        let out_of_range = || PartitionError::YearOutOfRange(year);
        let first = NaiveDate::from_ymd_opt(year, month + 1, 1).ok_or_else(out_of_range)?;
        let next_first = if month == 11 {
            year.checked_add(1)
                .and_then(|next_year| NaiveDate::from_ymd_opt(next_year, 1, 1))
        } else {
            NaiveDate::from_ymd_opt(year, month + 2, 1)
        };
        let last = match next_first {
            Some(next_first) => next_first.pred_opt().ok_or_else(out_of_range)?,
            None => NaiveDate::MAX,
        };
        // The leading week starts on the Monday before `first`.
        start_of_week(first).ok_or_else(out_of_range)?;
        Ok(Self {
            year,
            month,
            first,
            last,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month0(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last
    }

    pub fn days_in_month(&self) -> u32 {
        self.last.day()
    }
}

pub type Slot = Option<NaiveDate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Week {
    slots: [Slot; DAYS_PER_WEEK],
}

impl Week {
    fn starting(monday: NaiveDate, first: NaiveDate, last: NaiveDate) -> Self {
        let mut slots = [None; DAYS_PER_WEEK];
        for (offset, slot) in slots.iter_mut().enumerate() {
            *slot = monday
                .checked_add_signed(Duration::days(offset as i64))
                .filter(|day| *day >= first && *day <= last);
        }
        Self { slots }
    }

    pub fn slots(&self) -> &[Slot; DAYS_PER_WEEK] {
        &self.slots
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.slots.iter().flatten().copied()
    }

    pub fn day_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn empty_slots(&self) -> usize {
        DAYS_PER_WEEK - self.day_count()
    }

    pub fn is_full(&self) -> bool {
        self.empty_slots() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekKind {
    LeadingBoundary,
    Full,
    TrailingBoundary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthPartition {
    pub month: CalendarMonth,
    pub full_weeks: Vec<Week>,
    pub extra_start_week: Option<Week>,
    pub extra_end_week: Option<Week>,
}

impl MonthPartition {
    pub fn weeks(&self) -> impl Iterator<Item = &Week> {
        self.extra_start_week
            .iter()
            .chain(self.full_weeks.iter())
            .chain(self.extra_end_week.iter())
    }

    pub fn labelled_weeks(&self) -> impl Iterator<Item = (WeekKind, &Week)> {
        self.extra_start_week
            .iter()
            .map(|week| (WeekKind::LeadingBoundary, week))
            .chain(self.full_weeks.iter().map(|week| (WeekKind::Full, week)))
            .chain(
                self.extra_end_week
                    .iter()
                    .map(|week| (WeekKind::TrailingBoundary, week)),
            )
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks().flat_map(|week| week.days())
    }

    pub fn week_count(&self) -> usize {
        self.weeks().count()
    }
}

pub fn partition(year: i32, month: u32) -> Result<MonthPartition, PartitionError> {
    Ok(partition_month(CalendarMonth::new(year, month)?))
}

pub fn partition_month(month: CalendarMonth) -> MonthPartition {
    let first = month.first_day();
    let last = month.last_day();

    let mut extra_start_week = None;
    let mut full_weeks = Vec::new();
    let mut extra_end_week = None;

    // Checked in `CalendarMonth::new`.
    let mut monday = start_of_week(first).unwrap_or(first);
    loop {
        let week = Week::starting(monday, first, last);
        if week.is_full() {
            full_weeks.push(week);
        } else if week.slots()[0].is_none() {
            extra_start_week = Some(week);
        } else {
            extra_end_week = Some(week);
        }

        match monday.checked_add_signed(Duration::days(DAYS_PER_WEEK as i64)) {
            Some(next) if next <= last => monday = next,
            _ => break,
        }
    }

    MonthPartition {
        month,
        full_weeks,
        extra_start_week,
        extra_end_week,
    }
}

fn start_of_week(day: NaiveDate) -> Option<NaiveDate> {
    let days_from_monday = day.weekday().num_days_from_monday() as i64;
    day.checked_sub_signed(Duration::days(days_from_monday))
}
