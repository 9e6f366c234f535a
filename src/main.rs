use std::error::Error;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};

use task_tracker::aggregate::{MonthSummary, task_counts_for_week};
use task_tracker::backend::{CompletionBackend, LedgerBackend};
use task_tracker::calendar::{MonthPartition, WeekKind, partition};
use task_tracker::completion::{CompletionStore, SharedStore, build_store};
use task_tracker::config::{resolve_site, resolve_tracker_path};
use task_tracker::domain::{Period, Task, TaskWithCompletions, completion_key, group_by_period, parse_day};
use task_tracker::logging::init_logging;
use task_tracker::storage::{load_tracker, save_tracker};
use task_tracker::toggle::{AbortSignal, ToggleCoordinator, ToggleOutcome};

#[derive(Debug, Parser)]
#[command(name = "task-tracker", about = "Monthly checklist tracker for site tasks")]
struct Cli {
	#[arg(long)]
	tracker: Option<PathBuf>,
	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	AddSite {
		#[arg(long)]
		name: String,
	},
	AddTask {
		#[arg(long)]
		site: Option<String>,
		#[arg(long)]
		name: String,
		#[arg(long)]
		period: Period,
	},
	ListTasks {
		#[arg(long)]
		site: Option<String>,
	},
	Calendar {
		#[arg(long)]
		site: Option<String>,
		#[arg(long)]
		year: Option<i32>,
		#[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
		month: Option<u32>,
	},
	Toggle {
		#[arg(long)]
		site: Option<String>,
		#[arg(long)]
		task: String,
		#[arg(long)]
		day: String,
	},
}

#[tokio::main]
async fn main() {
	if let Err(err) = init_logging() {
		eprintln!("warning: failed to initialize logging: {err}");
	}

	if let Err(err) = run().await {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

async fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let tracker_path = resolve_tracker_path(cli.tracker);
	tracing::debug!(path = %tracker_path.display(), "resolved tracker file");

	match cli.command {
		Command::Init => {
			let tracker = load_tracker(&tracker_path)?;
			save_tracker(&tracker_path, &tracker)?;
			println!("initialized tracker at {}", tracker_path.display());
		}
		Command::AddSite { name } => {
			let mut tracker = load_tracker(&tracker_path)?;
			let site_id = tracker.add_site(name)?;
			save_tracker(&tracker_path, &tracker)?;
			println!("created site {site_id}");
		}
		Command::AddTask { site, name, period } => {
			let site = required_site(site)?;
			let mut tracker = load_tracker(&tracker_path)?;
			let task_id = tracker.add_task(site, name, period)?;
			save_tracker(&tracker_path, &tracker)?;
			println!("created task {task_id}");
		}
		Command::ListTasks { site } => {
			print_tasks(&tracker_path, resolve_site(site))?;
		}
		Command::Calendar { site, year, month } => {
			let site = required_site(site)?;
			let today = Local::now().date_naive();
			let year = year.unwrap_or(today.year());
			let month0 = month.map(|month| month - 1).unwrap_or(today.month0());
			let backend = LedgerBackend::open(tracker_path)?;
			let month = partition(year, month0)?;
			let entries = fetch_month(&backend, &site, &month).await?;
			print_calendar(&month, &entries);
		}
		Command::Toggle { site, task, day } => {
			let site = required_site(site)?;
			let day = parse_day(&day)?;
			let backend = LedgerBackend::open(tracker_path)?;
			toggle_day(backend, &site, &task, day).await?;
		}
	}

	Ok(())
}

fn required_site(site: Option<String>) -> Result<String, Box<dyn Error>> {
	resolve_site(site).ok_or_else(|| "no site selected: pass --site <id> or set TASK_TRACKER_SITE".into())
}

async fn fetch_month(
	backend: &impl CompletionBackend,
	site: &str,
	month: &MonthPartition,
) -> Result<Vec<TaskWithCompletions>, Box<dyn Error>> {
	let first = month.month.first_day();
	let last = month.month.last_day();
	Ok(backend
		.fetch_tasks_and_completions(site, first, last, month.month.year())
		.await?)
}

async fn toggle_day(
	backend: LedgerBackend,
	site: &str,
	task_id: &str,
	day: NaiveDate,
) -> Result<(), Box<dyn Error>> {
	let month = partition(day.year(), day.month0())?;
	let entries = fetch_month(&backend, site, &month).await?;
	if !entries.iter().any(|entry| entry.task.id == task_id) {
		return Err(format!("task {task_id} not found for site {site}").into());
	}

	let abort = AbortSignal::new();
	let coordinator =
		ToggleCoordinator::new(backend, SharedStore::default()).with_abort_signal(abort.clone());
	coordinator.reseed(&entries);

	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			abort.abort();
		}
	});

	let key = completion_key(task_id, &day);
	let currently_checked = coordinator.store().is_checked(&key);
	let outcome = coordinator.toggle(task_id, day, currently_checked).await?;

	let verb = match outcome {
		ToggleOutcome::Checked => "checked",
		ToggleOutcome::Unchecked => "unchecked",
	};
	println!("{verb} {task_id} on {}", day.format("%Y-%m-%d"));

	let tasks = entries.into_iter().map(|entry| entry.task).collect::<Vec<_>>();
	let summary = MonthSummary::build(&tasks, &coordinator.store().snapshot(), &month);
	if let Some(counts) = summary.day(day) {
		println!(
			"{} of {} tasks done that day ({}%)",
			counts.completed,
			counts.total,
			counts.percentage()
		);
	}

	Ok(())
}

fn print_tasks(tracker_path: &Path, site: Option<String>) -> Result<(), Box<dyn Error>> {
	let tracker = load_tracker(tracker_path)?;
	if tracker.header.sites.is_empty() {
		println!("no sites yet");
		return Ok(());
	}

	for candidate in &tracker.header.sites {
		if site.as_deref().is_some_and(|site| site != candidate.id) {
			continue;
		}
		println!("{} | {}", candidate.id, candidate.name);
		let tasks = tracker
			.tasks_for_site(&candidate.id)
			.into_iter()
			.cloned()
			.collect::<Vec<_>>();
		for (period, group) in group_by_period(&tasks) {
			for task in group {
				println!("  {} | {:<7} | {}", task.id, period, task.name);
			}
		}
	}

	Ok(())
}

fn print_calendar(month: &MonthPartition, entries: &[TaskWithCompletions]) {
	let tasks = entries
		.iter()
		.map(|entry| entry.task.clone())
		.collect::<Vec<_>>();
	let store = build_store(entries);
	let summary = MonthSummary::build(&tasks, &store, month);

	println!("{}", month.month.first_day().format("%B %Y"));
	println!("       Mon     Tue     Wed     Thu     Fri     Sat     Sun     | week");
	for (week_summary, (kind, week)) in summary.weeks.iter().zip(month.labelled_weeks()) {
		let label = match kind {
			WeekKind::LeadingBoundary => "start",
			WeekKind::Full => "",
			WeekKind::TrailingBoundary => "end",
		};
		let cells = week
			.slots()
			.iter()
			.map(|slot| match slot.and_then(|date| summary.day(date).map(|counts| (date, counts))) {
				Some((date, counts)) => format!("{:>2} {:>3}%", date.day(), counts.percentage()),
				None => " ".repeat(7),
			})
			.collect::<Vec<_>>()
			.join(" ");
		println!(
			"{label:<6} {cells} | {:>3}%",
			week_summary.totals.percentage()
		);
	}

	if tasks.is_empty() {
		println!("\nno tasks for this site");
	} else {
		print_task_rows(month, &tasks, &store);
	}

	println!(
		"\ncompleted: {}% | not completed: {}% ({} of {} task-days)",
		summary.totals.percentage(),
		summary.totals.not_completed_percentage(),
		summary.totals.completed,
		summary.totals.total
	);
}

fn print_task_rows(month: &MonthPartition, tasks: &[Task], store: &CompletionStore) {
	for (period, group) in group_by_period(tasks) {
		if group.is_empty() {
			continue;
		}
		println!("\n{period}:");
		for task in group {
			let weeks = month
				.weeks()
				.map(|week| {
					let marks = week
						.days()
						.map(|date| if store.is_task_checked(&task.id, &date) { 'x' } else { '.' })
						.collect::<String>();
					let counts = task_counts_for_week(task, store, week);
					format!("{marks} {}/{}", counts.completed, counts.total)
				})
				.collect::<Vec<_>>()
				.join(" | ");
			println!("  {:<24} {weeks}", task.name);
		}
	}
}
