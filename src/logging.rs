use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_LEVEL_ENV: &str = "TASK_TRACKER_LOG";

pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
	let stderr_layer = fmt::layer()
		.with_writer(std::io::stderr)
		.with_ansi(std::io::stderr().is_terminal())
		.with_target(true);

	tracing_subscriber::registry()
		.with(build_log_filter())
		.with(stderr_layer)
		.try_init()?;

	tracing::debug!("logging initialized");
	Ok(())
}

const DEFAULT_LOG_LEVEL: &str = "warn";

fn build_log_filter() -> EnvFilter {
	let level = log_level(std::env::var(LOG_LEVEL_ENV).ok().as_deref());
	EnvFilter::new(format!("{level},task_tracker={level}"))
}

fn log_level(raw: Option<&str>) -> &'static str {
	raw.and_then(normalize_log_level).unwrap_or(DEFAULT_LOG_LEVEL)
}

fn normalize_log_level(raw: &str) -> Option<&'static str> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"trace" => Some("trace"),
		"debug" => Some("debug"),
		"info" => Some("info"),
		"warn" | "warning" => Some("warn"),
		"error" => Some("error"),
		_ => None,
	}
}
