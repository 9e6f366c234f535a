use std::env;
use std::fs;
use std::path::PathBuf;

const TRACKER_FILE: &str = "tracker.ledger";
const APP_DIR: &str = "task_tracker";

pub const TRACKER_PATH_ENV: &str = "TASK_TRACKER_PATH";
pub const STATE_DIR_ENV: &str = "TASK_TRACKER_STATE_DIR";
pub const SITE_ENV: &str = "TASK_TRACKER_SITE";

pub fn resolve_tracker_path(cli_path: Option<PathBuf>) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = non_empty_env(TRACKER_PATH_ENV) {
		return absolutize(PathBuf::from(path));
	}

	absolutize(state_dir().join(TRACKER_FILE))
}

pub fn resolve_site(cli_site: Option<String>) -> Option<String> {
	cli_site
		.filter(|site| !site.trim().is_empty())
		.or_else(|| non_empty_env(SITE_ENV))
}

fn state_dir() -> PathBuf {
	if let Some(path) = non_empty_env(STATE_DIR_ENV) {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = env::var_os("XDG_STATE_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path).join(".local").join("state").join(APP_DIR);
	}

	PathBuf::from(format!(".{APP_DIR}"))
}

fn non_empty_env(name: &str) -> Option<String> {
	env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn absolutize(path: PathBuf) -> PathBuf {
	let path = if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	};

	if path.exists() {
		fs::canonicalize(&path).unwrap_or(path)
	} else {
		path
	}
}
