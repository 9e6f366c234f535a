use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use thiserror::Error;

use crate::domain::{Tracker, TrackerHeader};

const COMPLETIONS_MARKER: &str = "\n=== COMPLETIONS ===\n";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML header: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("failed to encode TOML header: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("failed to parse completion record on line {line}: {source}")]
    JsonDecode {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode completion record: {0}")]
    JsonEncode(serde_json::Error),
}

pub fn load_tracker(path: &Path) -> Result<Tracker, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Tracker::new()),
        Err(err) => return Err(err.into()),
    };

    if raw.trim().is_empty() {
        return Ok(Tracker::new());
    }

    let (header_blob, records_blob) = raw
        .split_once(COMPLETIONS_MARKER)
        .unwrap_or((raw.as_str(), ""));

    let header: TrackerHeader = toml::from_str(header_blob)?;
    let mut records = Vec::new();
    for (index, line) in records_blob.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| StorageError::JsonDecode {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }

    Ok(Tracker { header, records })
}

pub fn save_tracker(path: &Path, tracker: &Tracker) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let header = toml::to_string_pretty(&tracker.header)?;
    let mut file = fs::File::create(path)?;
    file.write_all(header.as_bytes())?;
    file.write_all(COMPLETIONS_MARKER.as_bytes())?;

    for record in &tracker.records {
        let line = serde_json::to_string(record).map_err(StorageError::JsonEncode)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }

    Ok(())
}
