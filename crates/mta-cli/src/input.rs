//! Desired-state and snapshot documents

use crate::error::{CliError, CliResult};
use mta_platform::PlatformSnapshot;
use mta_types::DesiredState;
use serde::de::DeserializeOwned;
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_desired(path: &Path) -> CliResult<DesiredState> {
    read_json(path)
}

/// A missing snapshot path means an empty platform.
pub fn load_snapshot(path: Option<&Path>) -> CliResult<PlatformSnapshot> {
    match path {
        Some(path) => read_json(path),
        None => Ok(PlatformSnapshot::default()),
    }
}

pub fn write_snapshot(path: &Path, snapshot: &PlatformSnapshot) -> CliResult<()> {
    let text = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, text).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
