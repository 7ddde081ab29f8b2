//! Golden signature files for headless regression runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tick: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenRun {
    pub checkpoints: Vec<Checkpoint>,
    #[serde(rename = "final")]
    pub final_signature: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenFile {
    #[serde(default)]
    pub runs: BTreeMap<String, GoldenRun>,
}

#[derive(Debug, Error)]
pub enum GoldenError {
    #[error("failed to read golden file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse golden file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to write golden file {path}: {message}")]
    Write { path: String, message: String },
    #[error("golden file {path} has no entry for {key}")]
    MissingRun { path: String, key: String },
    #[error("golden mismatch for {key} at {at}: expected {expected}, actual {actual}")]
    Mismatch {
        key: String,
        at: String,
        expected: String,
        actual: String,
    },
}

pub fn golden_key(seed: u64, agents: usize, ticks: u64) -> String {
    format!("seed={seed},agents={agents},ticks={ticks}")
}

pub fn load_golden(path: &Path) -> Result<GoldenFile, GoldenError> {
    let text = fs::read_to_string(path).map_err(|err| GoldenError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| GoldenError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Inserts or replaces `key` in the golden file, creating it if needed.
pub fn record_golden(path: &Path, key: &str, run: GoldenRun) -> Result<(), GoldenError> {
    let mut file = if path.exists() {
        load_golden(path)?
    } else {
        GoldenFile::default()
    };
    file.runs.insert(key.to_string(), run);

    let write_err = |message: String| GoldenError::Write {
        path: path.display().to_string(),
        message,
    };
    let mut text = serde_json::to_string_pretty(&file).map_err(|err| write_err(err.to_string()))?;
    text.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| write_err(err.to_string()))?;
    }
    fs::write(path, text).map_err(|err| write_err(err.to_string()))
}

pub fn verify_golden(path: &Path, key: &str, actual: &GoldenRun) -> Result<(), GoldenError> {
    let file = load_golden(path)?;
    let expected = file.runs.get(key).ok_or_else(|| GoldenError::MissingRun {
        path: path.display().to_string(),
        key: key.to_string(),
    })?;
    compare_runs(key, expected, actual)
}

pub fn compare_runs(
    key: &str,
    expected: &GoldenRun,
    actual: &GoldenRun,
) -> Result<(), GoldenError> {
    let mismatch = |at: String, expected: String, actual: String| GoldenError::Mismatch {
        key: key.to_string(),
        at,
        expected,
        actual,
    };

    if expected.checkpoints.len() != actual.checkpoints.len() {
        return Err(mismatch(
            "checkpoint count".to_string(),
            expected.checkpoints.len().to_string(),
            actual.checkpoints.len().to_string(),
        ));
    }
    for (e, a) in expected.checkpoints.iter().zip(&actual.checkpoints) {
        if e.tick != a.tick {
            return Err(mismatch(
                "checkpoint tick".to_string(),
                e.tick.to_string(),
                a.tick.to_string(),
            ));
        }
        if e.signature != a.signature {
            return Err(mismatch(
                format!("tick {}", e.tick),
                e.signature.clone(),
                a.signature.clone(),
            ));
        }
    }
    if expected.final_signature != actual.final_signature {
        return Err(mismatch(
            "final".to_string(),
            expected.final_signature.clone(),
            actual.final_signature.clone(),
        ));
    }
    Ok(())
}
