//! JSON checkpoints: `ckpt-<unix_ms>[-name].json` plus a `latest.json` copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::evolution::GenerationSummary;
use crate::network::Genome;
use crate::rig::RigBlueprint;

const CHECKPOINT_VERSION: u32 = 1;
const LATEST_FILE: &str = "latest.json";

/// Everything needed to resume a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    /// Index of the generation the genomes belong to.
    pub generation: usize,
    pub best_fitness_ever: f32,
    pub genomes: Vec<Genome>,
    pub best_genome: Option<Genome>,
    pub best_genome_fitness: Option<f32>,
    #[serde(default)]
    pub history: Vec<GenerationSummary>,
    pub blueprint: RigBlueprint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointFile {
    pub version: u32,
    pub id: String,
    pub created_at_unix_ms: u128,
    pub snapshot: RuntimeSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub id: String,
    pub created_at_unix_ms: u128,
    pub generation: usize,
    pub best_fitness_ever: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedCheckpoint {
    pub id: String,
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn ensure_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            SimError::Checkpoint(format!(
                "failed creating checkpoint directory '{}': {err}",
                self.dir.display()
            ))
        })?;
        Ok(&self.dir)
    }

    pub fn save(&self, snapshot: &RuntimeSnapshot, name: Option<&str>) -> Result<SavedCheckpoint> {
        let dir = self.ensure_dir()?;
        let timestamp = now_unix_ms();
        let name_suffix = name
            .map(sanitize_checkpoint_name)
            .filter(|value| !value.is_empty())
            .map(|value| format!("-{value}"))
            .unwrap_or_default();
        let mut id = format!("ckpt-{timestamp}{name_suffix}");
        let mut attempt = 1;
        while dir.join(format!("{id}.json")).exists() {
            attempt += 1;
            id = format!("ckpt-{timestamp}{name_suffix}-{attempt}");
        }
        let path = dir.join(format!("{id}.json"));
        let checkpoint = CheckpointFile {
            version: CHECKPOINT_VERSION,
            id: id.clone(),
            created_at_unix_ms: timestamp,
            snapshot: snapshot.clone(),
        };
        write_checkpoint_file(&path, &checkpoint)?;
        write_checkpoint_file(&dir.join(LATEST_FILE), &checkpoint)?;
        Ok(SavedCheckpoint {
            id,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let dir = self.ensure_dir()?;
        let entries = fs::read_dir(dir).map_err(|err| {
            SimError::Checkpoint(format!(
                "failed listing checkpoints in '{}': {err}",
                dir.display()
            ))
        })?;
        let mut summaries = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|value| value.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json || path.file_name().and_then(|v| v.to_str()) == Some(LATEST_FILE) {
                continue;
            }
            if let Ok(file) = read_checkpoint_file(&path) {
                summaries.push(CheckpointSummary {
                    id: file.id,
                    created_at_unix_ms: file.created_at_unix_ms,
                    generation: file.snapshot.generation,
                    best_fitness_ever: file.snapshot.best_fitness_ever,
                });
            }
        }
        summaries.sort_by(|a, b| {
            b.created_at_unix_ms
                .cmp(&a.created_at_unix_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// Load by id, or the most recent save when `id` is `None`.
    pub fn load(&self, id: Option<&str>) -> Result<(String, RuntimeSnapshot)> {
        let dir = self.ensure_dir()?;
        let path = match id {
            Some(requested) => {
                if sanitize_checkpoint_name(requested) != requested {
                    return Err(SimError::Checkpoint(format!(
                        "invalid checkpoint id '{requested}'"
                    )));
                }
                dir.join(format!("{requested}.json"))
            }
            None => dir.join(LATEST_FILE),
        };
        if !path.exists() {
            return Err(SimError::Checkpoint(format!(
                "checkpoint file '{}' not found",
                path.display()
            )));
        }
        let checkpoint = read_checkpoint_file(&path)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(SimError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        checkpoint.snapshot.blueprint.validate()?;
        Ok((checkpoint.id, checkpoint.snapshot))
    }
}

pub fn sanitize_checkpoint_name(name: &str) -> String {
    let mut cleaned = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            cleaned.push(ch);
        } else if ch.is_ascii_whitespace() {
            cleaned.push('-');
        }
    }
    cleaned.trim_matches('-').to_string()
}

fn write_checkpoint_file(path: &Path, checkpoint: &CheckpointFile) -> Result<()> {
    let payload = serde_json::to_vec_pretty(checkpoint)?;
    fs::write(path, payload).map_err(|err| {
        SimError::Checkpoint(format!(
            "failed writing checkpoint '{}': {err}",
            path.display()
        ))
    })
}

fn read_checkpoint_file(path: &Path) -> Result<CheckpointFile> {
    let payload = fs::read(path).map_err(|err| {
        SimError::Checkpoint(format!(
            "failed reading checkpoint '{}': {err}",
            path.display()
        ))
    })?;
    serde_json::from_slice(&payload).map_err(|err| {
        SimError::Checkpoint(format!(
            "failed parsing checkpoint '{}': {err}",
            path.display()
        ))
    })
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
