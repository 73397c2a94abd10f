//! Persistence of the build graph between invocations, as a YAML side-car
//! file next to the root document.

use crate::file::{self, Fingerprint};
use crate::options::{Job, Table};
use crate::progress::{Event, Message, Severity};
use crate::registry::Registry;
use crate::rule::{Action, Command, Phase};
use crate::state::{FileId, State};
use anyhow::Context;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bumped when the record layout changes; other versions are ignored.
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cache {
    pub version: u32,
    pub file_path: String,
    #[serde(default)]
    pub options: Table,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Modification time in nanoseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_yaml::Value>,
    #[serde(default)]
    pub job_names: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    pub name: String,
    pub command: Command,
    pub phase: Phase,
    #[serde(default)]
    pub job_name: Job,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Actions still pending when the cache was written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

/// `<stem>-cache.yaml` beside the root document.
pub fn cache_path(state: &State) -> PathBuf {
    let root = state.root_path();
    let name = root.rsplit('/').next().unwrap_or(root);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    state.root_dir().join(format!("{}-cache.yaml", stem))
}

/// Capture the graph as a cache record.
pub fn snapshot(state: &State) -> Cache {
    let files = state
        .files()
        .filter(|(_, f)| f.exists())
        .map(|(_, f)| {
            let record = FileRecord {
                timestamp: f.fingerprint.mtime.as_nanos(),
                hash: f.fingerprint.hash.clone(),
                file_type: f.file_type.clone(),
                sub_type: f.sub_type.clone(),
                value: f.value.clone(),
                job_names: f.jobs.iter().cloned().collect(),
            };
            (f.path.clone(), record)
        })
        .collect();
    let path = |id: &FileId| state.file(*id).path.clone();
    let rules = state
        .rules()
        .map(|(_, rule)| RuleRecord {
            name: rule.name().to_owned(),
            command: rule.command,
            phase: rule.phase,
            job_name: rule.job.clone(),
            parameters: rule.parameters.iter().map(path).collect(),
            inputs: rule.inputs.iter().map(path).collect(),
            outputs: rule.outputs.iter().map(path).collect(),
            actions: rule.pending().collect(),
        })
        .collect();
    Cache {
        version: VERSION,
        file_path: state.root_path().to_owned(),
        options: state.options().persisted(),
        files,
        rules,
    }
}

/// Write the cache, replacing any previous one atomically.
pub fn save(state: &State) -> anyhow::Result<PathBuf> {
    let path = cache_path(state);
    let cache = snapshot(state);
    let text = serde_yaml::to_string(&cache)?;
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, text).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("rename to {}", path.display()))?;
    debug!(path = %path.display(), files = cache.files.len(), rules = cache.rules.len(), "cache saved");
    Ok(path)
}

/// Read a cache file.  A missing file, or one written by another version,
/// is None.
pub fn read(path: &Path) -> anyhow::Result<Option<Cache>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let cache: Cache =
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    if cache.version != VERSION {
        info!(version = cache.version, "ignoring cache from another version");
        return Ok(None);
    }
    Ok(Some(cache))
}

/// What a restore brought back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Restored {
    pub files: usize,
    pub rules: usize,
    pub dropped: usize,
}

/// Seed the State from a cache record.
pub fn restore(state: &mut State, registry: &Registry, cache: &Cache) -> Restored {
    let mut restored = Restored::default();
    if cache.file_path != state.root_path() {
        info!(path = %cache.file_path, "cache is for another document");
        return restored;
    }

    let mut seeded = Vec::new();
    for (path, record) in &cache.files {
        if let Some(id) = state.get_cached_file(path, record) {
            seeded.push(id);
        }
    }
    restored.files = seeded.len();

    // Hashing is the expensive part; do it in parallel, then apply in order.
    let work: Vec<(FileId, PathBuf, Fingerprint)> = seeded
        .iter()
        .filter_map(|&id| {
            let f = state.file(id);
            (!f.is_virtual).then(|| (id, f.resolved.clone(), f.fingerprint.clone()))
        })
        .collect();
    let observed: Vec<(FileId, std::io::Result<Fingerprint>)> = work
        .par_iter()
        .map(|(id, resolved, previous)| (*id, file::observe(resolved, previous)))
        .collect();
    for (id, result) in observed {
        match result {
            Ok(fingerprint) => {
                if state.file_mut(id).apply_fingerprint(fingerprint) {
                    let path = state.file(id).path.clone();
                    state.emit(Event::FileChanged(path));
                }
            }
            Err(err) => {
                let path = state.file(id).path.clone();
                state.log(Message::new(
                    Severity::Warning,
                    format!("unable to read {}: {}", path, err),
                ));
            }
        }
    }

    if cache.options != state.options().persisted() {
        state.log(Message::new(
            Severity::Info,
            "options changed since the last build; discarding cached rules",
        ));
        return restored;
    }
    for record in &cache.rules {
        match state.add_cached_rule(registry, record) {
            Some(_) => restored.rules += 1,
            None => restored.dropped += 1,
        }
    }
    state.reset_root_jobs();
    restored
}

/// Read and restore the cache for `state`'s document, if there is one.
pub fn load(state: &mut State, registry: &Registry) -> anyhow::Result<Option<Restored>> {
    let path = cache_path(state);
    let Some(cache) = read(&path)? else {
        return Ok(None);
    };
    let restored = restore(state, registry, &cache);
    debug!(path = %path.display(), ?restored, "cache loaded");
    Ok(Some(restored))
}
