//! A File is one physical or virtual artifact known to the build, along
//! with what's needed to tell whether it changed.

use crate::classify::Classification;
use crate::fs::{self, MTime};
use crate::options::Job;
use crate::state::RuleId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What we last observed about a file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime: MTime,
    pub hash: Option<String>,
}

impl Fingerprint {
    pub fn missing() -> Self {
        Fingerprint {
            mtime: MTime::Missing,
            hash: None,
        }
    }

    /// Whether two fingerprints describe different contents.  Timestamps
    /// alone don't count: touching a file without changing it is no change.
    pub fn differs(&self, other: &Fingerprint) -> bool {
        let exists = |fp: &Fingerprint| fp.mtime != MTime::Missing;
        exists(self) != exists(other) || self.hash != other.hash
    }
}

/// Observe the current fingerprint of an on-disk file.  Contents are only
/// hashed if the mtime moved since `previous`.
pub fn observe(resolved: &Path, previous: &Fingerprint) -> std::io::Result<Fingerprint> {
    let mtime = fs::stat(resolved)?;
    if mtime == MTime::Missing {
        return Ok(Fingerprint::missing());
    }
    if mtime == previous.mtime && previous.hash.is_some() {
        return Ok(previous.clone());
    }
    let hash = match fs::hash_file(resolved) {
        Ok(hash) => Some(hash),
        // Deleted between stat and open.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Fingerprint::missing())
        }
        Err(err) => return Err(err),
    };
    Ok(Fingerprint { mtime, hash })
}

#[derive(Debug)]
pub struct File {
    /// Logical path: relative to the project root when inside it.
    pub path: String,
    pub resolved: PathBuf,
    /// A named value container with no backing artifact.
    pub is_virtual: bool,
    pub fingerprint: Fingerprint,
    pub file_type: Option<String>,
    pub sub_type: Option<String>,
    /// Tool-specific parsed payload, e.g. a parsed log.
    pub value: Option<serde_yaml::Value>,
    pub jobs: BTreeSet<Job>,
    /// Rules that read this file.
    pub(crate) consumers: Vec<RuleId>,
    /// Rules that write this file.
    pub(crate) producers: Vec<RuleId>,
    /// Whether discovery has considered this file in the current phase.
    pub(crate) analyzed: bool,
    /// Latched when a change is observed, cleared once propagated.
    pub(crate) updated: bool,
}

impl File {
    pub fn new(
        path: String,
        resolved: PathBuf,
        class: Classification,
        fingerprint: Fingerprint,
    ) -> Self {
        File {
            path,
            resolved,
            is_virtual: class.is_virtual,
            fingerprint,
            file_type: class.file_type,
            sub_type: class.sub_type,
            value: None,
            jobs: BTreeSet::new(),
            consumers: Vec::new(),
            producers: Vec::new(),
            analyzed: false,
            updated: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.is_virtual || self.fingerprint.mtime != MTime::Missing
    }

    pub fn is_type(&self, file_type: &str) -> bool {
        self.file_type.as_deref() == Some(file_type)
    }

    pub fn has_been_updated(&self) -> bool {
        self.updated
    }

    pub fn consumers(&self) -> &[RuleId] {
        &self.consumers
    }

    pub fn producers(&self) -> &[RuleId] {
        &self.producers
    }

    /// Accept a newly observed fingerprint, latching the update flag if the
    /// contents changed.  Returns whether they did.
    pub fn apply_fingerprint(&mut self, fingerprint: Fingerprint) -> bool {
        let changed = fingerprint.differs(&self.fingerprint);
        self.fingerprint = fingerprint;
        if changed {
            self.updated = true;
        }
        changed
    }

    /// Re-read the file; see apply_fingerprint.  Virtual files only change
    /// through set_value.
    pub fn refresh(&mut self) -> std::io::Result<bool> {
        if self.is_virtual {
            return Ok(false);
        }
        // Always rehash: a tool may rewrite a file within the filesystem's
        // timestamp granularity.
        let fingerprint = observe(&self.resolved, &Fingerprint::missing())?;
        Ok(self.apply_fingerprint(fingerprint))
    }

    /// Replace the parsed value, latching the update flag if it differs.
    pub fn set_value(&mut self, value: Option<serde_yaml::Value>) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.updated = true;
        true
    }

    /// Decode the value into a typed structure.
    pub fn value_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        let value = self.value.clone()?;
        serde_yaml::from_value(value).ok()
    }
}
