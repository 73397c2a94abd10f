//! Build options: a flat namespace of named settings, layered from several
//! sources, with per-job overlays.
//!
//! Lookup order for a job is: the job's overlay, the command line, magic
//! comments, the config file, then the schema default.

use crate::error::{Error, Result};
use crate::rule::Command;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A job name; `None` is the default job, which has no overlay.
pub type Job = Option<String>;

pub type Table = BTreeMap<String, OptionValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    String(String),
    Strings(Vec<String>),
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Number(n) => write!(f, "{}", n),
            OptionValue::String(s) => f.write_str(s),
            OptionValue::Strings(v) => f.write_str(&v.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Number,
    String,
    Strings,
}

/// A schema default, in a form that can live in a static.
pub enum Fallback {
    None,
    Bool(bool),
    Number(f64),
    Str(&'static str),
    Strs(&'static [&'static str]),
}

impl Fallback {
    fn value(&self) -> Option<OptionValue> {
        Some(match self {
            Fallback::None => return None,
            Fallback::Bool(b) => OptionValue::Bool(*b),
            Fallback::Number(n) => OptionValue::Number(*n),
            Fallback::Str(s) => OptionValue::String((*s).to_owned()),
            Fallback::Strs(v) => OptionValue::Strings(v.iter().map(|s| (*s).to_owned()).collect()),
        })
    }
}

pub struct OptionSpec {
    pub name: &'static str,
    pub kind: Kind,
    pub default: Fallback,
    /// Legal values, if the option is an enumeration.
    pub values: &'static [&'static str],
    /// Commands whose rules read this option.
    pub commands: &'static [Command],
    pub description: &'static str,
}

use Command::*;

pub static SCHEMA: &[OptionSpec] = &[
    OptionSpec {
        name: "engine",
        kind: Kind::String,
        default: Fallback::Str("pdflatex"),
        values: &[],
        commands: &[Build],
        description: "LaTeX engine to run",
    },
    OptionSpec {
        name: "outputFormat",
        kind: Kind::String,
        default: Fallback::Str("pdf"),
        values: &["pdf", "dvi", "ps"],
        commands: &[Build, Clean, Scrub],
        description: "final output format",
    },
    OptionSpec {
        name: "outputDirectory",
        kind: Kind::String,
        default: Fallback::Str("."),
        values: &[],
        commands: &[Build, Clean, Graph, Log, Scrub],
        description: "directory for generated files, relative to the document",
    },
    OptionSpec {
        name: "jobNames",
        kind: Kind::Strings,
        default: Fallback::Strs(&[]),
        values: &[],
        commands: &[Build, Clean, Graph, Log, Scrub],
        description: "jobs to build from the document",
    },
    OptionSpec {
        name: "bibtexEngine",
        kind: Kind::String,
        default: Fallback::Str("bibtex"),
        values: &["bibtex", "bibtex8", "upbibtex"],
        commands: &[Build],
        description: "BibTeX program to run",
    },
    OptionSpec {
        name: "phaseCycles",
        kind: Kind::Number,
        default: Fallback::Number(20.0),
        values: &[],
        commands: &[Build, Clean, Graph, Log, Scrub],
        description: "evaluation cycles allowed per phase before giving up",
    },
    OptionSpec {
        name: "parallelism",
        kind: Kind::Number,
        default: Fallback::Number(0.0),
        values: &[],
        commands: &[Build],
        description: "concurrent tools; 0 means one per core",
    },
    OptionSpec {
        name: "loadCache",
        kind: Kind::Bool,
        default: Fallback::Bool(true),
        values: &[],
        commands: &[Load],
        description: "read the cache on load",
    },
    OptionSpec {
        name: "saveCache",
        kind: Kind::Bool,
        default: Fallback::Bool(true),
        values: &[],
        commands: &[Save],
        description: "write the cache on save",
    },
    OptionSpec {
        name: "severity",
        kind: Kind::String,
        default: Fallback::Str("warning"),
        values: &["trace", "info", "warning", "error"],
        commands: &[Build, Clean, Graph, Log, Scrub],
        description: "least severe message to report",
    },
    OptionSpec {
        name: "jobName",
        kind: Kind::String,
        default: Fallback::None,
        values: &[],
        commands: &[Build, Clean, Graph, Log, Scrub],
        description: "output base name; defaults to the job or document name",
    },
];

pub fn spec(name: &str) -> Option<&'static OptionSpec> {
    SCHEMA.iter().find(|spec| spec.name == name)
}

/// Names starting with '$' augment an environment variable of spawned tools.
pub fn is_environment(name: &str) -> bool {
    name.len() > 1 && name.starts_with('$')
}

fn kind_of(name: &str) -> Result<Kind> {
    if is_environment(name) {
        return Ok(Kind::Strings);
    }
    spec(name)
        .map(|spec| spec.kind)
        .ok_or_else(|| Error::UnknownOption(name.to_owned()))
}

/// Parse a raw string (command line, magic comment) according to the
/// option's kind.
pub fn parse_value(name: &str, raw: &str) -> Result<OptionValue> {
    let invalid = |reason: &str| Error::InvalidOption {
        name: name.to_owned(),
        value: raw.to_owned(),
        reason: reason.to_owned(),
    };
    let raw = raw.trim();
    let value = match kind_of(name)? {
        Kind::Bool => match raw {
            "true" | "yes" | "1" => OptionValue::Bool(true),
            "false" | "no" | "0" => OptionValue::Bool(false),
            _ => return Err(invalid("expected a boolean")),
        },
        Kind::Number => OptionValue::Number(raw.parse().map_err(|_| invalid("expected a number"))?),
        Kind::String => OptionValue::String(raw.to_owned()),
        Kind::Strings => OptionValue::Strings(
            raw.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_owned())
                .collect(),
        ),
    };
    check(name, &value)?;
    Ok(value)
}

/// Validate a value against the schema.
pub fn check(name: &str, value: &OptionValue) -> Result<()> {
    let invalid = |reason: String| Error::InvalidOption {
        name: name.to_owned(),
        value: value.to_string(),
        reason,
    };
    let kind = kind_of(name)?;
    let matches = matches!(
        (kind, value),
        (Kind::Bool, OptionValue::Bool(_))
            | (Kind::Number, OptionValue::Number(_))
            | (Kind::String, OptionValue::String(_))
            | (Kind::Strings, OptionValue::Strings(_))
    );
    if !matches {
        return Err(invalid(format!("expected {:?}", kind)));
    }
    if let (Some(spec), OptionValue::String(s)) = (spec(name), value) {
        if !spec.values.is_empty() && !spec.values.contains(&s.as_str()) {
            return Err(invalid(format!("expected one of {}", spec.values.join(", "))));
        }
    }
    Ok(())
}

/// Which source an option value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Config,
    Magic,
    CommandLine,
}

/// A set of option assignments produced by a rule, merged by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsPatch {
    entries: Vec<(String, OptionValue)>,
}

impl OptionsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: OptionValue) {
        self.entries.push((name.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: OptionsPatch) {
        self.entries.extend(other.entries);
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    defaults: Table,
    config: Table,
    magic: Table,
    command_line: Table,
    jobs: BTreeMap<String, Table>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            defaults: SCHEMA
                .iter()
                .filter_map(|spec| spec.default.value().map(|v| (spec.name.to_owned(), v)))
                .collect(),
            config: Table::new(),
            magic: Table::new(),
            command_line: Table::new(),
            jobs: BTreeMap::new(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut Table {
        match layer {
            Layer::Config => &mut self.config,
            Layer::Magic => &mut self.magic,
            Layer::CommandLine => &mut self.command_line,
        }
    }

    pub fn set(&mut self, layer: Layer, name: &str, value: OptionValue) -> Result<()> {
        check(name, &value)?;
        self.layer_mut(layer).insert(name.to_owned(), value);
        Ok(())
    }

    pub fn set_job(&mut self, job: &str, name: &str, value: OptionValue) -> Result<()> {
        check(name, &value)?;
        self.jobs
            .entry(job.to_owned())
            .or_default()
            .insert(name.to_owned(), value);
        Ok(())
    }

    /// Load a config file's contents: option names at the top level, plus a
    /// `jobs` mapping of job name to overrides.
    pub fn load_config(&mut self, yaml: &str) -> Result<()> {
        #[derive(Deserialize)]
        struct Config {
            #[serde(default)]
            jobs: BTreeMap<String, Table>,
            #[serde(flatten)]
            options: Table,
        }
        if yaml.trim().is_empty() {
            return Ok(());
        }
        let config: Option<Config> = serde_yaml::from_str(yaml)?;
        let Some(config) = config else {
            return Ok(());
        };
        for (name, value) in config.options {
            self.set(Layer::Config, &name, value)?;
        }
        for (job, table) in config.jobs {
            for (name, value) in table {
                self.set_job(&job, &name, value)?;
            }
        }
        Ok(())
    }

    /// Resolve an option for a job, falling back to the global layers.
    pub fn get(&self, name: &str, job: Option<&str>) -> Option<&OptionValue> {
        if let Some(value) = job.and_then(|job| self.jobs.get(job)?.get(name)) {
            return Some(value);
        }
        self.command_line
            .get(name)
            .or_else(|| self.magic.get(name))
            .or_else(|| self.config.get(name))
            .or_else(|| self.defaults.get(name))
    }

    pub fn string(&self, name: &str, job: Option<&str>) -> Option<&str> {
        match self.get(name, job) {
            Some(OptionValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str, job: Option<&str>) -> &[String] {
        match self.get(name, job) {
            Some(OptionValue::Strings(v)) => v,
            _ => &[],
        }
    }

    pub fn bool(&self, name: &str, job: Option<&str>) -> bool {
        matches!(self.get(name, job), Some(OptionValue::Bool(true)))
    }

    pub fn number(&self, name: &str, job: Option<&str>) -> Option<f64> {
        match self.get(name, job) {
            Some(OptionValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// The jobs to build: the `jobNames` option plus every job that has an
    /// overlay, or just the default job when there are none.
    pub fn job_names(&self) -> Vec<Job> {
        let mut names: Vec<Job> = Vec::new();
        let listed = self.strings("jobNames", None).iter();
        for name in listed.chain(self.jobs.keys()) {
            if !names.iter().any(|n| n.as_deref() == Some(name.as_str())) {
                names.push(Some(name.clone()));
            }
        }
        if names.is_empty() {
            names.push(None);
        }
        names
    }

    /// The options that are written to the cache: config and command line.
    /// Magic comments and job overlays are re-derived on load.
    pub fn persisted(&self) -> Table {
        let mut table = self.config.clone();
        table.extend(self.command_line.clone());
        table
    }

    /// Merge a patch into the magic layer.  Returns whether any resolved
    /// value changed, along with the entries that were rejected.
    pub fn apply(&mut self, patch: OptionsPatch) -> (bool, Vec<Error>) {
        let mut changed = false;
        let mut errors = Vec::new();
        for (name, value) in patch.entries {
            if let Err(err) = check(&name, &value) {
                errors.push(err);
                continue;
            }
            if self.magic.get(&name) != Some(&value) {
                self.magic.insert(name, value);
                changed = true;
            }
        }
        (changed, errors)
    }

    /// Environment assignments for spawned tools, from `$NAME` options.
    pub fn environment(&self, job: Option<&str>) -> Vec<(String, String)> {
        let mut names: Vec<&String> = Vec::new();
        let job_table = job.and_then(|job| self.jobs.get(job));
        let tables = [
            Some(&self.config),
            Some(&self.magic),
            Some(&self.command_line),
            job_table,
        ];
        for table in tables.into_iter().flatten() {
            for name in table.keys().filter(|name| is_environment(name)) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut env = Vec::new();
        for name in names {
            let dirs = self.strings(name, job);
            if dirs.is_empty() {
                continue;
            }
            let var = &name[1..];
            let joined = dirs.join(":");
            let value = match std::env::var(var) {
                Ok(existing) => format!("{}:{}", joined, existing),
                // A trailing ':' makes TeX search its default path too.
                Err(_) if var.ends_with("INPUTS") => format!("{}:", joined),
                Err(_) => joined,
            };
            env.push((var.to_owned(), value));
        }
        env
    }
}
