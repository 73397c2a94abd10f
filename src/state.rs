//! The build graph: files, rules, and the edges between them.

use crate::cache::{FileRecord, RuleRecord};
use crate::canon::{canon_path, canon_path_in};
use crate::classify::classify;
use crate::densemap::{self, DenseMap};
use crate::error::{Error, Result};
use crate::file::{self, File, Fingerprint};
use crate::fs::MTime;
use crate::options::{Job, Options, OptionsPatch};
use crate::progress::{Event, Message, Progress, Severity};
use crate::registry::Registry;
use crate::rule::{Action, Candidate, Command, Phase, RuleClass, RuleContext, RuleNode};
use crate::smallmap::SmallMap;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Id for File nodes in the State.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(usize);
impl densemap::Index for FileId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for FileId {
    fn from(u: usize) -> FileId {
        FileId(u)
    }
}

/// Id for RuleNodes in the State.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(usize);
impl densemap::Index for RuleId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for RuleId {
    fn from(u: usize) -> RuleId {
        RuleId(u)
    }
}

pub struct State {
    /// Directory containing the root document; logical paths are relative
    /// to it.
    root_dir: PathBuf,
    /// Logical path of the root document.
    root: String,
    options: Options,

    files: DenseMap<FileId, File>,
    by_path: FxHashMap<String, FileId>,
    rules: DenseMap<RuleId, RuleNode>,
    by_key: FxHashMap<String, RuleId>,

    /// Files that may have changed since they were last observed.
    touched: BTreeSet<FileId>,
    /// Option changes queued by rules, merged by the engine between steps.
    patch: OptionsPatch,
    /// Missing files that rules asked to be told about, by logical path.
    watches: FxHashMap<String, Vec<RuleId>>,
    /// Set when files or rules were removed from the graph.
    structure_changed: bool,

    progress: Box<dyn Progress>,
}

impl State {
    /// Create the state for a build of `root`.  The root document must
    /// exist.
    pub fn new(root: &Path, options: Options, progress: Box<dyn Progress>) -> Result<State> {
        let missing = || Error::MissingInput(root.to_path_buf());
        let abs = std::fs::canonicalize(root).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => missing(),
            _ => Error::Io(err),
        })?;
        let root_dir = abs.parent().ok_or_else(missing)?.to_path_buf();
        let name = abs
            .file_name()
            .ok_or_else(missing)?
            .to_string_lossy()
            .into_owned();
        let mut state = State {
            root_dir,
            root: name,
            options,
            files: DenseMap::default(),
            by_path: FxHashMap::default(),
            rules: DenseMap::default(),
            by_key: FxHashMap::default(),
            touched: BTreeSet::new(),
            patch: OptionsPatch::new(),
            watches: FxHashMap::default(),
            structure_changed: false,
            progress,
        };
        let root = state.root.clone();
        state.get_file(&root).ok_or_else(missing)?;
        state.reset_root_jobs();
        Ok(state)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn root_path(&self) -> &str {
        &self.root
    }

    pub fn root_file(&self) -> Option<FileId> {
        self.file_id(&self.root)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// The logical form of a path: relative to the root directory when
    /// inside it.
    pub fn canon(&self, path: &str) -> String {
        canon_path_in(&self.root_dir, path)
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        if path.starts_with('/') {
            PathBuf::from(path)
        } else {
            self.root_dir.join(path)
        }
    }

    pub fn file_id(&self, path: &str) -> Option<FileId> {
        self.by_path.get(&self.canon(path)).copied()
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id]
    }

    pub fn try_file(&self, id: FileId) -> Option<&File> {
        self.files.lookup(id)
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &File)> + '_ {
        self.files.iter()
    }

    pub fn rule(&self, id: RuleId) -> &RuleNode {
        &self.rules[id]
    }

    pub fn try_rule(&self, id: RuleId) -> Option<&RuleNode> {
        self.rules.lookup(id)
    }

    pub(crate) fn rule_mut(&mut self, id: RuleId) -> Option<&mut RuleNode> {
        self.rules.lookup_mut(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &RuleNode)> + '_ {
        self.rules.iter()
    }

    pub fn rule_by_key(&self, key: &str) -> Option<RuleId> {
        self.by_key.get(key).copied()
    }

    pub fn emit(&mut self, event: Event) {
        self.progress.event(&event);
    }

    pub fn log(&mut self, msg: Message) {
        debug!(severity = %msg.severity, name = ?msg.name, "{}", msg.text);
        self.emit(Event::Log(msg));
    }

    pub(crate) fn rule_error(&mut self, id: RuleId, what: impl std::fmt::Display, err: anyhow::Error) {
        let key = self.rules.lookup(id).map(|r| r.key.clone());
        let mut msg = Message::new(Severity::Error, format!("{} failed: {:#}", what, err));
        msg.name = key;
        self.log(msg);
    }

    /// Look up a file by path, adding it to the graph on first sight.
    /// Returns None for physical files that don't exist; virtual files are
    /// always available.
    pub fn get_file(&mut self, path: &str) -> Option<FileId> {
        let path = self.canon(path);
        if let Some(&id) = self.by_path.get(&path) {
            return Some(id);
        }
        let resolved = self.resolve(&path);
        let class = classify(&path, &resolved);
        let fingerprint = if class.is_virtual {
            Fingerprint::missing()
        } else {
            match file::observe(&resolved, &Fingerprint::missing()) {
                Ok(fp) if fp.mtime != MTime::Missing => fp,
                Ok(_) => return None,
                Err(err) => {
                    self.log(Message::new(
                        Severity::Warning,
                        format!("unable to read {}: {}", path, err),
                    ));
                    return None;
                }
            }
        };
        Some(self.insert_file(File::new(path, resolved, class, fingerprint)))
    }

    fn insert_file(&mut self, file: File) -> FileId {
        let path = file.path.clone();
        let id = self.files.push(file);
        self.by_path.insert(path.clone(), id);
        trace!(path = %path, "file added");
        if let Some(watchers) = self.watches.remove(&path) {
            for rule in watchers {
                if self.rules.lookup(rule).is_some() {
                    self.add_input(rule, id);
                    self.files[id].updated = true;
                }
            }
        }
        self.emit(Event::FileAdded(path));
        id
    }

    /// Bring a file record from the cache into the graph.  The recorded
    /// fingerprint is kept so the next refresh compares against it.
    pub fn get_cached_file(&mut self, path: &str, record: &FileRecord) -> Option<FileId> {
        let id = match self.file_id(path) {
            Some(id) => id,
            None => {
                let path = self.canon(path);
                let resolved = self.resolve(&path);
                let class = classify(&path, &resolved);
                if !class.is_virtual && !resolved.exists() {
                    return None;
                }
                self.insert_file(File::new(path, resolved, class, Fingerprint::missing()))
            }
        };
        let file = &mut self.files[id];
        if !file.is_virtual {
            file.fingerprint = Fingerprint {
                mtime: MTime::from_nanos(record.timestamp),
                hash: record.hash.clone(),
            };
        }
        if record.file_type.is_some() {
            file.file_type = record.file_type.clone();
        }
        if record.sub_type.is_some() {
            file.sub_type = record.sub_type.clone();
        }
        file.value = record.value.clone();
        file.jobs.extend(record.job_names.iter().cloned());
        Some(id)
    }

    /// A rule's identity: its class, command, phase, job and parameters.
    pub fn rule_key(
        name: &str,
        command: Command,
        phase: Phase,
        job: Option<&str>,
        parameters: &[&str],
    ) -> String {
        let mut key = format!("{}({};{};{}", name, command, phase, job.unwrap_or(""));
        for p in parameters {
            key.push(';');
            key.push_str(&canon_path(p));
        }
        key.push(')');
        key
    }

    /// Add a rule instance.  Returns None if an identical rule (same key)
    /// is already present.  Parameters become inputs.
    pub fn add_rule(
        &mut self,
        class: &'static RuleClass,
        command: Command,
        phase: Phase,
        job: Job,
        parameters: Vec<FileId>,
    ) -> Option<RuleId> {
        let paths: Vec<&str> = parameters
            .iter()
            .map(|&id| self.files[id].path.as_str())
            .collect();
        let key = Self::rule_key(class.name, command, phase, job.as_deref(), &paths);
        if self.by_key.contains_key(&key) {
            return None;
        }
        let id = self.rules.push(RuleNode {
            class,
            key: key.clone(),
            command,
            phase,
            job,
            parameters: parameters.clone(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            actions: SmallMap::new(),
            last_pass: SmallMap::new(),
            behaviour: Some((class.create)()),
        });
        self.by_key.insert(key.clone(), id);
        for p in parameters {
            self.add_input(id, p);
        }
        debug!(rule = %key, "rule added");
        Some(id)
    }

    /// Run a rule's initialize hook.  Failures are logged; returns success.
    pub(crate) fn initialize_rule(&mut self, id: RuleId) -> bool {
        let Some(mut behaviour) = self.rules.lookup_mut(id).and_then(|r| r.behaviour.take()) else {
            return true;
        };
        let result = behaviour.initialize(&mut RuleContext::new(self, id));
        if let Some(node) = self.rules.lookup_mut(id) {
            node.behaviour = Some(behaviour);
        }
        match result {
            Ok(()) => true,
            Err(err) => {
                self.rule_error(id, "initialize", err);
                false
            }
        }
    }

    /// Rebuild a rule from its cache record.  The rule is armed to run if
    /// anything it recorded no longer resolves, if it always evaluates, or
    /// if it had pending actions when saved.  Records whose class or
    /// parameters are gone are dropped.
    pub fn add_cached_rule(&mut self, registry: &Registry, record: &RuleRecord) -> Option<RuleId> {
        let Some(class) = registry.get(&record.name) else {
            trace!(rule = %record.name, "dropping cached rule of unknown class");
            return None;
        };
        let mut parameters = Vec::new();
        for path in &record.parameters {
            match self.get_file(path) {
                Some(id) => parameters.push(id),
                None => {
                    trace!(rule = %record.name, path = %path, "dropping cached rule with missing parameter");
                    return None;
                }
            }
        }
        let id = self.add_rule(
            class,
            record.command,
            record.phase,
            record.job_name.clone(),
            parameters,
        )?;
        let mut stale = !self.initialize_rule(id);
        for path in &record.inputs {
            match self.get_file(path) {
                Some(file) => {
                    self.add_input(id, file);
                }
                None => stale = true,
            }
        }
        for path in &record.outputs {
            match self.get_file(path) {
                Some(file) => self.link_output(id, file),
                None => stale = true,
            }
        }
        for &action in &record.actions {
            self.arm(id, action, None);
        }
        if stale || class.always_evaluate {
            self.arm(id, Action::Run, None);
        }
        Some(id)
    }

    pub fn remove_rule(&mut self, id: RuleId) {
        let Some(node) = self.rules.remove(id) else {
            return;
        };
        self.by_key.remove(&node.key);
        for &f in &node.inputs {
            if let Some(file) = self.files.lookup_mut(f) {
                file.consumers.retain(|&r| r != id);
            }
        }
        for &f in &node.outputs {
            if let Some(file) = self.files.lookup_mut(f) {
                file.producers.retain(|&r| r != id);
            }
        }
        for watchers in self.watches.values_mut() {
            watchers.retain(|&r| r != id);
        }
        self.structure_changed = true;
        debug!(rule = %node.key, "rule removed");
    }

    /// Returns whether the edge is new.
    pub fn add_input(&mut self, rule: RuleId, file: FileId) -> bool {
        let node = &mut self.rules[rule];
        if node.inputs.contains(&file) {
            return false;
        }
        node.inputs.push(file);
        let job = node.job.clone();
        let f = &mut self.files[file];
        f.consumers.push(rule);
        f.jobs.insert(job);
        true
    }

    fn link_output(&mut self, rule: RuleId, file: FileId) {
        let node = &mut self.rules[rule];
        if node.outputs.contains(&file) {
            return;
        }
        node.outputs.push(file);
        let job = node.job.clone();
        let f = &mut self.files[file];
        f.producers.push(rule);
        f.jobs.insert(job);
    }

    /// Record `file` as an output of `rule`; it's refreshed in the next
    /// propagation.
    pub fn add_output(&mut self, rule: RuleId, file: FileId) {
        self.link_output(rule, file);
        self.touched.insert(file);
    }

    pub(crate) fn touch(&mut self, file: FileId) {
        self.touched.insert(file);
    }

    pub(crate) fn take_touched(&mut self) -> BTreeSet<FileId> {
        std::mem::take(&mut self.touched)
    }

    pub fn set_value(&mut self, id: FileId, value: Option<serde_yaml::Value>) {
        let file = &mut self.files[id];
        if file.set_value(value) {
            let path = file.path.clone();
            self.emit(Event::FileChanged(path));
        }
    }

    pub(crate) fn watch(&mut self, rule: RuleId, path: &str) {
        let watchers = self.watches.entry(self.canon(path)).or_default();
        if !watchers.contains(&rule) {
            watchers.push(rule);
        }
    }

    /// Drop `job`'s reference to a file.  Once no job references it, the
    /// file is deleted from disk, removed from the graph, and rules that
    /// take it as a parameter go with it.  Returns whether the file was
    /// removed.
    pub fn delete_file(&mut self, id: FileId, job: Option<&str>) -> bool {
        let Some(file) = self.files.lookup_mut(id) else {
            return false;
        };
        file.jobs.remove(&job.map(str::to_owned));
        if !file.jobs.is_empty() {
            return false;
        }
        let Some(file) = self.files.remove(id) else {
            return false;
        };
        if !file.is_virtual {
            if let Err(err) = crate::fs::remove(&file.resolved) {
                self.log(Message::new(
                    Severity::Warning,
                    format!("unable to delete {}: {}", file.path, err),
                ));
            }
        }
        self.by_path.remove(&file.path);
        self.touched.remove(&id);

        let doomed: Vec<RuleId> = self
            .rules
            .iter()
            .filter(|(_, r)| r.parameters.contains(&id))
            .map(|(rid, _)| rid)
            .collect();
        for &rid in file.consumers.iter().chain(file.producers.iter()) {
            if let Some(rule) = self.rules.lookup_mut(rid) {
                rule.inputs.retain(|&f| f != id);
                rule.outputs.retain(|&f| f != id);
                for action in [Action::Run, Action::UpdateDependencies] {
                    if let Some(triggers) = rule.actions.remove(&action) {
                        let triggers = triggers.into_iter().filter(|&f| f != id).collect();
                        rule.actions.insert(action, triggers);
                    }
                }
            }
        }
        for rid in doomed {
            self.remove_rule(rid);
        }
        // Whoever produced it has to run again to bring it back.
        for &rid in &file.producers {
            self.arm(rid, Action::Run, None);
        }
        self.structure_changed = true;
        debug!(path = %file.path, "file deleted");
        self.emit(Event::FileDeleted(file.path));
        true
    }

    /// Make an action pending, remembering the trigger.  Returns whether
    /// it wasn't already pending.
    pub fn arm(&mut self, rule: RuleId, action: Action, trigger: Option<FileId>) -> bool {
        let Some(node) = self.rules.lookup_mut(rule) else {
            return false;
        };
        let fresh = !node.actions.contains_key(&action);
        let triggers = node.actions.get_or_insert_with(action, Vec::new);
        if let Some(t) = trigger {
            if !triggers.contains(&t) {
                triggers.push(t);
            }
        }
        if fresh {
            trace!(rule = %node.key, %action, "armed");
        }
        fresh
    }

    pub(crate) fn take_action(&mut self, rule: RuleId, action: Action) -> Option<Vec<FileId>> {
        self.rules.lookup_mut(rule)?.actions.remove(&action)
    }

    pub(crate) fn queue_patch(&mut self, patch: OptionsPatch) {
        self.patch.extend(patch);
    }

    pub(crate) fn take_patch(&mut self) -> OptionsPatch {
        std::mem::take(&mut self.patch)
    }

    pub(crate) fn take_structure_changed(&mut self) -> bool {
        std::mem::take(&mut self.structure_changed)
    }

    /// The root document belongs to exactly the current jobs.
    pub(crate) fn reset_root_jobs(&mut self) {
        let jobs: BTreeSet<Job> = self.options.job_names().into_iter().collect();
        if let Some(root) = self.root_file() {
            self.files[root].jobs = jobs;
        }
    }

    /// Forget which files discovery has considered.
    pub(crate) fn reset_analysis(&mut self) {
        let ids: Vec<FileId> = self.files.all_ids().collect();
        for id in ids {
            self.files[id].analyzed = false;
        }
    }

    /// Drop rules that no longer apply under the current options, after
    /// those changed.  Returns how many were removed.
    pub(crate) fn revalidate_rules(&mut self) -> usize {
        let jobs = self.options.job_names();
        let doomed: Vec<RuleId> = self
            .rules
            .iter()
            .filter(|(_, rule)| {
                if !jobs.contains(&rule.job) {
                    return true;
                }
                let parameters: Vec<&File> =
                    rule.parameters.iter().map(|&f| &self.files[f]).collect();
                let candidate = Candidate {
                    options: &self.options,
                    command: rule.command,
                    phase: rule.phase,
                    job: rule.job.as_deref(),
                    parameters: &parameters,
                };
                !rule.class.is_applicable(&candidate)
            })
            .map(|(id, _)| id)
            .collect();
        for &id in &doomed {
            self.remove_rule(id);
        }
        self.reset_root_jobs();
        self.reset_analysis();
        doomed.len()
    }

    /// Shortest hop counts between rules, where a hop is an output of one
    /// rule that another reads.
    pub fn distances(&self) -> FxHashMap<(RuleId, RuleId), usize> {
        let mut next: FxHashMap<RuleId, Vec<RuleId>> = FxHashMap::default();
        for (id, rule) in self.rules.iter() {
            let mut successors: Vec<RuleId> = Vec::new();
            for &out in &rule.outputs {
                for &consumer in &self.files[out].consumers {
                    if consumer != id && !successors.contains(&consumer) {
                        successors.push(consumer);
                    }
                }
            }
            next.insert(id, successors);
        }

        let limit = 2 * self.rules.len();
        let mut distances = FxHashMap::default();
        for from in self.rules.all_ids() {
            let mut queue: VecDeque<(RuleId, usize)> = VecDeque::new();
            queue.push_back((from, 0));
            while let Some((at, hops)) = queue.pop_front() {
                if hops >= limit {
                    break;
                }
                for &to in &next[&at] {
                    if to != from && !distances.contains_key(&(from, to)) {
                        distances.insert((from, to), hops + 1);
                        queue.push_back((to, hops + 1));
                    }
                }
            }
        }
        distances
    }
}
