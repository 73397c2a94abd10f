//! Rules: the units of work in the build graph.
//!
//! A rule class is static metadata plus a factory (RuleClass); an instance
//! lives in the State as a RuleNode, and its class-specific behaviour is a
//! boxed Rule whose hooks see the State through a RuleContext.

use crate::error::Error;
use crate::file::File;
use crate::options::{Job, Options, OptionsPatch};
use crate::progress::{Message, Severity};
use crate::smallmap::SmallMap;
use crate::state::{FileId, RuleId, State};
use crate::task::{CommandLine, TaskOutput};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level operations; each activates a different set of rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Build,
    Clean,
    Graph,
    Load,
    Log,
    Save,
    Scrub,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Build => "build",
            Command::Clean => "clean",
            Command::Graph => "graph",
            Command::Load => "load",
            Command::Log => "log",
            Command::Save => "save",
            Command::Scrub => "scrub",
        }
    }

    /// Parse a comma separated command sequence, e.g. "load,build,save".
    pub fn parse_list(s: &str) -> Result<Vec<Command>, Error> {
        s.split(',')
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| c.parse())
            .collect()
    }
}

impl std::str::FromStr for Command {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "build" => Command::Build,
            "clean" => Command::Clean,
            "graph" => Command::Graph,
            "load" => Command::Load,
            "log" => Command::Log,
            "save" => Command::Save,
            "scrub" => Command::Scrub,
            _ => return Err(Error::UnknownCommand(s.to_owned())),
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering stages within a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initialize,
    Execute,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Initialize, Phase::Execute, Phase::Finalize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::Execute => "execute",
            Phase::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things a rule can be asked to do.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Run,
    UpdateDependencies,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Run => "run",
            Action::UpdateDependencies => "updateDependencies",
        })
    }
}

/// A rule's verdict on a pending action, given its triggers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Perform the action.
    Proceed,
    /// Drop the action without performing it; the changes need no work.
    Skip,
    /// Leave the action pending for a later pass.
    Defer,
}

/// What an applicability check sees.
pub struct Candidate<'a> {
    pub options: &'a Options,
    pub command: Command,
    pub phase: Phase,
    pub job: Option<&'a str>,
    pub parameters: &'a [&'a File],
}

impl<'a> Candidate<'a> {
    pub fn string_option(&self, name: &str) -> Option<&'a str> {
        self.options.string(name, self.job)
    }
}

/// Static description of a kind of rule.
pub struct RuleClass {
    pub name: &'static str,
    pub commands: &'static [Command],
    pub phases: &'static [Phase],
    /// Acceptable file types, one set per parameter slot.  No slots means
    /// the rule is created once per job for the phase itself.
    pub parameters: &'static [&'static [&'static str]],
    /// Armed at the start of every phase it participates in.
    pub always_evaluate: bool,
    /// No other subprocess may run while this rule's does.
    pub exclusive: bool,
    /// Option-dependent refinement of the default applicability check.
    pub refine: fn(&Candidate) -> bool,
    pub create: fn() -> Box<dyn Rule>,
}

/// A `refine` that accepts everything the default check does.
pub fn always(_: &Candidate) -> bool {
    true
}

impl RuleClass {
    /// Whether `file` could fill parameter slot `slot`.
    pub fn accepts(&self, slot: usize, file: &File) -> bool {
        match (self.parameters.get(slot), file.file_type.as_deref()) {
            (Some(types), Some(t)) => types.contains(&t),
            _ => false,
        }
    }

    pub fn is_applicable(&self, candidate: &Candidate) -> bool {
        self.commands.contains(&candidate.command)
            && self.phases.contains(&candidate.phase)
            && candidate.parameters.len() == self.parameters.len()
            && candidate
                .parameters
                .iter()
                .enumerate()
                .all(|(slot, file)| self.accepts(slot, file))
            && (self.refine)(candidate)
    }
}

/// Class-specific behaviour.  The engine owns the lifecycle; rules only
/// fill in these hooks.
pub trait Rule {
    /// Called once after construction, and again when rebuilt from the
    /// cache, so it must be idempotent.  Used to declare fixed inputs.
    fn initialize(&mut self, _ctx: &mut RuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The action an update of input `file` calls for, if any.
    fn action_for(&self, _file: &File) -> Option<Action> {
        Some(Action::Run)
    }

    fn pre_evaluate(
        &mut self,
        _ctx: &mut RuleContext,
        _action: Action,
        _triggers: &[FileId],
    ) -> anyhow::Result<Gate> {
        Ok(Gate::Proceed)
    }

    /// A subprocess to run for the Run action.  Rules that compute their
    /// result directly return None and implement run() instead.
    fn command(&self, _ctx: &RuleContext) -> anyhow::Result<Option<CommandLine>> {
        Ok(None)
    }

    fn run(&mut self, _ctx: &mut RuleContext) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Called with the finished subprocess of command().
    fn process_output(&mut self, _ctx: &mut RuleContext, output: &TaskOutput) -> anyhow::Result<bool> {
        Ok(output.success())
    }

    fn update_dependencies(
        &mut self,
        _ctx: &mut RuleContext,
        _triggers: &[FileId],
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// A rule instance in the graph.
pub struct RuleNode {
    pub class: &'static RuleClass,
    /// See State::rule_key.
    pub key: String,
    pub command: Command,
    pub phase: Phase,
    pub job: Job,
    pub parameters: Vec<FileId>,
    pub inputs: Vec<FileId>,
    pub outputs: Vec<FileId>,
    /// Pending actions, each with the input files that triggered it.
    pub(crate) actions: SmallMap<Action, Vec<FileId>>,
    /// The evaluation pass in which each action last ran.
    pub(crate) last_pass: SmallMap<Action, usize>,
    /// Taken out while a hook runs.
    pub(crate) behaviour: Option<Box<dyn Rule>>,
}

impl RuleNode {
    pub fn name(&self) -> &'static str {
        self.class.name
    }

    pub fn needs_evaluation(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn is_pending(&self, action: Action) -> bool {
        self.actions.contains_key(&action)
    }

    pub fn pending(&self) -> impl Iterator<Item = Action> + '_ {
        self.actions.keys().copied()
    }

    pub fn triggers(&self, action: Action) -> &[FileId] {
        self.actions.get(&action).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl std::fmt::Debug for RuleNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleNode")
            .field("key", &self.key)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("actions", &self.actions)
            .finish()
    }
}

/// A hook's view of the build State, scoped to one rule.
pub struct RuleContext<'a> {
    state: &'a mut State,
    id: RuleId,
}

impl<'a> RuleContext<'a> {
    pub(crate) fn new(state: &'a mut State, id: RuleId) -> Self {
        RuleContext { state, id }
    }

    fn node(&self) -> &RuleNode {
        self.state.rule(self.id)
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.node().key
    }

    pub fn state(&self) -> &State {
        self.state
    }

    pub fn command(&self) -> Command {
        self.node().command
    }

    pub fn job(&self) -> Option<&str> {
        self.node().job.as_deref()
    }

    pub fn options(&self) -> &Options {
        self.state.options()
    }

    pub fn string_option(&self, name: &str) -> Option<&str> {
        self.state.options().string(name, self.job())
    }

    pub fn bool_option(&self, name: &str) -> bool {
        self.state.options().bool(name, self.job())
    }

    /// Environment for spawned tools.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.state.options().environment(self.job())
    }

    pub fn root_dir(&self) -> &Path {
        self.state.root_dir()
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.state.resolve(path)
    }

    pub fn parameter_id(&self, slot: usize) -> FileId {
        self.node().parameters[slot]
    }

    pub fn parameter(&self, slot: usize) -> &File {
        self.state.file(self.parameter_id(slot))
    }

    pub fn file(&self, id: FileId) -> &File {
        self.state.file(id)
    }

    pub fn inputs(&self) -> &[FileId] {
        &self.node().inputs
    }

    pub fn outputs(&self) -> &[FileId] {
        &self.node().outputs
    }

    pub fn get_file(&mut self, path: &str) -> Option<FileId> {
        self.state.get_file(path)
    }

    pub fn add_input(&mut self, path: &str) -> Option<FileId> {
        let file = self.state.get_file(path)?;
        self.state.add_input(self.id, file);
        Some(file)
    }

    /// Like add_input, but if the file doesn't exist yet, watch for it: when
    /// it appears it becomes an input and triggers this rule.
    pub fn add_optional_input(&mut self, path: &str) -> Option<FileId> {
        match self.add_input(path) {
            Some(file) => Some(file),
            None => {
                self.state.watch(self.id, path);
                None
            }
        }
    }

    /// Record a file this rule produced.  A file first seen this way counts
    /// as updated, so rules already reading it are triggered.
    pub fn add_output(&mut self, path: &str) -> Option<FileId> {
        let known = self.state.file_id(path).is_some();
        let file = self.state.get_file(path)?;
        self.state.add_output(self.id, file);
        if !known {
            self.state.file_mut(file).updated = true;
        }
        Some(file)
    }

    pub fn set_value(&mut self, file: FileId, value: serde_yaml::Value) {
        self.state.set_value(file, Some(value));
    }

    /// Arm one of this rule's own actions, e.g. a rerun requested by a log.
    pub fn arm(&mut self, action: Action) {
        self.state.arm(self.id, action, None);
    }

    /// Queue option changes; the engine merges them between steps.
    pub fn patch_options(&mut self, patch: OptionsPatch) {
        self.state.queue_patch(patch);
    }

    pub fn log(&mut self, severity: Severity, text: impl Into<String>) {
        self.log_message(Message::new(severity, text));
    }

    /// Log a message, attributed to this rule unless it names a speaker.
    pub fn log_message(&mut self, mut msg: Message) {
        if msg.name.is_none() {
            msg.name = Some(self.key().to_owned());
        }
        self.state.log(msg);
    }

    /// Drop this rule's job from a file, deleting the file when no job
    /// references it any more.
    pub fn delete_file(&mut self, file: FileId) -> bool {
        let job = self.node().job.clone();
        self.state.delete_file(file, job.as_deref())
    }
}
