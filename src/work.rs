//! Build runner, choosing and executing rules as determined by the graph,
//! until nothing changes any more.

use crate::cache;
use crate::error::{Error, Result};
use crate::progress::{Event, Message, Severity};
use crate::registry::Registry;
use crate::rule::{Action, Candidate, Command, Gate, Phase, RuleContext};
use crate::state::{FileId, RuleId, State};
use crate::task::{CommandLine, FinishedTask, Runner, Termination};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Requests cancellation of a running build.  Cloneable and usable from
/// other threads.
#[derive(Clone, Default)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn kill(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::SeqCst) || crate::signal::interrupted()
    }
}

/// One performed action.
#[derive(Debug, Clone)]
pub struct Executed {
    pub rule: String,
    pub action: Action,
    /// Wall-clock span of the action's subprocess, if it had one.
    pub span: Option<(Instant, Instant)>,
    pub success: bool,
}

pub struct Work<'a> {
    state: State,
    registry: &'a Registry,
    kill: KillSwitch,
    /// Evaluation passes so far, across all phases.
    pass: usize,
    success: bool,
    executed: Vec<Executed>,
}

impl<'a> Work<'a> {
    pub fn new(state: State, registry: &'a Registry) -> Self {
        Work {
            state,
            registry,
            kill: KillSwitch::default(),
            pass: 0,
            success: true,
            executed: Vec::new(),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    pub fn kill_switch(&self) -> KillSwitch {
        self.kill.clone()
    }

    pub fn executed(&self) -> &[Executed] {
        &self.executed
    }

    /// Run a sequence of commands.  Returns whether everything succeeded;
    /// a phase that doesn't settle within `phaseCycles` cycles is an error.
    pub fn run(&mut self, commands: &[Command]) -> Result<bool> {
        self.success = true;
        let mut failure: Option<Error> = None;
        for &command in commands {
            // After a cancellation or a runaway phase only a save still runs.
            if (self.kill.is_killed() || failure.is_some()) && command != Command::Save {
                continue;
            }
            let _span = tracing::info_span!("command", %command).entered();
            match command {
                Command::Load => self.load(),
                Command::Save => self.save(),
                _ => {
                    for phase in Phase::ALL {
                        if let Err(err) = self.evaluate_phase(command, phase) {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }
        }
        if self.kill.is_killed() {
            self.success = false;
            self.state
                .log(Message::new(Severity::Error, "build interrupted"));
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(self.success),
        }
    }

    fn load(&mut self) {
        if !self.state.options().bool("loadCache", None) {
            return;
        }
        match cache::load(&mut self.state, self.registry) {
            Ok(Some(restored)) => {
                info!(files = restored.files, rules = restored.rules, "restored from cache")
            }
            Ok(None) => debug!("no cache"),
            Err(err) => self.state.log(Message::new(
                Severity::Warning,
                format!("ignoring unreadable cache: {:#}", err),
            )),
        }
        self.merge_patches();
    }

    fn save(&mut self) {
        if !self.state.options().bool("saveCache", None) {
            return;
        }
        if let Err(err) = cache::save(&self.state) {
            self.success = false;
            self.state.log(Message::new(
                Severity::Error,
                format!("unable to save cache: {:#}", err),
            ));
        }
    }

    fn cycle_limit(&self) -> usize {
        let n = self.state.options().number("phaseCycles", None).unwrap_or(20.0);
        if n >= 1.0 {
            n as usize
        } else {
            1
        }
    }

    fn evaluate_phase(&mut self, command: Command, phase: Phase) -> Result<()> {
        let _span = tracing::debug_span!("phase", %phase).entered();
        self.state.reset_analysis();
        let always: Vec<RuleId> = self
            .state
            .rules()
            .filter(|(_, r)| r.command == command && r.phase == phase && r.class.always_evaluate)
            .map(|(id, _)| id)
            .collect();
        for id in always {
            self.state.arm(id, Action::Run, None);
        }

        let cycles = self.cycle_limit();
        for cycle in 0..cycles {
            if self.kill.is_killed() {
                return Ok(());
            }
            self.pass += 1;
            let discovered = self.discover(command, phase);
            let merged = self.merge_patches();
            let executed = self.execute(command, phase);
            let merged_after = self.merge_patches();
            let triggered = self.propagate();
            let restructured = self.state.take_structure_changed();
            trace!(cycle, discovered, merged, executed, merged_after, triggered, restructured, "cycle done");
            if !(discovered || merged || executed || merged_after || triggered || restructured) {
                debug!(cycles = cycle + 1, "settled");
                return Ok(());
            }
        }
        self.success = false;
        self.state.log(Message::new(
            Severity::Error,
            format!("{} {} did not settle after {} cycles", command, phase, cycles),
        ));
        Err(Error::NotConverged {
            command,
            phase,
            cycles,
        })
    }

    /// Create the rules that apply to new files and to the phase itself.
    /// Returns whether any were created.
    fn discover(&mut self, command: Command, phase: Phase) -> bool {
        let registry = self.registry;
        let jobs = self.state.options().job_names();
        let mut created: Vec<RuleId> = Vec::new();

        for class in registry.classes().filter(|c| c.parameters.is_empty()) {
            for job in &jobs {
                let applies = class.is_applicable(&Candidate {
                    options: self.state.options(),
                    command,
                    phase,
                    job: job.as_deref(),
                    parameters: &[],
                });
                if applies {
                    created.extend(self.state.add_rule(class, command, phase, job.clone(), Vec::new()));
                }
            }
        }

        let fresh: Vec<FileId> = self
            .state
            .files()
            .filter(|(_, f)| !f.analyzed)
            .map(|(id, _)| id)
            .collect();
        for file in fresh {
            if self.state.try_file(file).is_none() {
                continue;
            }
            for class in registry.classes().filter(|c| !c.parameters.is_empty()) {
                for slot in 0..class.parameters.len() {
                    if !class.accepts(slot, self.state.file(file)) {
                        continue;
                    }
                    for tuple in self.tuples(class.parameters.len(), slot, file, |i, f| class.accepts(i, f)) {
                        for job in self.common_jobs(&tuple, &jobs) {
                            let parameters: Vec<&crate::file::File> =
                                tuple.iter().map(|&id| self.state.file(id)).collect();
                            let applies = class.is_applicable(&Candidate {
                                options: self.state.options(),
                                command,
                                phase,
                                job: job.as_deref(),
                                parameters: &parameters,
                            });
                            if applies {
                                created.extend(self.state.add_rule(class, command, phase, job, tuple.clone()));
                            }
                        }
                    }
                }
            }
            if self.state.try_file(file).is_some() {
                self.state.file_mut(file).analyzed = true;
            }
        }

        for &id in &created {
            if !self.state.initialize_rule(id) {
                self.success = false;
            }
            let parameters = self
                .state
                .try_rule(id)
                .map(|r| r.parameters.clone())
                .unwrap_or_default();
            self.state.arm(id, Action::Run, None);
            for p in parameters {
                self.state.arm(id, Action::Run, Some(p));
            }
        }
        !created.is_empty()
    }

    /// Every parameter tuple with `file` in `slot` and known files of an
    /// acceptable type in the other slots.
    fn tuples(
        &self,
        slots: usize,
        slot: usize,
        file: FileId,
        accepts: impl Fn(usize, &crate::file::File) -> bool,
    ) -> Vec<Vec<FileId>> {
        let mut tuples: Vec<Vec<FileId>> = vec![Vec::new()];
        for i in 0..slots {
            let choices: Vec<FileId> = if i == slot {
                vec![file]
            } else {
                self.state
                    .files()
                    .filter(|(_, f)| accepts(i, f))
                    .map(|(id, _)| id)
                    .collect()
            };
            let mut next = Vec::new();
            for tuple in &tuples {
                for &choice in &choices {
                    let mut t = tuple.clone();
                    t.push(choice);
                    next.push(t);
                }
            }
            tuples = next;
        }
        tuples
    }

    /// The current jobs shared by all files of a tuple.  A file no rule has
    /// claimed yet belongs to every job.
    fn common_jobs(&self, tuple: &[FileId], jobs: &[crate::options::Job]) -> Vec<crate::options::Job> {
        jobs.iter()
            .filter(|job| {
                tuple.iter().all(|&id| {
                    let f = self.state.file(id);
                    f.jobs.is_empty() || f.jobs.contains(*job)
                })
            })
            .cloned()
            .collect()
    }

    /// Merge option patches queued by rules.  Returns whether any option
    /// changed; if so, rules that no longer apply are dropped and discovery
    /// starts over.
    fn merge_patches(&mut self) -> bool {
        let patch = self.state.take_patch();
        if patch.is_empty() {
            return false;
        }
        let (changed, errors) = self.state.options_mut().apply(patch);
        for err in errors {
            self.state
                .log(Message::new(Severity::Warning, err.to_string()));
        }
        if changed {
            let removed = self.state.revalidate_rules();
            debug!(removed, "options changed");
        }
        changed
    }

    /// Pending rules whose inputs no other pending rule still produces.
    /// If every one is blocked by another (a cycle), the oldest goes.
    fn frontier(&self, pending: &[RuleId]) -> Vec<RuleId> {
        let ready: Vec<RuleId> = pending
            .iter()
            .copied()
            .filter(|&id| {
                let inputs = &self.state.rule(id).inputs;
                !pending.iter().any(|&other| {
                    other != id
                        && self
                            .state
                            .rule(other)
                            .outputs
                            .iter()
                            .any(|o| inputs.contains(o))
                })
            })
            .collect();
        if ready.is_empty() {
            pending.iter().copied().take(1).collect()
        } else {
            ready
        }
    }

    /// Perform the pending actions of the ready rules.  Returns whether
    /// anything was done.
    fn execute(&mut self, command: Command, phase: Phase) -> bool {
        let pending: Vec<RuleId> = self
            .state
            .rules()
            .filter(|(_, r)| r.command == command && r.phase == phase && r.needs_evaluation())
            .map(|(id, _)| id)
            .collect();
        if pending.is_empty() {
            return false;
        }

        let mut progressed = false;
        let mut commands: Vec<(RuleId, CommandLine)> = Vec::new();
        for id in self.frontier(&pending) {
            for action in [Action::UpdateDependencies, Action::Run] {
                if self.kill.is_killed() {
                    break;
                }
                let Some(rule) = self.state.try_rule(id) else {
                    break;
                };
                if !rule.is_pending(action) {
                    continue;
                }
                // A rule acts at most once per action per pass.
                if rule.last_pass.get(&action) == Some(&self.pass) {
                    continue;
                }
                let triggers = self.state.take_action(id, action).unwrap_or_default();
                progressed |= self.perform(id, action, triggers, &mut commands);
            }
        }
        if !commands.is_empty() {
            progressed = true;
            self.run_commands(commands);
        }
        progressed
    }

    /// Gate and perform one action.  Subprocess commands are queued on
    /// `commands` rather than run.  Returns whether the state changed.
    fn perform(
        &mut self,
        id: RuleId,
        action: Action,
        triggers: Vec<FileId>,
        commands: &mut Vec<(RuleId, CommandLine)>,
    ) -> bool {
        let Some(mut behaviour) = self.state.rule_mut(id).and_then(|r| r.behaviour.take()) else {
            return false;
        };
        let key = self.state.rule(id).key.clone();
        let gate = behaviour.pre_evaluate(&mut RuleContext::new(&mut self.state, id), action, &triggers);

        let outcome = match gate {
            Ok(Gate::Skip) => {
                trace!(rule = %key, %action, "skipped");
                None
            }
            Ok(Gate::Defer) => {
                self.state.arm(id, action, None);
                for &t in &triggers {
                    self.state.arm(id, action, Some(t));
                }
                self.restore(id, behaviour);
                return false;
            }
            Ok(Gate::Proceed) => {
                self.state.emit(Event::ActionStarted {
                    rule: key.clone(),
                    action,
                });
                debug!(rule = %key, %action, "performing");
                let mut ctx = RuleContext::new(&mut self.state, id);
                match action {
                    Action::UpdateDependencies => {
                        Some(behaviour.update_dependencies(&mut ctx, &triggers))
                    }
                    Action::Run => match behaviour.command(&ctx) {
                        Ok(Some(cmdline)) => {
                            commands.push((id, cmdline));
                            None
                        }
                        Ok(None) => Some(behaviour.run(&mut ctx)),
                        Err(err) => Some(Err(err)),
                    },
                }
            }
            Err(err) => Some(Err(err)),
        };
        if let Some(node) = self.state.rule_mut(id) {
            node.last_pass.insert(action, self.pass);
        }
        self.restore(id, behaviour);
        if let Some(result) = outcome {
            self.finish(id, key, action, result, None);
        }
        true
    }

    fn restore(&mut self, id: RuleId, behaviour: Box<dyn crate::rule::Rule>) {
        if let Some(node) = self.state.rule_mut(id) {
            node.behaviour = Some(behaviour);
        }
    }

    /// Record an action's result.  The rule's outputs are re-observed in
    /// the next propagation.
    fn finish(
        &mut self,
        id: RuleId,
        key: String,
        action: Action,
        result: anyhow::Result<bool>,
        span: Option<(Instant, Instant)>,
    ) {
        let success = match result {
            Ok(true) => true,
            Ok(false) => {
                self.state.log(
                    Message::new(Severity::Error, format!("{} reported failure", action))
                        .with_name(key.clone()),
                );
                false
            }
            Err(err) => {
                self.state.rule_error(id, action, err);
                false
            }
        };
        self.success &= success;
        if let Some(rule) = self.state.try_rule(id) {
            let outputs = rule.outputs.clone();
            for out in outputs {
                self.state.touch(out);
            }
        }
        self.executed.push(Executed {
            rule: key,
            action,
            span,
            success,
        });
    }

    fn parallelism(&self) -> usize {
        match self.state.options().number("parallelism", None) {
            Some(n) if n >= 1.0 => n as usize,
            _ => std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
        }
    }

    /// Run queued subprocesses, then apply their results in rule order.
    fn run_commands(&mut self, commands: Vec<(RuleId, CommandLine)>) {
        let mut runner = Runner::new(self.parallelism());
        let mut queue: VecDeque<(RuleId, CommandLine)> = commands.into();
        let mut finished: Vec<FinishedTask> = Vec::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.kill.is_killed() {
                warn!("cancelling running tools");
                runner.kill_all();
                cancelled = true;
            }
            while !cancelled && runner.can_start_more() {
                let Some((id, _)) = queue.front() else {
                    break;
                };
                let exclusive = self.state.rule(*id).class.exclusive;
                if exclusive && !runner.can_start_exclusive() {
                    break;
                }
                let Some((id, cmdline)) = queue.pop_front() else {
                    break;
                };
                let key = self.state.rule(id).key.clone();
                debug!(rule = %key, command = %cmdline, "spawning");
                self.state.emit(Event::CommandStarted {
                    rule: key,
                    command: cmdline.to_string(),
                });
                runner.start(id, cmdline, exclusive);
            }
            if !runner.is_running() {
                break;
            }
            if let Some(task) = runner.wait(Duration::from_millis(100)) {
                finished.push(task);
            }
        }

        // Never started; try again later.
        for (id, _) in queue {
            self.state.arm(id, Action::Run, None);
        }
        finished.sort_by_key(|task| task.rule);
        for task in finished {
            self.apply(task);
        }
    }

    fn apply(&mut self, mut task: FinishedTask) {
        let Some(key) = self.state.try_rule(task.rule).map(|r| r.key.clone()) else {
            return;
        };
        // A tool that died of a signal nobody sent crashed: an ordinary failure.
        if task.output.termination == Termination::Interrupted && !self.kill.is_killed() {
            self.state.log(
                Message::new(Severity::Error, "terminated by a signal").with_name(key.clone()),
            );
            task.output.termination = Termination::Failure;
        }
        if task.output.termination == Termination::Interrupted {
            // Whatever it wrote is suspect; leave the action pending.
            self.state.arm(task.rule, Action::Run, None);
            self.state.log(
                Message::new(Severity::Error, "interrupted").with_name(key.clone()),
            );
            self.success = false;
            self.executed.push(Executed {
                rule: key,
                action: Action::Run,
                span: Some(task.span),
                success: false,
            });
            return;
        }
        let Some(mut behaviour) = self
            .state
            .rule_mut(task.rule)
            .and_then(|r| r.behaviour.take())
        else {
            return;
        };
        let result =
            behaviour.process_output(&mut RuleContext::new(&mut self.state, task.rule), &task.output);
        self.restore(task.rule, behaviour);
        self.finish(task.rule, key, Action::Run, result, Some(task.span));
    }

    /// Re-observe touched files, then arm the consumers of every updated
    /// file.  Returns whether any action was newly armed.
    fn propagate(&mut self) -> bool {
        let touched: BTreeSet<FileId> = self.state.take_touched();
        for id in touched {
            let Some(file) = self.state.try_file(id) else {
                continue;
            };
            let path = file.path.clone();
            match self.state.file_mut(id).refresh() {
                Ok(true) => self.state.emit(Event::FileChanged(path)),
                Ok(false) => {}
                Err(err) => self.state.log(Message::new(
                    Severity::Warning,
                    format!("unable to read {}: {}", path, err),
                )),
            }
        }

        let updated: Vec<FileId> = self
            .state
            .files()
            .filter(|(_, f)| f.updated)
            .map(|(id, _)| id)
            .collect();
        let mut armed = false;
        for id in updated {
            let consumers = self.state.file(id).consumers().to_vec();
            for rule_id in consumers {
                let Some(rule) = self.state.try_rule(rule_id) else {
                    continue;
                };
                if rule.outputs.contains(&id) {
                    continue;
                }
                let action = rule
                    .behaviour
                    .as_ref()
                    .and_then(|b| b.action_for(self.state.file(id)));
                if let Some(action) = action {
                    armed |= self.state.arm(rule_id, action, Some(id));
                }
            }
            self.state.file_mut(id).updated = false;
        }
        armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Layer, OptionValue, Options};
    use crate::progress::{NoProgress, Progress};
    use crate::rule::{always, Rule, RuleClass};
    use crate::state::tests::{scratch, TOOL};
    use std::path::Path;
    use std::sync::Mutex;

    /// Writes `<stem>.aux` holding the upper-cased source.
    struct Compile;
    impl Rule for Compile {
        fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
            let source = ctx.parameter(0).path.clone();
            let text = std::fs::read_to_string(&ctx.parameter(0).resolved)?;
            let aux = source.replace(".tex", ".aux");
            std::fs::write(ctx.resolve(&aux), text.to_uppercase())?;
            ctx.add_output(&aux);
            Ok(true)
        }
    }

    /// Writes `<stem>.bbl` holding the length of the aux file.
    struct Summarize;
    impl Rule for Summarize {
        fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
            let aux = ctx.parameter(0).path.clone();
            let len = std::fs::read(&ctx.parameter(0).resolved)?.len();
            let bbl = aux.replace(".aux", ".bbl");
            std::fs::write(ctx.resolve(&bbl), len.to_string())?;
            ctx.add_output(&bbl);
            Ok(true)
        }
    }

    struct Restless;
    impl Rule for Restless {
        fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
            ctx.arm(Action::Run);
            Ok(true)
        }
    }

    struct Fail;
    impl Rule for Fail {
        fn run(&mut self, _ctx: &mut RuleContext) -> anyhow::Result<bool> {
            anyhow::bail!("no luck")
        }
    }

    struct Sleep(&'static str);
    impl Rule for Sleep {
        fn command(&self, ctx: &RuleContext) -> anyhow::Result<Option<CommandLine>> {
            Ok(Some(CommandLine::new(
                vec!["sleep".to_owned(), self.0.to_owned()],
                ctx.root_dir().to_path_buf(),
            )))
        }
    }

    /// Dies of SIGSEGV, counting its runs in `crashes.txt`.
    struct Crash;
    impl Rule for Crash {
        fn command(&self, ctx: &RuleContext) -> anyhow::Result<Option<CommandLine>> {
            Ok(Some(CommandLine::new(
                ["sh", "-c", "echo x >> crashes.txt; kill -SEGV $$"]
                    .map(str::to_owned)
                    .to_vec(),
                ctx.root_dir().to_path_buf(),
            )))
        }
    }

    /// Waits for `paper.aux` before running.
    struct Patient;
    impl Rule for Patient {
        fn pre_evaluate(
            &mut self,
            ctx: &mut RuleContext,
            _action: Action,
            _triggers: &[FileId],
        ) -> anyhow::Result<Gate> {
            Ok(if ctx.resolve("paper.aux").exists() {
                Gate::Proceed
            } else {
                Gate::Defer
            })
        }
    }

    fn compile() -> Box<dyn Rule> {
        Box::new(Compile)
    }
    fn summarize() -> Box<dyn Rule> {
        Box::new(Summarize)
    }
    fn restless() -> Box<dyn Rule> {
        Box::new(Restless)
    }
    fn fail() -> Box<dyn Rule> {
        Box::new(Fail)
    }
    fn slow() -> Box<dyn Rule> {
        Box::new(Sleep("0.3"))
    }
    fn quick() -> Box<dyn Rule> {
        Box::new(Sleep("0.1"))
    }
    fn crash() -> Box<dyn Rule> {
        Box::new(Crash)
    }
    fn patient() -> Box<dyn Rule> {
        Box::new(Patient)
    }

    const fn class(name: &'static str, create: fn() -> Box<dyn Rule>) -> RuleClass {
        RuleClass {
            name,
            commands: &[Command::Build],
            phases: &[Phase::Execute],
            parameters: &[],
            always_evaluate: false,
            exclusive: false,
            refine: always,
            create,
        }
    }

    static COMPILE: RuleClass = RuleClass {
        parameters: &[&["LaTeX"]],
        ..class("Compile", compile)
    };
    static SUMMARIZE: RuleClass = RuleClass {
        parameters: &[&["LaTeXAuxilary"]],
        ..class("Summarize", summarize)
    };
    static RESTLESS: RuleClass = class("Restless", restless);
    static FAIL: RuleClass = class("Fail", fail);
    static SLOW: RuleClass = class("Slow", slow);
    static EXCLUSIVE: RuleClass = RuleClass {
        exclusive: true,
        ..class("Exclusive", quick)
    };
    static CRASH: RuleClass = class("Crash", crash);
    static PATIENT: RuleClass = class("Patient", patient);

    fn registry(classes: &[&'static RuleClass]) -> Registry {
        let mut registry = Registry::new();
        for &class in classes {
            registry.register(class);
        }
        registry
    }

    fn reopen(dir: &Path, options: Options) -> anyhow::Result<State> {
        Ok(State::new(&dir.join("paper.tex"), options, Box::new(NoProgress))?)
    }

    fn ran(work: &Work) -> Vec<String> {
        work.executed().iter().map(|e| e.rule.clone()).collect()
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Event>>>);
    impl Progress for Recorder {
        fn event(&mut self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    const BUILD: &[Command] = &[Command::Load, Command::Build, Command::Save];

    #[test]
    fn chain_settles_and_is_idempotent() -> anyhow::Result<()> {
        let (dir, state) = scratch(&[("paper.tex", "hello")])?;
        let registry = registry(&[&COMPILE, &SUMMARIZE]);

        let mut work = Work::new(state, &registry);
        assert!(work.run(BUILD)?);
        assert_eq!(
            ran(&work),
            vec![
                "Compile(build;execute;;paper.tex)",
                "Summarize(build;execute;;paper.aux)",
            ]
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("paper.bbl"))?, "5");

        let mut work = Work::new(reopen(dir.path(), Options::new())?, &registry);
        assert!(work.run(BUILD)?);
        assert!(work.executed().is_empty());

        std::fs::write(dir.path().join("paper.tex"), "hello again")?;
        filetime::set_file_mtime(
            dir.path().join("paper.tex"),
            filetime::FileTime::from_unix_time(4_000_000_000, 0),
        )?;
        let mut work = Work::new(reopen(dir.path(), Options::new())?, &registry);
        assert!(work.run(BUILD)?);
        assert_eq!(ran(&work).len(), 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("paper.bbl"))?, "11");
        Ok(())
    }

    #[test]
    fn unchanged_outputs_stop_propagation() -> anyhow::Result<()> {
        let (dir, state) = scratch(&[("paper.tex", "same")])?;
        let registry = registry(&[&COMPILE, &SUMMARIZE]);
        let mut work = Work::new(state, &registry);
        assert!(work.run(BUILD)?);

        // Same contents under a new timestamp: Compile reruns, its output
        // doesn't change, so Summarize stays put.
        std::fs::write(dir.path().join("paper.tex"), "SAME")?;
        filetime::set_file_mtime(
            dir.path().join("paper.tex"),
            filetime::FileTime::from_unix_time(4_000_000_000, 0),
        )?;
        let mut work = Work::new(reopen(dir.path(), Options::new())?, &registry);
        assert!(work.run(BUILD)?);
        assert_eq!(ran(&work), vec!["Compile(build;execute;;paper.tex)"]);
        Ok(())
    }

    #[test]
    fn triggering_reaches_only_consumers() -> anyhow::Result<()> {
        let (_dir, mut state) = scratch(&[("a.tex", ""), ("b.tex", ""), ("c.tex", ""), ("f.tex", "")])?;
        let [a, b, c, f] = ["a.tex", "b.tex", "c.tex", "f.tex"].map(|p| state.get_file(p).unwrap());
        let ra = state.add_rule(&TOOL, Command::Build, Phase::Execute, None, vec![a]).unwrap();
        let rb = state.add_rule(&TOOL, Command::Build, Phase::Execute, None, vec![b]).unwrap();
        let rc = state.add_rule(&TOOL, Command::Build, Phase::Execute, None, vec![c]).unwrap();
        state.add_output(ra, f);
        state.add_input(rb, f);
        state.file_mut(f).updated = true;

        let registry = Registry::new();
        let mut work = Work::new(state, &registry);
        assert!(work.propagate());
        let state = work.state();
        assert_eq!(state.rule(rb).triggers(Action::Run), &[f]);
        assert!(!state.rule(ra).needs_evaluation());
        assert!(!state.rule(rc).needs_evaluation());
        assert!(!state.file(f).has_been_updated());
        Ok(())
    }

    #[test]
    fn runaway_phase_is_reported() -> anyhow::Result<()> {
        let (dir, _) = scratch(&[("paper.tex", "")])?;
        let mut options = Options::new();
        options.set(Layer::CommandLine, "phaseCycles", OptionValue::Number(3.0))?;
        let registry = registry(&[&RESTLESS]);
        let mut work = Work::new(reopen(dir.path(), options)?, &registry);
        match work.run(BUILD) {
            Err(Error::NotConverged {
                command: Command::Build,
                phase: Phase::Execute,
                cycles: 3,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
        // The trailing save still ran.
        assert!(dir.path().join("paper-cache.yaml").exists());
        Ok(())
    }

    #[test]
    fn failures_are_logged_against_the_rule() -> anyhow::Result<()> {
        let (dir, _) = scratch(&[("paper.tex", "")])?;
        let recorder = Recorder::default();
        let state = State::new(&dir.path().join("paper.tex"), Options::new(), Box::new(recorder.clone()))?;
        let registry = registry(&[&FAIL]);
        let mut work = Work::new(state, &registry);
        assert!(!work.run(&[Command::Build])?);

        let events = recorder.0.lock().unwrap();
        assert!(events.contains(&Event::ActionStarted {
            rule: "Fail(build;execute;)".to_owned(),
            action: Action::Run,
        }));
        let logged = events.iter().any(|e| match e {
            Event::Log(msg) => {
                msg.severity == Severity::Error
                    && msg.name.as_deref() == Some("Fail(build;execute;)")
                    && msg.text.contains("no luck")
            }
            _ => false,
        });
        assert!(logged);
        Ok(())
    }

    #[test]
    fn exclusive_rules_run_alone() -> anyhow::Result<()> {
        let (dir, _) = scratch(&[("paper.tex", "")])?;
        let mut options = Options::new();
        options.set(Layer::CommandLine, "parallelism", OptionValue::Number(4.0))?;
        let registry = registry(&[&SLOW, &EXCLUSIVE]);
        let mut work = Work::new(reopen(dir.path(), options)?, &registry);
        assert!(work.run(&[Command::Build])?);

        let span = |name: &str| {
            work.executed()
                .iter()
                .find(|e| e.rule.starts_with(name))
                .and_then(|e| e.span)
                .unwrap()
        };
        let (_, slow_end) = span("Slow(");
        let (exclusive_start, _) = span("Exclusive(");
        assert!(slow_end <= exclusive_start);
        Ok(())
    }

    #[test]
    fn kill_leaves_only_save() -> anyhow::Result<()> {
        let (dir, state) = scratch(&[("paper.tex", "hello")])?;
        let registry = registry(&[&COMPILE]);
        let mut work = Work::new(state, &registry);
        work.kill_switch().kill();
        assert!(!work.run(BUILD)?);
        assert!(work.executed().is_empty());
        assert!(!dir.path().join("paper.aux").exists());
        assert!(dir.path().join("paper-cache.yaml").exists());
        Ok(())
    }

    #[test]
    fn crashing_tool_fails_once() -> anyhow::Result<()> {
        let (dir, _) = scratch(&[("paper.tex", "")])?;
        let recorder = Recorder::default();
        let state = State::new(&dir.path().join("paper.tex"), Options::new(), Box::new(recorder.clone()))?;
        let registry = registry(&[&CRASH]);
        let mut work = Work::new(state, &registry);
        assert!(!work.run(&[Command::Build])?);
        assert_eq!(std::fs::read_to_string(dir.path().join("crashes.txt"))?, "x\n");
        assert_eq!(ran(&work), vec!["Crash(build;execute;)"]);

        let events = recorder.0.lock().unwrap();
        let logged = events.iter().any(|e| match e {
            Event::Log(msg) => msg.text == "terminated by a signal",
            _ => false,
        });
        assert!(logged);
        Ok(())
    }

    #[test]
    fn deferred_action_waits_for_its_input() -> anyhow::Result<()> {
        let (dir, state) = scratch(&[("paper.tex", "hello")])?;
        let registry = registry(&[&PATIENT, &COMPILE]);
        let mut work = Work::new(state, &registry);
        assert!(work.run(&[Command::Build])?);
        assert_eq!(
            ran(&work),
            vec!["Compile(build;execute;;paper.tex)", "Patient(build;execute;)"]
        );
        assert!(dir.path().join("paper.aux").exists());
        Ok(())
    }
}
