//! Runs rule subprocesses, potentially in parallel.
//! Unaware of the build graph; just command execution.

use crate::state::RuleId;
use dashmap::DashMap;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::debug;

/// A program invocation requested by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Extra environment, on top of the inherited one.
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(args: Vec<String>, cwd: PathBuf) -> Self {
        CommandLine {
            args,
            cwd,
            env: Vec::new(),
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    Success,
    Failure,
    /// Killed by a signal.  The engine decides whether that was a
    /// cancellation or a crash.
    Interrupted,
}

/// The result of executing a rule's command.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub termination: Termination,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl TaskOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Success
    }

    fn spawn_failure(err: std::io::Error) -> Self {
        TaskOutput {
            termination: Termination::Failure,
            status: None,
            stdout: String::new(),
            stderr: err.to_string(),
        }
    }
}

pub struct FinishedTask {
    pub rule: RuleId,
    pub span: (Instant, Instant),
    pub output: TaskOutput,
}

/// Executes a command as a subprocess in its own process group, so that
/// cancelling it reaches any children it spawns.
fn run_command(
    rule: RuleId,
    cmdline: &CommandLine,
    pids: &DashMap<RuleId, u32>,
) -> std::io::Result<TaskOutput> {
    let (program, args) = match cmdline.args.split_first() {
        Some(split) => split,
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command line",
            ))
        }
    };
    let child = std::process::Command::new(program)
        .args(args)
        .current_dir(&cmdline.cwd)
        .envs(cmdline.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()?;
    pids.insert(rule, child.id());
    let result = child.wait_with_output();
    pids.remove(&rule);
    let out = result?;

    let termination = if out.status.success() {
        Termination::Success
    } else if out.status.signal().is_some() {
        Termination::Interrupted
    } else {
        Termination::Failure
    };
    Ok(TaskOutput {
        termination,
        status: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    /// Process ids of running commands, for cancellation.
    pids: Arc<DashMap<RuleId, u32>>,
    pub running: usize,
    exclusive: bool,
    parallelism: usize,
}

impl Runner {
    pub fn new(parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            pids: Arc::new(DashMap::new()),
            running: 0,
            exclusive: false,
            parallelism: parallelism.max(1),
        }
    }

    pub fn can_start_more(&self) -> bool {
        !self.exclusive && self.running < self.parallelism
    }

    /// Whether a task requiring the runner to itself may start now.
    pub fn can_start_exclusive(&self) -> bool {
        self.running == 0
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(&mut self, rule: RuleId, cmdline: CommandLine, exclusive: bool) {
        let tx = self.finished_send.clone();
        let pids = self.pids.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let output =
                run_command(rule, &cmdline, &pids).unwrap_or_else(TaskOutput::spawn_failure);
            let finish = Instant::now();

            let task = FinishedTask {
                rule,
                span: (start, finish),
                output,
            };
            // The send will only fail if the receiver disappeared, e.g. due to shutting down.
            let _ = tx.send(task);
        });
        self.running += 1;
        self.exclusive = exclusive;
    }

    /// Wait for a task to complete, with a timeout.
    /// If the timeout elapses return None.
    pub fn wait(&mut self, dur: Duration) -> Option<FinishedTask> {
        // The runner holds a sender itself, so the channel never disconnects.
        let task = self.finished_recv.recv_timeout(dur).ok()?;
        self.running -= 1;
        self.exclusive = false;
        Some(task)
    }

    /// Send SIGTERM to every running command's process group.
    pub fn kill_all(&self) {
        for entry in self.pids.iter() {
            debug!(pid = *entry.value(), "terminating");
            // Safety: killpg has no memory safety preconditions.
            unsafe {
                libc::killpg(*entry.value() as libc::pid_t, libc::SIGTERM);
            }
        }
    }
}
