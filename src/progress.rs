//! Build progress events, for the purpose of display to the user and for
//! tools (editors, test harnesses) that watch a build.

use crate::rule::Action;
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Trace,
    Info,
    Warning,
    Error,
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "trace" => Severity::Trace,
            "info" => Severity::Info,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            _ => return Err(format!("unknown severity {:?}", s)),
        })
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Trace => "trace",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A location in a file, e.g. the source line a LaTeX error points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(usize, usize)>,
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.range {
            None => write!(f, "{}", self.file),
            Some((start, end)) if start == end => write!(f, "{}:{}", self.file, start),
            Some((start, end)) => write!(f, "{}:{}-{}", self.file, start, end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    /// Who is speaking: a rule key, or a tool name for parsed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Reference>,
}

impl Message {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Message {
            severity,
            text: text.into(),
            name: None,
            category: None,
            source: None,
            log: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Everything a build reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Log(Message),
    FileAdded(String),
    FileDeleted(String),
    FileChanged(String),
    /// A rule is about to perform an action.
    ActionStarted { rule: String, action: Action },
    /// A rule spawned a subprocess.
    CommandStarted { rule: String, command: String },
}

/// Trait for build progress notifications.
pub trait Progress {
    fn event(&mut self, event: &Event);
}

/// Progress implementation that prints to the console.
pub struct ConsoleProgress {
    /// Least severe message to print.
    severity: Severity,
    /// Whether to print command lines of started programs.
    verbose: bool,
    color: bool,
}

impl ConsoleProgress {
    pub fn new(severity: Severity, verbose: bool, color: bool) -> Self {
        ConsoleProgress {
            severity,
            verbose,
            color,
        }
    }

    fn print_message(&self, msg: &Message) {
        let label = match (self.color, msg.severity) {
            (true, Severity::Error) => "\x1b[31merror\x1b[0m".to_owned(),
            (true, Severity::Warning) => "\x1b[33mwarning\x1b[0m".to_owned(),
            (_, severity) => severity.to_string(),
        };
        let mut line = String::new();
        if let Some(name) = &msg.name {
            line.push_str(&format!("[{}] ", name));
        }
        line.push_str(&format!("{}: {}", label, msg.text));
        if let Some(source) = &msg.source {
            line.push_str(&format!(" ({})", source));
        }
        let _ = writeln!(std::io::stdout(), "{}", line);
    }
}

impl Progress for ConsoleProgress {
    fn event(&mut self, event: &Event) {
        match event {
            Event::Log(msg) if msg.severity >= self.severity => self.print_message(msg),
            Event::CommandStarted { command, .. } if self.verbose => {
                let _ = writeln!(std::io::stdout(), "{}", command);
            }
            _ => {}
        }
    }
}

/// Progress implementation that drops everything, for library callers that
/// only care about the result.
#[derive(Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn event(&mut self, _event: &Event) {}
}
