//! LaTeX log parsing, and reporting the parsed messages.

use crate::classify::virtual_path;
use crate::progress::{Message, Reference, Severity};
use crate::rule::{always, Command, Phase, Rule, RuleClass, RuleContext};
use serde::{Deserialize, Serialize};

pub static PARSE: RuleClass = RuleClass {
    name: "ParseLaTeXLog",
    commands: &[Command::Build],
    phases: &[Phase::Execute],
    parameters: &[&["LaTeXLog"]],
    always_evaluate: false,
    exclusive: false,
    refine: always,
    create: create_parse,
};

pub static REPORT: RuleClass = RuleClass {
    name: "ReportLogMessages",
    commands: &[Command::Log],
    phases: &[Phase::Execute],
    parameters: &[&["ParsedLaTeXLog"]],
    always_evaluate: true,
    exclusive: false,
    refine: always,
    create: create_report,
};

fn create_parse() -> Box<dyn Rule> {
    Box::new(ParseLog)
}

fn create_report() -> Box<dyn Rule> {
    Box::new(ReportMessages)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub messages: Vec<Message>,
    /// The log asks for another run, e.g. because labels changed.
    pub rerun: bool,
    /// Files the run looked for and didn't find.
    pub missing: Vec<String>,
}

/// Split `file:line: text`, as written with `-file-line-error`.
fn file_line_error(line: &str) -> Option<(&str, usize, &str)> {
    let mut from = 0;
    while let Some(pos) = line[from..].find(':') {
        let colon = from + pos;
        let rest = &line[colon + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if colon > 0 && digits > 0 && rest[digits..].starts_with(": ") {
            let number = rest[..digits].parse().ok()?;
            return Some((&line[..colon], number, &rest[digits + 2..]));
        }
        from = colon + 1;
    }
    None
}

/// `Package foo Warning: text` => ("foo", "text").
fn package_message<'a>(line: &'a str, kind: &str) -> Option<(&'a str, &'a str)> {
    let rest = line.strip_prefix("Package ")?;
    let (package, text) = rest.split_once(' ')?;
    let text = text.strip_prefix(kind)?.strip_prefix(": ")?;
    Some((package, text))
}

pub fn parse(text: &str) -> ParsedLog {
    let mut log = ParsedLog::default();
    for line in text.lines() {
        let line = line.trim_end();
        if line.contains("Rerun to get") || line.contains("Rerun LaTeX") {
            log.rerun = true;
        }
        if let Some(rest) = line.strip_prefix("No file ") {
            let path = rest.trim_end_matches('.').to_owned();
            if !log.missing.contains(&path) {
                log.missing.push(path);
            }
            continue;
        }

        let msg = if let Some((file, number, text)) = file_line_error(line) {
            let mut msg = Message::new(Severity::Error, text);
            msg.source = Some(Reference {
                file: crate::canon::canon_path(file),
                range: Some((number, number)),
            });
            msg
        } else if let Some(text) = line.strip_prefix("! ") {
            Message::new(Severity::Error, text)
        } else if let Some(text) = line.strip_prefix("LaTeX Warning: ") {
            Message::new(Severity::Warning, text)
        } else if let Some(text) = line.strip_prefix("LaTeX Font Warning: ") {
            let mut msg = Message::new(Severity::Warning, text);
            msg.category = Some("font".to_owned());
            msg
        } else if let Some((package, text)) = package_message(line, "Warning") {
            let mut msg = Message::new(Severity::Warning, text);
            msg.category = Some(package.to_owned());
            msg
        } else if let Some((package, text)) = package_message(line, "Info") {
            let mut msg = Message::new(Severity::Info, text);
            msg.category = Some(package.to_owned());
            msg
        } else {
            continue;
        };
        log.messages.push(msg);
    }
    log
}

struct ParseLog;

impl Rule for ParseLog {
    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        let log = ctx.parameter(0);
        let bytes = std::fs::read(&log.resolved)?;
        let target = virtual_path(&log.path, "ParsedLaTeXLog");
        // TeX logs are in whatever encoding the document used.
        let value = serde_yaml::to_value(parse(&String::from_utf8_lossy(&bytes)))?;
        if let Some(id) = ctx.add_output(&target) {
            ctx.set_value(id, value);
        }
        Ok(true)
    }
}

struct ReportMessages;

impl Rule for ReportMessages {
    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        let Some(log) = ctx.parameter(0).value_as::<ParsedLog>() else {
            return Ok(true);
        };
        let source = ctx.parameter(0).path.clone();
        let name = source.strip_suffix("-ParsedLaTeXLog").unwrap_or(&source).to_owned();
        for mut msg in log.messages {
            if msg.log.is_none() {
                msg.log = Some(Reference {
                    file: name.clone(),
                    range: None,
                });
            }
            ctx.log_message(msg);
        }
        Ok(true)
    }
}
