//! `%!TeX name = value` comments at the top of a document.

use crate::options::{self, OptionsPatch};
use crate::progress::Severity;
use crate::rule::{Command, Phase, Rule, RuleClass, RuleContext};

pub static CLASS: RuleClass = RuleClass {
    name: "ParseLaTeXMagic",
    commands: &[
        Command::Build,
        Command::Clean,
        Command::Graph,
        Command::Log,
        Command::Scrub,
    ],
    phases: &[Phase::Initialize],
    parameters: &[&["LaTeX"]],
    always_evaluate: false,
    exclusive: false,
    refine: super::masters_only,
    create,
};

struct Magic;

fn create() -> Box<dyn Rule> {
    Box::new(Magic)
}

/// Extract `(name, value)` pairs from the leading comment block.
pub fn parse(text: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix('%') else {
            break;
        };
        let Some(directive) = comment.trim_start().strip_prefix('!') else {
            continue;
        };
        let directive = directive.trim_start();
        if !directive.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("tex")) {
            continue;
        }
        let Some((name, value)) = directive.get(3..).and_then(|rest| rest.split_once('=')) else {
            continue;
        };
        let name = match name.trim() {
            "program" | "TS-program" => "engine",
            name => name,
        };
        found.push((name.to_owned(), value.trim().to_owned()));
    }
    found
}

impl Magic {
    fn scan(&self, ctx: &mut RuleContext) -> anyhow::Result<()> {
        let resolved = ctx.parameter(0).resolved.clone();
        let text = crate::fs::read_head(&resolved, 64 * 1024)?;
        let mut patch = OptionsPatch::new();
        for (name, raw) in parse(&text) {
            match options::parse_value(&name, &raw) {
                Ok(value) => patch.set(name, value),
                Err(err) => ctx.log(Severity::Warning, format!("ignoring magic comment: {}", err)),
            }
        }
        if !patch.is_empty() {
            ctx.patch_options(patch);
        }
        Ok(())
    }
}

impl Rule for Magic {
    fn initialize(&mut self, ctx: &mut RuleContext) -> anyhow::Result<()> {
        self.scan(ctx)
    }

    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        self.scan(ctx)?;
        Ok(true)
    }
}
