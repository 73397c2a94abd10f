//! Running BibTeX on a document's `.aux` file.

use crate::rule::{always, Action, Command, Gate, Phase, Rule, RuleClass, RuleContext};
use crate::state::FileId;
use crate::task::{CommandLine, TaskOutput};

pub static CLASS: RuleClass = RuleClass {
    name: "BibTeX",
    commands: &[Command::Build],
    phases: &[Phase::Execute],
    parameters: &[&["LaTeXAuxilary"]],
    always_evaluate: false,
    exclusive: false,
    refine: always,
    create,
};

fn create() -> Box<dyn Rule> {
    Box::new(BibTeX)
}

struct BibTeX;

/// The aux path without its extension, as BibTeX wants it.
fn base(ctx: &RuleContext) -> String {
    let aux = &ctx.parameter(0).path;
    aux.strip_suffix(".aux").unwrap_or(aux).to_owned()
}

/// Databases BibTeX reports opening, from its `.blg` log.
pub fn databases(blg: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in blg.lines() {
        let Some(rest) = line.strip_prefix("Database file #") else {
            continue;
        };
        let Some((_, path)) = rest.split_once(": ") else {
            continue;
        };
        let path = path.trim().to_owned();
        if !found.contains(&path) {
            found.push(path);
        }
    }
    found
}

impl Rule for BibTeX {
    fn pre_evaluate(
        &mut self,
        ctx: &mut RuleContext,
        _action: Action,
        _triggers: &[FileId],
    ) -> anyhow::Result<Gate> {
        let aux = std::fs::read_to_string(&ctx.parameter(0).resolved)?;
        Ok(if aux.contains("\\bibdata") {
            Gate::Proceed
        } else {
            Gate::Skip
        })
    }

    fn command(&self, ctx: &RuleContext) -> anyhow::Result<Option<CommandLine>> {
        let engine = ctx.string_option("bibtexEngine").unwrap_or("bibtex");
        Ok(Some(CommandLine {
            args: vec![engine.to_owned(), base(ctx)],
            cwd: ctx.root_dir().to_path_buf(),
            env: ctx.environment(),
        }))
    }

    fn process_output(&mut self, ctx: &mut RuleContext, output: &TaskOutput) -> anyhow::Result<bool> {
        let base = base(ctx);
        ctx.add_output(&format!("{}.bbl", base));
        if let Some(blg) = ctx.add_output(&format!("{}.blg", base)) {
            let text = std::fs::read_to_string(&ctx.file(blg).resolved)?;
            for path in databases(&text) {
                ctx.add_input(&path);
            }
        }
        Ok(output.success())
    }
}
