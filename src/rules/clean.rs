//! Removing generated files.
//!
//! `clean` removes intermediate files; `scrub` also removes the finished
//! document and the cache.

use super::{generated, output_name};
use crate::rule::{always, Command, Phase, Rule, RuleClass, RuleContext};
use crate::state::FileId;

pub static CLASS: RuleClass = RuleClass {
    name: "Clean",
    commands: &[Command::Clean, Command::Scrub],
    phases: &[Phase::Execute],
    parameters: &[],
    always_evaluate: true,
    exclusive: true,
    refine: always,
    create,
};

fn create() -> Box<dyn Rule> {
    Box::new(Clean)
}

struct Clean;

const PRODUCT_TYPES: &[&str] = &["PortableDocumentFormat", "DeviceIndependentFile", "PostScript"];

/// Side files LaTeX and friends leave next to the output, whether or not
/// the graph knows about them.
const SIDE_FILES: &[&str] = &["aux", "fls", "log", "toc", "out", "bbl", "blg", "lof", "lot"];

impl Rule for Clean {
    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        let scrub = ctx.command() == Command::Scrub;
        let job = ctx.job().map(str::to_owned);
        let state = ctx.state();
        let mut doomed: Vec<FileId> = state
            .files()
            .filter(|(_, f)| !f.producers().is_empty() && f.jobs.contains(&job))
            .filter(|(_, f)| scrub || !PRODUCT_TYPES.iter().any(|t| f.is_type(t)))
            .map(|(id, _)| id)
            .collect();

        let root = state.root_path().to_owned();
        let mut names: Vec<String> = SIDE_FILES.iter().map(|ext| generated(ctx, &root, ext)).collect();
        if scrub {
            for ext in ["pdf", "dvi", "ps"] {
                names.push(generated(ctx, &root, ext));
            }
        }
        for name in names {
            if let Some(id) = ctx.get_file(&name) {
                if !doomed.contains(&id) {
                    doomed.push(id);
                }
            }
        }

        for id in doomed {
            if ctx.state().try_file(id).is_some() {
                ctx.delete_file(id);
            }
        }

        if scrub {
            let cache = crate::cache::cache_path(ctx.state());
            crate::fs::remove(&cache)?;
            tracing::debug!(job = output_name(ctx, &root), "scrubbed");
        }
        Ok(true)
    }
}
