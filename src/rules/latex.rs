//! Running the LaTeX engine on a document.
//!
//! The engine is run with `-recorder`, so every run leaves a `.fls` listing
//! of what it read and wrote.  The parsed listing and log come back to this
//! rule as virtual inputs and drive its dependencies and reruns.

use super::{generated, product_extension, FileListing, ParsedLog};
use crate::classify::virtual_path;
use crate::file::File;
use crate::rule::{Action, Command, Phase, Rule, RuleClass, RuleContext};
use crate::state::FileId;
use crate::task::{CommandLine, TaskOutput};
use tracing::debug;

pub static CLASS: RuleClass = RuleClass {
    name: "LaTeX",
    commands: &[Command::Build],
    phases: &[Phase::Execute],
    parameters: &[&["LaTeX"]],
    always_evaluate: false,
    exclusive: false,
    refine: super::masters_only,
    create,
};

struct LaTeX;

fn create() -> Box<dyn Rule> {
    Box::new(LaTeX)
}

fn source(ctx: &RuleContext) -> String {
    ctx.parameter(0).path.clone()
}

impl Rule for LaTeX {
    fn initialize(&mut self, ctx: &mut RuleContext) -> anyhow::Result<()> {
        let source = source(ctx);
        let log = generated(ctx, &source, "log");
        let fls = generated(ctx, &source, "fls");
        ctx.add_input(&virtual_path(&log, "ParsedLaTeXLog"));
        ctx.add_input(&virtual_path(&fls, "ParsedLaTeXFileListing"));
        Ok(())
    }

    fn action_for(&self, file: &File) -> Option<Action> {
        if file.is_virtual {
            Some(Action::UpdateDependencies)
        } else {
            Some(Action::Run)
        }
    }

    fn command(&self, ctx: &RuleContext) -> anyhow::Result<Option<CommandLine>> {
        let source = source(ctx);
        let engine = ctx.string_option("engine").unwrap_or("pdflatex");
        let mut args: Vec<String> = vec![
            engine.to_owned(),
            "-file-line-error".to_owned(),
            "-interaction=batchmode".to_owned(),
            "-recorder".to_owned(),
        ];
        let dir = ctx.string_option("outputDirectory").unwrap_or(".");
        if dir != "." {
            std::fs::create_dir_all(ctx.resolve(dir))?;
            args.push(format!("-output-directory={}", dir));
        }
        if let Some(name) = ctx.string_option("jobName").or(ctx.job()) {
            args.push(format!("-jobname={}", name));
        }
        if product_extension(ctx) == "dvi" {
            args.push("-output-format=dvi".to_owned());
        }
        args.push(source);
        Ok(Some(CommandLine {
            args,
            cwd: ctx.root_dir().to_path_buf(),
            env: ctx.environment(),
        }))
    }

    fn process_output(&mut self, ctx: &mut RuleContext, output: &TaskOutput) -> anyhow::Result<bool> {
        let source = source(ctx);
        for ext in ["log", "fls", "aux", product_extension(ctx)] {
            let path = generated(ctx, &source, ext);
            ctx.add_output(&path);
        }
        Ok(output.success())
    }

    fn update_dependencies(&mut self, ctx: &mut RuleContext, triggers: &[FileId]) -> anyhow::Result<bool> {
        // Listings first, so the log sees this rule's own outputs.
        let mut listings = Vec::new();
        let mut logs = Vec::new();
        for &trigger in triggers {
            let file = ctx.file(trigger);
            if file.is_type("ParsedLaTeXFileListing") {
                listings.extend(file.value_as::<FileListing>());
            } else if file.is_type("ParsedLaTeXLog") {
                logs.extend(file.value_as::<ParsedLog>());
            }
        }
        for listing in listings {
            for path in &listing.outputs {
                ctx.add_output(path);
            }
            for path in listing.inputs.iter().filter(|p| !listing.outputs.contains(p)) {
                ctx.add_input(path);
            }
        }
        for log in logs {
            for path in &log.missing {
                let known = ctx
                    .state()
                    .file_id(path)
                    .is_some_and(|id| ctx.inputs().contains(&id) || ctx.outputs().contains(&id));
                // Made by another tool since the run that missed it.
                if ctx.add_optional_input(path).is_some() && !known {
                    debug!(rule = %ctx.key(), path = %path, "missing input appeared");
                    ctx.arm(Action::Run);
                }
            }
            if log.rerun {
                debug!(rule = %ctx.key(), "log asks for a rerun");
                ctx.arm(Action::Run);
            }
        }
        Ok(true)
    }
}
