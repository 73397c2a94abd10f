//! Parsing the `.fls` file listing written by `-recorder`.

use crate::canon::{canon_path, join};
use crate::classify::virtual_path;
use crate::rule::{always, Command, Phase, Rule, RuleClass, RuleContext};
use serde::{Deserialize, Serialize};

pub static CLASS: RuleClass = RuleClass {
    name: "ParseLaTeXFileListing",
    commands: &[Command::Build],
    phases: &[Phase::Execute],
    parameters: &[&["LaTeXFileListing"]],
    always_evaluate: false,
    exclusive: false,
    refine: always,
    create,
};

fn create() -> Box<dyn Rule> {
    Box::new(ParseListing)
}

/// Files a LaTeX run read and wrote, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, path: String) {
    if !list.contains(&path) {
        list.push(path);
    }
}

fn resolve(pwd: Option<&str>, path: &str) -> String {
    match pwd {
        Some(dir) if !path.starts_with('/') => canon_path(join(dir, path)),
        _ => canon_path(path),
    }
}

pub fn parse(text: &str) -> FileListing {
    let mut listing = FileListing::default();
    let mut pwd: Option<&str> = None;
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(dir) = line.strip_prefix("PWD ") {
            pwd = Some(dir);
        } else if let Some(path) = line.strip_prefix("INPUT ") {
            push_unique(&mut listing.inputs, resolve(pwd, path));
        } else if let Some(path) = line.strip_prefix("OUTPUT ") {
            push_unique(&mut listing.outputs, resolve(pwd, path));
        }
    }
    listing
}

struct ParseListing;

impl Rule for ParseListing {
    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        let fls = ctx.parameter(0);
        let text = std::fs::read_to_string(&fls.resolved)?;
        let target = virtual_path(&fls.path, "ParsedLaTeXFileListing");
        let value = serde_yaml::to_value(parse(&text))?;
        if let Some(id) = ctx.add_output(&target) {
            ctx.set_value(id, value);
        }
        Ok(true)
    }
}
