//! Writing the rule graph in GraphViz format.

use super::generated;
use crate::rule::{always, Command, Phase, Rule, RuleClass, RuleContext};
use std::fmt::Write as _;

pub static CLASS: RuleClass = RuleClass {
    name: "DependencyGraph",
    commands: &[Command::Graph],
    phases: &[Phase::Execute],
    parameters: &[],
    always_evaluate: true,
    exclusive: false,
    refine: always,
    create,
};

fn create() -> Box<dyn Rule> {
    Box::new(DependencyGraph)
}

struct DependencyGraph;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render direct rule-to-rule edges, one per line, sorted.
pub fn render(state: &crate::state::State) -> String {
    let mut edges: Vec<String> = state
        .distances()
        .into_iter()
        .filter(|&(_, hops)| hops == 1)
        .map(|((from, to), _)| {
            format!(
                "  {} -> {};",
                quote(&state.rule(from).key),
                quote(&state.rule(to).key)
            )
        })
        .collect();
    edges.sort();

    let mut out = String::from("digraph {\n  rankdir = LR;\n");
    let mut nodes: Vec<&str> = state.rules().map(|(_, r)| r.key.as_str()).collect();
    nodes.sort();
    for node in nodes {
        let _ = writeln!(out, "  {};", quote(node));
    }
    for edge in edges {
        out.push_str(&edge);
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

impl Rule for DependencyGraph {
    fn run(&mut self, ctx: &mut RuleContext) -> anyhow::Result<bool> {
        let root = ctx.state().root_path().to_owned();
        let name = generated(ctx, &root, "dot");
        let name = match name.strip_suffix(".dot") {
            Some(base) => format!("{}-graph.dot", base),
            None => name,
        };
        let path = ctx.resolve(&name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, render(ctx.state()))?;
        ctx.add_output(&name);
        Ok(true)
    }
}
