//! Tests for the clean and scrub commands.

use super::*;

#[test]
fn clean_keeps_the_document() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    space.write("paper.toc", "")?;

    space.run_expect(&mut space.command("paper.tex", &["load,clean,save"]))?;
    for name in ["paper.log", "paper.aux", "paper.fls", "paper.toc"] {
        assert!(!space.exists(name), "{} survived", name);
    }
    assert!(space.exists("paper.pdf"));
    assert!(space.exists("paper.tex"));

    // What clean removed gets rebuilt.
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert!(space.exists("paper.log"));
    assert_eq!(space.engine_runs(), 2);
    Ok(())
}

#[test]
fn scrub_removes_everything() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    space.run_expect(&mut space.command("paper.tex", &["load,scrub"]))?;
    for name in ["paper.log", "paper.aux", "paper.fls", "paper.pdf", "paper-cache.yaml"] {
        assert!(!space.exists(name), "{} survived", name);
    }
    assert!(space.exists("paper.tex"));
    Ok(())
}

#[test]
fn graph_is_written() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &["load,build,graph,save"]))?;
    let dot = String::from_utf8(space.read("paper-graph.dot")?)?;
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains(
        "\"LaTeX(build;execute;;paper.tex)\" -> \"ParseLaTeXLog(build;execute;;paper.log)\""
    ));
    Ok(())
}
