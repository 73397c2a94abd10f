//! Tests for behavior around the cache file.

use super::*;

#[test]
fn corrupt_cache_is_ignored() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.write("paper-cache.yaml", "{{{ this is not yaml")?;
    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_output_contains(&out, "ignoring unreadable cache");
    assert_eq!(space.engine_runs(), 1);

    // It was replaced by a good one.
    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn changed_options_discard_rules() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    let out = space.run_expect(&mut space.command("paper.tex", &["-o", "severity=info"]))?;
    assert_output_contains(&out, "discarding cached rules");
    assert_eq!(space.engine_runs(), 2);
    Ok(())
}

#[test]
fn without_load_everything_reruns() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    space.run_expect(&mut space.command("paper.tex", &["build"]))?;
    assert_eq!(space.engine_runs(), 2);
    Ok(())
}

#[test]
fn save_can_be_disabled() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.write("texmk.yaml", "saveCache: false\n")?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert!(space.exists("paper.pdf"));
    assert!(!space.exists("paper-cache.yaml"));
    Ok(())
}
