//! Tests for building several jobs from one document.

use super::*;

const JOBS: &str = "jobs:\n  screen: {}\n  print:\n    outputFormat: dvi\n";

#[test]
fn each_job_gets_its_own_outputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.write("texmk.yaml", JOBS)?;

    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 2);
    for name in ["screen.log", "screen.aux", "screen.pdf", "print.log", "print.aux", "print.dvi"] {
        assert!(space.exists(name), "{} missing", name);
    }
    assert!(!space.exists("paper.pdf"));
    assert!(!space.exists("print.pdf"));

    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "texmk: no work to do\n");

    space.edit("paper.tex", &DOCUMENT.replace("Hello", "Goodbye"))?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 4);
    Ok(())
}

#[test]
fn clean_handles_every_job() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.write("texmk.yaml", JOBS)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    space.run_expect(&mut space.command("paper.tex", &["load,clean,save"]))?;
    for name in ["screen.log", "screen.aux", "screen.fls", "print.log", "print.aux", "print.fls"] {
        assert!(!space.exists(name), "{} survived", name);
    }
    // Products, and the source both jobs share.
    for name in ["screen.pdf", "print.dvi", "paper.tex"] {
        assert!(space.exists(name), "{} removed", name);
    }
    Ok(())
}

#[test]
fn cleaning_one_job_keeps_the_other() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &["-o", "jobNames=one,two"]))?;
    assert!(space.exists("one.pdf"));
    assert!(space.exists("two.pdf"));

    space.run_expect(&mut space.command("paper.tex", &["-o", "jobNames=one", "load,clean,save"]))?;
    assert!(!space.exists("one.log"));
    assert!(!space.exists("one.aux"));
    for name in ["two.log", "two.aux", "two.fls", "paper.tex"] {
        assert!(space.exists(name), "{} removed", name);
    }
    Ok(())
}
