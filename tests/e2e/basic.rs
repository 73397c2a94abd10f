use super::*;

#[test]
fn builds_document() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_output_contains(&out, "texmk: ran");
    assert_eq!(space.read("paper.pdf")?, DOCUMENT.as_bytes());
    assert!(space.exists("paper-cache.yaml"));
    assert_eq!(space.engine_runs(), 1);
    Ok(())
}

#[test]
fn second_build_does_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "texmk: no work to do\n");
    assert_eq!(space.engine_runs(), 1);
    Ok(())
}

#[test]
fn edit_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    let edited = DOCUMENT.replace("Hello.", "Hello again.");
    space.edit("paper.tex", &edited)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 2);
    assert_eq!(space.read("paper.pdf")?, edited.as_bytes());
    Ok(())
}

#[test]
fn reruns_until_labels_settle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &DOCUMENT.replace("Hello.", "See rerun."))?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 2);
    Ok(())
}

#[test]
fn endless_reruns_do_not_converge() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &DOCUMENT.replace("Hello.", "On and on, forever."))?;
    let out = space.run(&mut space.command("paper.tex", &["-o", "phaseCycles=8"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "did not converge after 8 cycles");
    // The partial progress is still saved.
    assert!(space.exists("paper-cache.yaml"));
    Ok(())
}

#[test]
fn missing_document() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut space.command("nope.tex", &[]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "texmk: error: input file");
    Ok(())
}

#[test]
fn unknown_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    let out = space.run(&mut space.command("paper.tex", &["build,frobnicate"]))?;
    assert_eq!(out.status.code(), Some(2));
    assert_output_contains(&out, "unknown command \"frobnicate\"");
    assert_eq!(space.engine_runs(), 0);
    Ok(())
}

#[test]
fn command_line_beats_magic_comments() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &format!("% !TeX program = ./missing-engine\n{}", DOCUMENT))?;
    // Magic comments override the config file, but not the command line.
    space.write("texmk.yaml", "engine: pdflatex\n")?;
    let out = space.run(&mut space.command("paper.tex", &[]))?;
    assert!(out.status.success());
    assert_eq!(space.engine_runs(), 1);
    Ok(())
}
