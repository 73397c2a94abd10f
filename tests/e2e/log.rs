//! Tests for reporting what the engine logged.

use super::*;

#[test]
fn failed_run_reports_log_errors() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &DOCUMENT.replace("Hello.", "\\undefined"))?;
    let out = space.run(&mut space.command("paper.tex", &["load,build,log,save"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "[LaTeX(build;execute;;paper.tex)] error: run reported failure");
    assert_output_contains(&out, "error: Undefined control sequence. (paper.tex:3)");
    assert_output_not_contains(&out, "texmk: ran");
    Ok(())
}

#[test]
fn severity_filters_messages() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &DOCUMENT.replace("Hello.", "\\cite{knuth}"))?;
    let out = space.run_expect(&mut space.command("paper.tex", &["load,build,log,save"]))?;
    assert_output_contains(&out, "warning: Citation `knuth' on page 1 undefined");

    let out = space.run_expect(&mut space.command("paper.tex", &["-o", "severity=error", "load,log"]))?;
    assert_output_not_contains(&out, "warning:");
    Ok(())
}

#[test]
fn settled_reruns_leave_no_warning() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", &DOCUMENT.replace("Hello.", "See rerun."))?;
    let out = space.run_expect(&mut space.command("paper.tex", &["load,build,log,save"]))?;
    // Only the first run asked for another; the final log is clean.
    assert_output_not_contains(&out, "Label(s) may have changed");
    assert_eq!(space.engine_runs(), 2);
    Ok(())
}
