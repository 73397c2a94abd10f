//! Tests for documents with a bibliography.

use super::*;

const CITING: &str = "\\documentclass{article}\n\\begin{document}\nSee \\cite{knuth}.\n\\bibliography{refs}\n\\end{document}\n";

const REFS: &str = "@book{knuth, title={The TeXbook}}\n";

#[test]
fn bibliography_is_built_in() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", CITING)?;
    space.write("refs.bib", REFS)?;

    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    // One run to write the aux, bibtex, one run to pick up the bbl.
    assert_eq!(space.engine_runs(), 2);
    assert_eq!(space.bibtex_runs(), 1);
    let pdf = String::from_utf8(space.read("paper.pdf")?)?;
    assert!(pdf.contains("The TeXbook"));
    assert_output_contains(&out, "now up to date");

    let out = space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "texmk: no work to do\n");
    assert_eq!(space.engine_runs(), 2);
    assert_eq!(space.bibtex_runs(), 1);
    Ok(())
}

#[test]
fn edited_database_reruns_bibtex_then_latex() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", CITING)?;
    space.write("refs.bib", REFS)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    // refs.bib is only known from bibtex's log.
    space.edit("refs.bib", "@book{knuth, title={The METAFONTbook}}\n")?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.bibtex_runs(), 2);
    assert_eq!(space.engine_runs(), 3);
    let pdf = String::from_utf8(space.read("paper.pdf")?)?;
    assert!(pdf.contains("The METAFONTbook"));
    Ok(())
}

#[test]
fn document_and_database_edited_together() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", CITING)?;
    space.write("refs.bib", REFS)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;

    // LaTeX and bibtex each wait on the other's output; LaTeX goes first,
    // then bibtex, then LaTeX again for the new bbl.
    space.edit("paper.tex", &CITING.replace("See", "Read"))?;
    space.edit("refs.bib", "@book{knuth, title={Literate Programming}}\n")?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 4);
    assert_eq!(space.bibtex_runs(), 2);
    let pdf = String::from_utf8(space.read("paper.pdf")?)?;
    assert!(pdf.contains("Read \\cite{knuth}"));
    assert!(pdf.contains("Literate Programming"));
    Ok(())
}

#[test]
fn no_bibdata_no_bibtex() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("paper.tex", DOCUMENT)?;
    space.run_expect(&mut space.command("paper.tex", &[]))?;
    assert_eq!(space.engine_runs(), 1);
    assert_eq!(space.bibtex_runs(), 0);
    assert!(!space.exists("paper.bbl"));
    Ok(())
}
