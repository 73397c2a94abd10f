//! Support code for e2e tests, which run texmk as a binary against a fake
//! LaTeX engine.

mod basic;
mod bibtex;
mod cache;
mod clean;
mod jobs;
mod log;

use std::os::unix::fs::PermissionsExt;

pub fn texmk_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("texmk")
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Stands in for pdflatex.  It writes the log, listing, aux and product a
/// real engine would, honouring `-jobname` and `-output-format`, appends the
/// source name to `runs.txt`, and reacts to words in the document:
///   rerun         asks for one more run, until an aux file exists
///   forever       asks for another run every time, with a growing log
///   cite          warns about an undefined citation, until a bbl exists
///   bibliography  wants `\bibdata{refs}` processed into a bbl
///   undefined     reports an error and fails
const FAKE_LATEX: &str = r#"#!/bin/sh
for src; do :; done
name=${src%.tex}
product=pdf
for arg; do
  case $arg in
    -jobname=*) name=${arg#-jobname=} ;;
    -output-format=dvi) product=dvi ;;
  esac
done
echo "$src" >> runs.txt
{
  echo "This is FakeTeX, Version 3.141592653"
  echo "($src"
  if grep -q rerun "$src" && [ ! -f "$name.aux" ]; then
    echo "LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right."
  fi
  if grep -q forever "$src"; then
    cat runs.txt
    echo "LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right."
  fi
  if grep -q cite "$src" && [ ! -f "$name.bbl" ]; then
    echo "LaTeX Warning: Citation \`knuth' on page 1 undefined on input line 3."
  fi
  if grep -q bibliography "$src" && [ ! -f "$name.bbl" ]; then
    echo "No file $name.bbl."
  fi
  if grep -q undefined "$src"; then
    echo "./$src:3: Undefined control sequence."
  fi
  echo "Output written on $name.$product (1 page)."
} > "$name.log"
{
  printf 'PWD %s\nINPUT %s\n' "$(pwd -P)" "$src"
  if grep -q bibliography "$src" && [ -f "$name.bbl" ]; then
    echo "INPUT $name.bbl"
  fi
  printf 'OUTPUT %s.log\nOUTPUT %s.aux\nOUTPUT %s.%s\n' "$name" "$name" "$name" "$product"
} > "$name.fls"
echo '\relax' > "$name.aux"
if grep -q bibliography "$src"; then
  echo '\bibdata{refs}' >> "$name.aux"
fi
cat "$src" > "$name.$product"
if [ -f "$name.bbl" ]; then cat "$name.bbl" >> "$name.$product"; fi
if grep -q undefined "$src"; then exit 1; fi
"#;

/// Stands in for bibtex: turns `refs.bib` into `<base>.bbl`, logs the
/// database it read, and appends the base name to `bibtex-runs.txt`.
const FAKE_BIBTEX: &str = r#"#!/bin/sh
echo "$1" >> bibtex-runs.txt
{
  echo "This is FakeBibTeX, Version 0.99d"
  echo "The top-level auxiliary file: $1.aux"
  echo "Database file #1: refs.bib"
} > "$1.blg"
{
  echo '\begin{thebibliography}{1}'
  cat refs.bib
  echo '\end{thebibliography}'
} > "$1.bbl"
"#;

pub const DOCUMENT: &str = "\\documentclass{article}\n\\begin{document}\nHello.\n\\end{document}\n";

/// Manages a temporary directory for invoking texmk.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let space = TestSpace { dir };
        std::fs::create_dir(space.dir.path().join("bin"))?;
        for (name, script) in [("fakelatex.sh", FAKE_LATEX), ("bin/bibtex", FAKE_BIBTEX)] {
            space.write(name, script)?;
            let path = space.dir.path().join(name);
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(space)
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Write a file and push its mtime into the future, so that it counts as
    /// changed however quickly the test runs.
    pub fn edit(&self, path: &str, content: &str) -> anyhow::Result<()> {
        self.write(path, content)?;
        filetime::set_file_mtime(
            self.dir.path().join(path),
            filetime::FileTime::from_unix_time(4_000_000_000, 0),
        )?;
        Ok(())
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    fn lines(&self, path: &str) -> usize {
        self.read(path)
            .map(|runs| runs.iter().filter(|&&b| b == b'\n').count())
            .unwrap_or(0)
    }

    /// How many times the fake engine ran.
    pub fn engine_runs(&self) -> usize {
        self.lines("runs.txt")
    }

    /// How many times the fake bibtex ran.
    pub fn bibtex_runs(&self) -> usize {
        self.lines("bibtex-runs.txt")
    }

    /// A texmk invocation on `file` with the fake engine, and the fake bibtex
    /// first on the path.
    pub fn command(&self, file: &str, args: &[&str]) -> std::process::Command {
        let mut cmd = std::process::Command::new(texmk_binary());
        let engine = self.dir.path().join("fakelatex.sh");
        let mut path = std::ffi::OsString::from(self.dir.path().join("bin"));
        if let Some(inherited) = std::env::var_os("PATH") {
            path.push(":");
            path.push(inherited);
        }
        cmd.env("PATH", path)
            .arg("-o")
            .arg(format!("engine={}", engine.display()))
            .arg(file)
            .args(args);
        cmd
    }

    /// Invoke texmk, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
