//! Command-line front end.

use crate::error::Error;
use crate::options::{self, Layer, Options};
use crate::progress::{ConsoleProgress, Severity};
use crate::registry::Registry;
use crate::rule::Command;
use crate::state::State;
use crate::work::Work;
use crate::{signal, terminal};
use anyhow::{anyhow, Context};
use argh::FromArgs;
use std::path::Path;

/// Name of the optional per-project config file, looked up beside the
/// root document.
pub const CONFIG_FILE: &str = "texmk.yaml";

const DEFAULT_COMMANDS: &str = "load,build,save";

#[derive(FromArgs)]
/// An incremental, rule-based builder for LaTeX documents.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    dir: Option<String>,

    /// set an option, as name=value; may be repeated
    #[argh(option, short = 'o')]
    option: Vec<String>,

    /// print executed command lines and debug diagnostics
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// print engine trace diagnostics
    #[argh(switch)]
    trace: bool,

    /// root document
    #[argh(positional)]
    file: String,

    /// comma-separated commands [default=load,build,save]
    #[argh(positional)]
    commands: Option<String>,
}

fn init_logging(args: &Args) {
    let level = if args.trace {
        tracing::Level::TRACE
    } else if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Options from the config file beside `root`, then from `-o` flags.
fn load_options(root: &Path, assignments: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::new();
    let config = root.parent().unwrap_or(Path::new("")).join(CONFIG_FILE);
    match std::fs::read_to_string(&config) {
        Ok(text) => options
            .load_config(&text)
            .with_context(|| format!("{}", config.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(anyhow!("read {}: {}", config.display(), err)),
    }
    for assignment in assignments {
        let (name, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("-o {:?}: expected name=value", assignment))?;
        let value = options::parse_value(name.trim(), raw)?;
        options.set(Layer::CommandLine, name.trim(), value)?;
    }
    Ok(options)
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(&args);

    if let Some(dir) = &args.dir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let commands = Command::parse_list(args.commands.as_deref().unwrap_or(DEFAULT_COMMANDS))?;
    let root = Path::new(&args.file);
    let options = load_options(root, &args.option)?;
    let severity: Severity = options
        .string("severity", None)
        .unwrap_or("warning")
        .parse()
        .map_err(|err: String| anyhow!(err))?;
    let progress = ConsoleProgress::new(severity, args.verbose, terminal::use_color());

    signal::register_sigint();
    let state = State::new(root, options, Box::new(progress))?;
    let registry = Registry::builtin();
    let mut work = Work::new(state, &registry);
    let result = work.run(&commands);

    let ran = work.executed().len();
    let failed = work.executed().iter().filter(|e| !e.success).count();
    match result {
        Ok(true) if ran == 0 => println!("texmk: no work to do"),
        Ok(true) => println!("texmk: ran {} actions, now up to date", ran),
        // The failing rules' messages are enough info.
        Ok(false) => {
            tracing::debug!(ran, failed, "build failed");
            return Ok(1);
        }
        Err(err @ Error::NotConverged { .. }) => {
            println!("texmk: error: {}", err);
            return Ok(2);
        }
        Err(err) => return Err(err.into()),
    }
    Ok(0)
}

/// Run the command line, returning the process exit code: 0 on success,
/// 1 when a rule failed, 2 when the build did not converge or could not
/// start.
pub fn run() -> i32 {
    match run_impl() {
        Ok(code) => code,
        Err(err) => {
            println!("texmk: error: {:#}", err);
            2
        }
    }
}
