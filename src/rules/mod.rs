//! The built-in rule catalog.

mod bibtex;
mod clean;
mod graph;
mod latex;
mod listing;
mod log;
mod magic;

pub use listing::FileListing;
pub use log::ParsedLog;

use crate::canon::{canon_path, dir_and_stem, join};
use crate::rule::{Candidate, RuleClass, RuleContext};

/// Registration order is discovery order.
pub static BUILTIN: &[&RuleClass] = &[
    &magic::CLASS,
    &latex::CLASS,
    &listing::CLASS,
    &log::PARSE,
    &bibtex::CLASS,
    &log::REPORT,
    &clean::CLASS,
    &graph::CLASS,
];

/// Documents, as opposed to fragments pulled in by \input.
fn masters_only(candidate: &Candidate) -> bool {
    candidate
        .parameters
        .iter()
        .all(|f| f.sub_type.as_deref() == Some("master"))
}

/// The base name a tool run on `source` writes to: `jobName`, else the job,
/// else the source's stem.
fn output_name<'a>(ctx: &'a RuleContext, source: &'a str) -> &'a str {
    ctx.string_option("jobName")
        .or(ctx.job())
        .unwrap_or_else(|| dir_and_stem(source).1)
}

/// Logical path of a generated file with extension `ext`.
fn generated(ctx: &RuleContext, source: &str, ext: &str) -> String {
    let dir = ctx.string_option("outputDirectory").unwrap_or(".");
    let name = format!("{}.{}", output_name(ctx, source), ext);
    canon_path(join(dir, &name))
}

/// Extension of the document a LaTeX run produces.
fn product_extension(ctx: &RuleContext) -> &'static str {
    match ctx.string_option("outputFormat") {
        Some("dvi") | Some("ps") => "dvi",
        _ => "pdf",
    }
}
