//! File type classification by name, and the naming convention for virtual
//! files.
//!
//! A virtual file is named after the physical file it was derived from plus
//! a `-<Type>` suffix, e.g. `paper.log-ParsedLaTeXLog`.

use std::path::Path;

/// Types that only ever name virtual files.
pub const VIRTUAL_TYPES: &[&str] = &["ParsedLaTeXLog", "ParsedLaTeXFileListing"];

const EXTENSIONS: &[(&str, &str)] = &[
    ("tex", "LaTeX"),
    ("ltx", "LaTeX"),
    ("lhs", "LiterateHaskell"),
    ("lagda", "LiterateAgda"),
    ("Rnw", "Knitr"),
    ("Rtex", "Knitr"),
    ("Pnw", "Pweave"),
    ("log", "LaTeXLog"),
    ("fls", "LaTeXFileListing"),
    ("aux", "LaTeXAuxilary"),
    ("toc", "LaTeXTableOfContents"),
    ("bib", "BibTeXDatabase"),
    ("bbl", "BibTeXBibliography"),
    ("blg", "BibTeXLog"),
    ("idx", "IndexControlFile"),
    ("ind", "IndexFile"),
    ("pdf", "PortableDocumentFormat"),
    ("dvi", "DeviceIndependentFile"),
    ("ps", "PostScript"),
    ("dot", "GraphViz"),
];

/// Source types whose files are either standalone documents or fragments.
const SOURCE_TYPES: &[&str] = &["LaTeX", "LiterateHaskell", "LiterateAgda", "Knitr", "Pweave"];

/// How much of a source file is read looking for a document class.
const SNIFF_LIMIT: usize = 8192;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub file_type: Option<String>,
    /// For sources: "master" when the file starts a document, else "partial".
    pub sub_type: Option<String>,
    pub is_virtual: bool,
}

pub fn virtual_path(path: &str, virtual_type: &str) -> String {
    format!("{}-{}", path, virtual_type)
}

pub fn virtual_type(path: &str) -> Option<&'static str> {
    VIRTUAL_TYPES.iter().copied().find(|t| {
        path.len() > t.len() + 1 && path.ends_with(t) && path[..path.len() - t.len()].ends_with('-')
    })
}

fn extension_type(path: &str) -> Option<&'static str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, t)| *t)
}

/// Classify a logical path.  `resolved` is read for sources inside the
/// project to tell documents from fragments.
pub fn classify(path: &str, resolved: &Path) -> Classification {
    if let Some(t) = virtual_type(path) {
        return Classification {
            file_type: Some(t.to_owned()),
            sub_type: None,
            is_virtual: true,
        };
    }

    let Some(file_type) = extension_type(path) else {
        return Classification::default();
    };
    let mut sub_type = None;
    if SOURCE_TYPES.contains(&file_type) && !path.starts_with('/') {
        if let Ok(head) = crate::fs::read_head(resolved, SNIFF_LIMIT) {
            let master = head.lines().any(|line| {
                let line = line.trim_start();
                !line.starts_with('%')
                    && (line.contains("\\documentclass") || line.contains("\\documentstyle"))
            });
            sub_type = Some(if master { "master" } else { "partial" }.to_owned());
        }
    }
    Classification {
        file_type: Some(file_type.to_owned()),
        sub_type,
        is_virtual: false,
    }
}
