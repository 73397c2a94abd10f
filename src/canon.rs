//! Path canonicalization.
//!
//! Every path entering the graph goes through here, so that `./paper.tex`,
//! `paper.tex` and `chapters/../paper.tex` all name the same File.

use std::path::Path;

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".
pub fn canon_path<T: AsRef<str>>(inpath: T) -> String {
    let path = inpath.as_ref();
    let absolute = path.starts_with('/');
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match components.last() {
                Some(&last) if last != ".." => {
                    components.pop();
                }
                // "/.." is "/".
                _ if absolute => {}
                _ => components.push(".."),
            },
            _ => components.push(component),
        }
    }

    let joined = components.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Canonicalize a path as seen from `root`: paths inside the project
/// directory become relative, paths outside it stay absolute.
pub fn canon_path_in(root: &Path, inpath: &str) -> String {
    let path = canon_path(inpath);
    if !path.starts_with('/') {
        return path;
    }
    match Path::new(&path).strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_owned(),
        Ok(rel) => canon_path(rel.to_string_lossy()),
        Err(_) => path,
    }
}

/// Split a logical path into (directory, stem), where the directory is "."
/// for top-level files.  "out/paper.tex" => ("out", "paper").
pub fn dir_and_stem(path: &str) -> (&str, &str) {
    let (dir, name) = match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (".", path),
    };
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    (dir, stem)
}

/// Join a directory and a file name, without producing "./" prefixes.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        canon_path(name)
    } else {
        canon_path(format!("{}/{}", dir, name))
    }
}
