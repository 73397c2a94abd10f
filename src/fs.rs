//! Filesystem access used for change detection.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    /// Nanoseconds since the epoch, the form stored in the cache.
    pub fn as_nanos(&self) -> Option<u64> {
        match self {
            MTime::Missing => None,
            MTime::Stamp(t) => t
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_nanos() as u64),
        }
    }

    pub fn from_nanos(nanos: Option<u64>) -> Self {
        match nanos {
            None => MTime::Missing,
            Some(n) => MTime::Stamp(UNIX_EPOCH + Duration::from_nanos(n)),
        }
    }
}

/// stat() an on-disk path, producing its MTime.
pub fn stat(path: &Path) -> std::io::Result<MTime> {
    Ok(match std::fs::metadata(path) {
        Ok(meta) => MTime::Stamp(meta.modified()?),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                MTime::Missing
            } else {
                return Err(err);
            }
        }
    })
}

/// Hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{:02x}", byte);
    }
    Ok(out)
}

/// Remove a file, treating "already gone" as success.
pub fn remove(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        r => r,
    }
}

/// Read the first `limit` bytes of a file, lossily decoded.
pub fn read_head(path: &Path, limit: usize) -> std::io::Result<String> {
    let f = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    f.take(limit as u64).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
