use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;
pub const HEX_LEN: usize = 32;

/// Lowercase hex MD5 of a file's content. Used for integrity comparison only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Accepts a 32 character hex string in any case.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() != HEX_LEN || !raw.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        Some(Digest(raw.to_ascii_lowercase()))
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        Digest(format!("{:x}", Md5::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex characters, for reporting unrecognised binaries.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streams the file through MD5 in fixed-size chunks.
///
/// Returns `None` when the file is missing or unreadable; callers treat that
/// as its own state, distinct from any digest.
pub fn digest_file(path: &Path) -> Option<Digest> {
    match try_digest_file(path) {
        Ok(digest) => Some(digest),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no digest");
            None
        }
    }
}

fn try_digest_file(path: &Path) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    if file.metadata()?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
    }
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Digest(format!("{:x}", hasher.finalize())))
}
