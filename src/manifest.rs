use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs, io,
    path::{Component, Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest entry {index} is missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("manifest entry {path} has an invalid {field}: {value:?}")]
    InvalidDigest {
        path: String,
        field: &'static str,
        value: String,
    },

    #[error("manifest lists {0} more than once")]
    DuplicatePath(String),

    #[error("manifest path escapes the installation root: {0}")]
    UnsafePath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    #[default]
    Patch,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative to the installation root, forward slashes.
    pub path: String,
    pub source_hash: Digest,
    pub target_hash: Digest,
    pub action: FileAction,
}

/// The declarative list of managed files. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    files: Option<Vec<RawEntry>>,
}

#[derive(Deserialize)]
struct RawEntry {
    path: Option<String>,
    source_hash: Option<String>,
    target_hash: Option<String>,
    #[serde(default)]
    action: FileAction,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let parsed: RawManifest = serde_json::from_str(raw)?;
        let entries = parsed.files.ok_or(ManifestError::MissingField {
            index: 0,
            field: "files",
        })?;

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let path = entry
                .path
                .ok_or(ManifestError::MissingField { index, field: "path" })?;
            let path = normalize_rel_path(&path)?;
            let source_hash = required_digest(&path, "source_hash", entry.source_hash, index)?;
            let target_hash = required_digest(&path, "target_hash", entry.target_hash, index)?;

            if !seen.insert(path.clone()) {
                return Err(ManifestError::DuplicatePath(path));
            }
            if source_hash == target_hash {
                warn!(path = %path, "manifest entry has identical source and target hashes");
            }

            files.push(FileEntry {
                path,
                source_hash,
                target_hash,
                action: entry.action,
            });
        }

        Ok(Manifest { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn required_digest(
    path: &str,
    field: &'static str,
    value: Option<String>,
    index: usize,
) -> Result<Digest, ManifestError> {
    let value = value.ok_or(ManifestError::MissingField { index, field })?;
    Digest::parse(&value).ok_or_else(|| ManifestError::InvalidDigest {
        path: path.to_string(),
        field,
        value,
    })
}

fn normalize_rel_path(raw: &str) -> Result<String, ManifestError> {
    let normalized = raw.trim().replace('\\', "/");
    let candidate = Path::new(&normalized);
    let safe = !normalized.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(ManifestError::UnsafePath(raw.to_string()));
    }
    Ok(normalized.trim_start_matches("./").to_string())
}
