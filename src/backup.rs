use crate::config::EngineConfig;
use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Mirrored tree of pre-mutation copies under `<install_root>/backups`.
///
/// Only grows until [`BackupStore::clear`] is called; revert reads from it
/// and never removes anything.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    install_root: PathBuf,
}

impl BackupStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            root: config.backup_root(),
            install_root: config.install_root.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn backup_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.backup_path(rel_path).is_file()
    }

    /// Copies the installed file into the store, replacing any earlier copy.
    pub fn save(&self, rel_path: &str) -> io::Result<PathBuf> {
        let source = self.install_root.join(rel_path);
        let dest = self.backup_path(rel_path);
        copy_preserving_mtime(&source, &dest)?;
        debug!(path = rel_path, "backed up");
        Ok(dest)
    }

    /// Backs the file up only when no earlier backup exists, so an original
    /// copy is never replaced by an already-modified one.
    pub fn save_if_absent(&self, rel_path: &str) -> io::Result<bool> {
        if self.contains(rel_path) {
            return Ok(false);
        }
        self.save(rel_path)?;
        Ok(true)
    }

    /// Relative paths of every backed-up file, sorted.
    pub fn entries(&self) -> io::Result<Vec<String>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            entries.push(rel.to_string_lossy().replace('\\', "/"));
        }
        entries.sort();
        Ok(entries)
    }

    /// Deletes the whole store. Returns whether there was anything to delete.
    pub fn clear(&self) -> io::Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.root)?;
        info!(root = %self.root.display(), "backups cleared");
        Ok(true)
    }
}

/// `fs::copy` plus the source modification time, creating parent directories.
pub fn copy_preserving_mtime(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    preserve_mtime(source, dest);
    Ok(())
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = set_file_mtime(dest, mtime);
}
