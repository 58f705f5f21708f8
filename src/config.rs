use crate::{
    game::EXE_VARIANTS,
    version::{PatchedVariant, PATCHED_VARIANTS},
};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

pub const APP_DIR_NAME: &str = "sa-downgrader";
pub const DEFAULT_PATCHES_DIR: &str = "Patches";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ADDON_STATE_FILE: &str = ".downgrader";

/// Everything an engine needs to know about one installation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub install_root: PathBuf,
    pub patches_dir: PathBuf,
    pub backup_dir_name: String,
    pub exe_variants: Vec<String>,
    pub addon_dir_name: String,
    pub delta_extension: String,
    /// Digest to label pairs layered over the built-in version table.
    pub extra_versions: BTreeMap<String, String>,
    /// Executable digests that count as already patched.
    pub patched_variants: Vec<PatchedVariant>,
}

impl EngineConfig {
    pub fn new(install_root: impl Into<PathBuf>, patches_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            patches_dir: patches_dir.into(),
            backup_dir_name: "backups".to_string(),
            exe_variants: EXE_VARIANTS.iter().map(|name| name.to_string()).collect(),
            addon_dir_name: "modloader".to_string(),
            delta_extension: "xdelta".to_string(),
            extra_versions: BTreeMap::new(),
            patched_variants: PATCHED_VARIANTS.to_vec(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.patches_dir.join(MANIFEST_FILE)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.install_root.join(&self.backup_dir_name)
    }

    pub fn addon_dir(&self) -> PathBuf {
        self.install_root.join(&self.addon_dir_name)
    }

    pub fn addon_state_path(&self) -> PathBuf {
        self.addon_dir().join(ADDON_STATE_FILE)
    }

    pub fn delta_path(&self, rel_path: &str) -> PathBuf {
        self.patches_dir
            .join(format!("{rel_path}.{}", self.delta_extension))
    }

    /// Executable names compare case-insensitively.
    pub fn is_executable(&self, rel_path: &str) -> bool {
        self.exe_variants
            .iter()
            .any(|name| name.eq_ignore_ascii_case(rel_path))
    }

    /// Relative path of the file that actually represents `rel_path` under
    /// `root`: the path itself when it exists, otherwise the first existing
    /// executable variant, otherwise the path unchanged.
    pub fn resolve_in(&self, root: &Path, rel_path: &str) -> String {
        if root.join(rel_path).exists() || !self.is_executable(rel_path) {
            return rel_path.to_string();
        }
        self.exe_variants
            .iter()
            .find(|name| root.join(name.as_str()).exists())
            .cloned()
            .unwrap_or_else(|| rel_path.to_string())
    }

    /// Variant names other than `rel_path` that must mirror it.
    pub fn alternates_of(&self, rel_path: &str) -> Vec<String> {
        if !self.is_executable(rel_path) {
            return Vec::new();
        }
        self.exe_variants
            .iter()
            .filter(|name| !name.eq_ignore_ascii_case(rel_path))
            .cloned()
            .collect()
    }

    /// Every executable variant that exists under the installation root.
    pub fn existing_executables(&self) -> Vec<(String, PathBuf)> {
        self.exe_variants
            .iter()
            .map(|name| (name.clone(), self.install_root.join(name)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }
}

/// Persisted user preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub game_root: Option<PathBuf>,
    #[serde(default)]
    pub patches_dir: Option<PathBuf>,
    #[serde(default)]
    pub xdelta_path: Option<PathBuf>,
    #[serde(default)]
    pub extra_versions: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&config_path()?)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_at(path)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_at(&config_path()?)
    }

    pub fn save_at(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create app data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Explicit value, then the bundled directory next to the binary, then `./Patches`.
    pub fn resolve_patches_dir(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit.or(self.patches_dir.as_deref()) {
            return path.to_path_buf();
        }
        let local = PathBuf::from(DEFAULT_PATCHES_DIR);
        if local.join(MANIFEST_FILE).exists() {
            return local;
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_PATCHES_DIR)))
            .filter(|bundled| bundled.join(MANIFEST_FILE).exists())
            .unwrap_or(local)
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join(APP_DIR_NAME))
}

fn config_path() -> Result<PathBuf> {
    Ok(base_data_dir()?.join("config.json"))
}
