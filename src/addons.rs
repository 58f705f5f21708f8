use crate::{
    archive,
    cancel::CancelToken,
    config::EngineConfig,
    download::Release,
    recipes::{self, Destination, Recipe, Source, INFRASTRUCTURE},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const STATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum AddonError {
    #[error("unknown add-on: {0}")]
    UnknownAddon(String),

    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("no matching asset for {addon} in {repo}")]
    AssetNotFound { addon: String, repo: String },

    #[error("failed to extract {addon}: {message}")]
    Archive { addon: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where add-on archives and release metadata come from.
pub trait AssetSource: Send + Sync {
    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    /// Latest release of `repo`, or the release tagged `tag`.
    fn release(&self, repo: &str, tag: Option<&str>) -> anyhow::Result<Release>;
}

/// Persisted record of applied add-ons, kept inside the add-on directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonState {
    #[serde(default)]
    pub installed_mods: BTreeSet<String>,
    #[serde(default = "default_state_version")]
    pub version: String,
}

fn default_state_version() -> String {
    STATE_VERSION.to_string()
}

impl Default for AddonState {
    fn default() -> Self {
        Self {
            installed_mods: BTreeSet::new(),
            version: default_state_version(),
        }
    }
}

impl AddonState {
    /// `None` when the file is absent or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable add-on state");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path.parent().context("add-on state parent")?;
        fs::create_dir_all(parent).context("create add-on dir")?;
        let raw = serde_json::to_string(self).context("serialize add-on state")?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw).context("write add-on state")?;
        fs::rename(&tmp, path).context("replace add-on state")?;
        Ok(())
    }
}

/// `(position, total, add-on name)`, sent before each add-on, skipped ones included.
pub type AddonProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddonReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

/// Infrastructure add-ons first in their fixed order, then the rest as
/// requested. Duplicates are dropped.
pub fn install_order(requested: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = INFRASTRUCTURE
        .iter()
        .filter(|name| requested.iter().any(|r| r == *name))
        .map(|name| name.to_string())
        .collect();
    for name in requested {
        if !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    ordered
}

/// Adds whatever the requested add-ons need to load.
pub fn with_required_infrastructure(requested: &[String]) -> Vec<String> {
    let mut names = requested.to_vec();
    for name in requested {
        let Some(recipe) = recipes::recipe_for(name) else {
            continue;
        };
        for dependency in recipe.requires() {
            if !names.iter().any(|n| n == dependency) {
                names.push(dependency.to_string());
            }
        }
    }
    names
}

/// Installs the requested add-ons. Stops at the first failure; whatever was
/// applied before it is still recorded.
pub fn install_addons(
    config: &EngineConfig,
    requested: &[String],
    source: &dyn AssetSource,
    progress: Option<AddonProgressFn>,
    cancel: &CancelToken,
) -> Result<AddonReport, AddonError> {
    let ordered = install_order(requested);
    if ordered.is_empty() {
        return Ok(AddonReport::default());
    }
    let recipes = ordered
        .iter()
        .map(|name| recipes::recipe_for(name).ok_or_else(|| AddonError::UnknownAddon(name.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let state_path = config.addon_state_path();
    let mut state = AddonState::load(&state_path).unwrap_or_default();
    let mut report = AddonReport::default();
    let total = recipes.len();

    let mut outcome = Ok(());
    for (index, recipe) in recipes.into_iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if let Some(progress) = &progress {
            progress(index + 1, total, recipe.name);
        }
        if state.installed_mods.contains(recipe.name) {
            debug!(addon = recipe.name, "already installed");
            report.skipped.push(recipe.name.to_string());
            continue;
        }
        if let Err(err) = apply_recipe(config, recipe, source) {
            warn!(addon = recipe.name, error = %err, "add-on install failed");
            outcome = Err(err);
            break;
        }
        info!(addon = recipe.name, "add-on installed");
        report.applied.push(recipe.name.to_string());
    }

    if !report.applied.is_empty() {
        state
            .installed_mods
            .extend(report.applied.iter().cloned());
        state.version = STATE_VERSION.to_string();
        if let Err(err) = state.save(&state_path) {
            warn!(path = %state_path.display(), error = %format!("{err:#}"), "failed to record add-ons");
        }
    }

    outcome.map(|()| report)
}

fn apply_recipe(
    config: &EngineConfig,
    recipe: &Recipe,
    source: &dyn AssetSource,
) -> Result<(), AddonError> {
    for step in recipe.steps {
        let url = resolve_url(recipe, &step.source, source)?;
        let bytes = source.fetch(&url).map_err(|err| AddonError::Fetch {
            url: url.clone(),
            message: format!("{err:#}"),
        })?;
        let dest = destination_dir(config, step.destination);
        archive::extract_zip_bytes(&bytes, &dest, step.selection, step.layout).map_err(|err| {
            AddonError::Archive {
                addon: recipe.name.to_string(),
                message: format!("{err:#}"),
            }
        })?;
    }
    Ok(())
}

fn resolve_url(
    recipe: &Recipe,
    step_source: &Source,
    source: &dyn AssetSource,
) -> Result<String, AddonError> {
    let (repo, tag, pick) = match *step_source {
        Source::Url(url) => return Ok(url.to_string()),
        Source::LatestRelease { repo, pick } => (repo, None, pick),
        Source::TaggedRelease { repo, tag, pick } => (repo, Some(tag), pick),
    };
    let release = source.release(repo, tag).map_err(|err| AddonError::Fetch {
        url: format!("github:{repo}"),
        message: format!("{err:#}"),
    })?;
    let names: Vec<&str> = release.assets.iter().map(|a| a.name.as_str()).collect();
    let chosen = pick.pick(&names).ok_or_else(|| AddonError::AssetNotFound {
        addon: recipe.name.to_string(),
        repo: repo.to_string(),
    })?;
    release
        .assets
        .iter()
        .find(|asset| asset.name == chosen)
        .map(|asset| asset.browser_download_url.clone())
        .ok_or_else(|| AddonError::AssetNotFound {
            addon: recipe.name.to_string(),
            repo: repo.to_string(),
        })
}

fn destination_dir(config: &EngineConfig, destination: Destination) -> PathBuf {
    match destination {
        Destination::InstallRoot => config.install_root.clone(),
        Destination::AddonDir(name) => config.addon_dir().join(name),
    }
}
