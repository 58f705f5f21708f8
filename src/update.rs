use crate::{
    config::{APP_DIR_NAME, DEFAULT_PATCHES_DIR, MANIFEST_FILE},
    download::{self, ReleaseAsset},
};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    env,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

const RELEASES_REPO: &str = "xxanqw/gtasa-open-downgrader";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateKind {
    AppImage,
    WindowsExe,
}

impl UpdateKind {
    fn current() -> Self {
        if cfg!(windows) {
            UpdateKind::WindowsExe
        } else {
            UpdateKind::AppImage
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateInfo {
    pub version: String,
    pub kind: UpdateKind,
    pub asset_name: String,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum UpdateResult {
    UpToDate,
    Available(UpdateInfo),
    Ready {
        info: UpdateInfo,
        path: PathBuf,
        instructions: String,
    },
    Skipped {
        version: String,
        reason: String,
    },
}

/// Looks for a newer release. With `download`, the asset is fetched into the
/// cache and checked against `SHA256SUMS.txt`; the running binary is never
/// replaced.
pub fn check_for_updates(current_version: &str, download: bool) -> Result<UpdateResult> {
    let release = download::github_release(RELEASES_REPO, None)?;
    if release.prerelease {
        return Ok(UpdateResult::UpToDate);
    }

    let latest_version = normalize_version(&release.tag_name);
    if !is_newer_version(&latest_version, current_version) {
        debug!(latest = %latest_version, current = current_version, "no update");
        return Ok(UpdateResult::UpToDate);
    }

    let kind = UpdateKind::current();
    let offline = is_offline_build();
    let Some(asset) = select_asset(&release.assets, kind, offline) else {
        return Ok(UpdateResult::Skipped {
            version: latest_version,
            reason: format!("No {kind:?} asset found"),
        });
    };

    let info = UpdateInfo {
        version: latest_version,
        kind,
        asset_name: asset.name.clone(),
        download_url: asset.browser_download_url.clone(),
    };
    if !download {
        return Ok(UpdateResult::Available(info));
    }

    let checksums = fetch_checksums(&release.assets).unwrap_or_default();
    let update_dir = update_cache_dir()?;
    let asset_path = ensure_asset(&asset, &update_dir)?;
    if let Some(expected) = checksums.get(&asset.name) {
        verify_sha256(&asset_path, expected)?;
    }
    info!(version = %info.version, path = %asset_path.display(), "update downloaded");

    let target = env::var_os("APPIMAGE")
        .map(PathBuf::from)
        .or_else(|| env::current_exe().ok())
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<path-to-binary>".to_string());
    Ok(UpdateResult::Ready {
        instructions: format!(
            "Move update into place: mv '{}' '{}'",
            asset_path.display(),
            target
        ),
        path: asset_path,
        info,
    })
}

fn normalize_version(tag: &str) -> String {
    tag.trim_start_matches('v').to_string()
}

fn is_newer_version(latest: &str, current: &str) -> bool {
    match (parse_version(latest), parse_version(current)) {
        (Some(latest), Some(current)) => latest > current,
        _ => false,
    }
}

fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let raw = raw
        .trim_start_matches('v')
        .split('-')
        .next()?
        .split('+')
        .next()?;
    let mut parts = raw.split('.').map(|part| part.parse::<u64>().ok());
    let major = parts.next().flatten()?;
    let minor = parts.next().flatten()?;
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}

/// Builds that ship their own patch bundle beside the binary.
fn is_offline_build() -> bool {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .is_some_and(|dir| dir.join(DEFAULT_PATCHES_DIR).join(MANIFEST_FILE).exists())
}

/// Offline builds want the offline AppImage or the Windows installer, online
/// builds want the other one. Any asset of the right type is the fallback.
fn select_asset(assets: &[ReleaseAsset], kind: UpdateKind, offline: bool) -> Option<ReleaseAsset> {
    let (fits, marker) = match kind {
        UpdateKind::AppImage => (
            (|name: &str| name.to_lowercase().ends_with(".appimage")) as fn(&str) -> bool,
            "offline",
        ),
        UpdateKind::WindowsExe => (
            (|name: &str| name.ends_with(".exe")) as fn(&str) -> bool,
            "installer",
        ),
    };
    assets
        .iter()
        .filter(|asset| fits(&asset.name))
        .find(|asset| asset.name.to_lowercase().contains(marker) == offline)
        .or_else(|| assets.iter().find(|asset| fits(&asset.name)))
        .cloned()
}

fn update_cache_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve cache dir")?;
    let dir = base.cache_dir().join(APP_DIR_NAME).join("updates");
    fs::create_dir_all(&dir).context("create update cache dir")?;
    Ok(dir)
}

fn ensure_asset(asset: &ReleaseAsset, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(&asset.name);
    if path.exists() {
        match asset.size {
            Some(expected) if fs::metadata(&path).map(|m| m.len()).ok() == Some(expected) => {
                return Ok(path)
            }
            None => return Ok(path),
            Some(_) => {}
        }
    }

    let response = download::agent(Duration::from_secs(60))
        .get(&asset.browser_download_url)
        .set("User-Agent", download::USER_AGENT)
        .call()
        .context("download asset")?;
    let mut reader = response.into_reader();
    let mut file = File::create(&path).context("create asset file")?;
    io::copy(&mut reader, &mut file).context("write asset file")?;
    Ok(path)
}

fn fetch_checksums(assets: &[ReleaseAsset]) -> Result<HashMap<String, String>> {
    let checksum_asset = assets
        .iter()
        .find(|asset| asset.name == "SHA256SUMS.txt")
        .context("missing SHA256SUMS")?;
    let response = download::agent(Duration::from_secs(10))
        .get(&checksum_asset.browser_download_url)
        .set("User-Agent", download::USER_AGENT)
        .call()
        .context("download SHA256SUMS")?;
    let body = response.into_string().context("read SHA256SUMS")?;
    Ok(parse_checksums(&body))
}

fn parse_checksums(body: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in body.lines() {
        let mut parts = line.split_whitespace();
        let (Some(hash), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        map.insert(name.trim_start_matches('*').to_string(), hash.to_lowercase());
    }
    map
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path).context("open asset for checksum")?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        return Err(anyhow::anyhow!("Checksum mismatch for {}", path.display()));
    }
    Ok(())
}
