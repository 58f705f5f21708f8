use crate::{
    addons::AssetSource,
    archive::{self, Layout, Selection},
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::{
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

pub const USER_AGENT: &str = concat!("sa-downgrader/", env!("CARGO_PKG_VERSION"));

/// Public share of the official patch bundle.
pub const PATCH_BUNDLE_URL: &str =
    "https://www.icloud.com/iclouddrive/0afGK6zDBog_0drwp6YZoDLIg#Patches";

const ICLOUD_RESOLVE_URL: &str =
    "https://ckdatabasews.icloud.com/database/1/com.apple.cloudkit/production/public/records/resolve";

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: Option<u64>,
}

/// `(bytes received, total bytes if known)`
pub type DownloadProgressFn<'a> = &'a dyn Fn(u64, Option<u64>);

pub fn agent(read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(read_timeout)
        .timeout_write(Duration::from_secs(10))
        .build()
}

pub fn github_release(repo: &str, tag: Option<&str>) -> Result<Release> {
    let url = match tag {
        Some(tag) => format!("https://api.github.com/repos/{repo}/releases/tags/{tag}"),
        None => format!("https://api.github.com/repos/{repo}/releases/latest"),
    };
    let response = agent(Duration::from_secs(15))
        .get(&url)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("fetch release metadata for {repo}"))?;
    response.into_json().context("decode release")
}

pub fn fetch_bytes(url: &str, progress: Option<DownloadProgressFn<'_>>) -> Result<Vec<u8>> {
    let response = agent(Duration::from_secs(60))
        .get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("download {url}"))?;
    let total = response
        .header("Content-Length")
        .and_then(|value| value.parse::<u64>().ok());

    let mut reader = response.into_reader();
    let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(64 << 20) as usize);
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).context("read download")?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&buffer[..read]);
        if let Some(progress) = progress {
            progress(bytes.len() as u64, total);
        }
    }
    debug!(url, bytes = bytes.len(), "downloaded");
    Ok(bytes)
}

/// Live network source backed by `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSource;

impl AssetSource for HttpSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        fetch_bytes(url, None)
    }

    fn release(&self, repo: &str, tag: Option<&str>) -> Result<Release> {
        github_release(repo, tag)
    }
}

/// Short GUID of an iCloud Drive share link.
pub fn icloud_share_id(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("/iclouddrive/")?;
    let id = rest.split(['#', '?']).next()?;
    (!id.is_empty()).then_some(id)
}

#[derive(Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    results: Vec<ResolveResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResult {
    root_record: Option<RootRecord>,
}

#[derive(Deserialize)]
struct RootRecord {
    fields: Option<RecordFields>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordFields {
    file_content: Option<FileContent>,
}

#[derive(Deserialize)]
struct FileContent {
    value: Option<FileContentValue>,
}

#[derive(Deserialize)]
struct FileContentValue {
    #[serde(rename = "downloadURL")]
    download_url: Option<String>,
}

fn download_url_from(response: ResolveResponse) -> Option<String> {
    response
        .results
        .into_iter()
        .next()?
        .root_record?
        .fields?
        .file_content?
        .value?
        .download_url
}

/// Turns an iCloud Drive share link into a direct download URL.
pub fn resolve_icloud_download(share_url: &str) -> Result<String> {
    let Some(id) = icloud_share_id(share_url) else {
        bail!("not an iCloud Drive share link: {share_url}");
    };
    let response = agent(Duration::from_secs(30))
        .post(ICLOUD_RESOLVE_URL)
        .set("User-Agent", USER_AGENT)
        .send_json(json!({ "shortGUIDs": [{ "value": id }] }))
        .context("resolve iCloud share")?;
    let parsed: ResolveResponse = response.into_json().context("decode iCloud response")?;
    download_url_from(parsed).context("iCloud share has no downloadable file")
}

/// Downloads the patch bundle and unpacks it into `dest`.
pub fn fetch_patch_bundle(
    share_url: &str,
    dest: &Path,
    progress: Option<DownloadProgressFn<'_>>,
) -> Result<Vec<PathBuf>> {
    let url = resolve_icloud_download(share_url)?;
    let bytes = fetch_bytes(&url, progress)?;
    let written = archive::extract_zip_bytes(&bytes, dest, Selection::All, Layout::Preserve)
        .context("extract patch bundle")?;
    info!(dest = %dest.display(), files = written.len(), "patch bundle extracted");
    Ok(written)
}
