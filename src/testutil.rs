use crate::{
    addons::AssetSource,
    config::EngineConfig,
    digest::Digest,
    download::{Release, ReleaseAsset},
    manifest::{FileAction, FileEntry, Manifest},
    patch::{DeltaTool, ToolError},
};
use anyhow::anyhow;
use filetime::FileTime;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{Cursor, Write},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Scratch installation at `<tmp>/game` with patch assets in `<tmp>/Patches`.
pub struct Fixture {
    _dir: TempDir,
    pub config: EngineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("game");
        let patches = dir.path().join("Patches");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&patches).unwrap();
        Self {
            config: EngineConfig::new(root, patches),
            _dir: dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.install_root
    }

    pub fn patches(&self) -> &Path {
        &self.config.patches_dir
    }

    pub fn manifest(&self, files: Vec<FileEntry>) -> Manifest {
        Manifest { files }
    }

    /// Every file under the installation root with its content.
    pub fn tree(&self) -> BTreeMap<String, Vec<u8>> {
        self.walk()
            .into_iter()
            .map(|(rel, path)| (rel, fs::read(path).unwrap()))
            .collect()
    }

    /// Like [`Fixture::tree`] but also records modification times.
    pub fn tree_with_times(&self) -> BTreeMap<String, (Vec<u8>, FileTime)> {
        self.walk()
            .into_iter()
            .map(|(rel, path)| {
                let meta = fs::metadata(&path).unwrap();
                (
                    rel,
                    (
                        fs::read(&path).unwrap(),
                        FileTime::from_last_modification_time(&meta),
                    ),
                )
            })
            .collect()
    }

    fn walk(&self) -> Vec<(String, std::path::PathBuf)> {
        WalkDir::new(self.root())
            .min_depth(1)
            .into_iter()
            .map(Result::unwrap)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let rel = entry
                    .path()
                    .strip_prefix(self.root())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, entry.path().to_path_buf())
            })
            .collect()
    }
}

pub fn entry(path: &str, source: &[u8], target: &[u8]) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        source_hash: Digest::of_bytes(source),
        target_hash: Digest::of_bytes(target),
        action: FileAction::Patch,
    }
}

pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Treats the delta file's content as the patched output.
#[derive(Default)]
pub struct FakeDelta {
    calls: AtomicUsize,
}

impl FakeDelta {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeltaTool for FakeDelta {
    fn apply(&self, source: &Path, delta: &Path, output: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::metadata(source)?;
        fs::copy(delta, output)?;
        Ok(())
    }
}

/// Always exits non-zero after leaving partial output behind.
pub struct FailingDelta;

impl DeltaTool for FailingDelta {
    fn apply(&self, _source: &Path, _delta: &Path, output: &Path) -> Result<(), ToolError> {
        fs::write(output, b"partial")?;
        Err(ToolError::Failed {
            code: Some(1),
            stderr: "xdelta3: target window checksum mismatch".to_string(),
        })
    }
}

/// In-memory URLs and releases. Records every fetched URL.
#[derive(Default)]
pub struct FakeSource {
    files: HashMap<String, Vec<u8>>,
    releases: HashMap<String, Release>,
    requests: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn serve(&mut self, url: &str, bytes: Vec<u8>) {
        self.files.insert(url.to_string(), bytes);
    }

    pub fn publish_release(&mut self, repo: &str, tag: Option<&str>, assets: &[(&str, &str)]) {
        let release = Release {
            tag_name: tag.unwrap_or("latest").to_string(),
            prerelease: false,
            assets: assets
                .iter()
                .map(|(name, url)| ReleaseAsset {
                    name: name.to_string(),
                    browser_download_url: url.to_string(),
                    size: None,
                })
                .collect(),
        };
        self.releases.insert(release_key(repo, tag), release);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn release_key(repo: &str, tag: Option<&str>) -> String {
    format!("{repo}@{}", tag.unwrap_or("latest"))
}

impl AssetSource for FakeSource {
    fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: {url}"))
    }

    fn release(&self, repo: &str, tag: Option<&str>) -> anyhow::Result<Release> {
        self.releases
            .get(&release_key(repo, tag))
            .cloned()
            .ok_or_else(|| anyhow!("no release for {repo}"))
    }
}
