use crate::{
    backup::{copy_preserving_mtime, BackupStore},
    cancel::CancelToken,
    config::EngineConfig,
    digest::{self, Digest},
    game,
    manifest::{FileAction, FileEntry, Manifest},
    version,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("delta tool not found: {0}")]
    Missing(PathBuf),

    #[error("delta tool exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("failed to run delta tool: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("installation directory does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("installation directory is read-only: {0}")]
    ReadOnly(PathBuf),
}

/// Something that rebuilds a target file from a source file and a delta.
pub trait DeltaTool: Send + Sync {
    fn apply(&self, source: &Path, delta: &Path, output: &Path) -> Result<(), ToolError>;
}

/// The external `xdelta3` binary.
#[derive(Debug, Clone)]
pub struct Xdelta {
    binary: PathBuf,
}

impl Xdelta {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Tries the explicit path, a copy bundled beside the executable, then `PATH`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ToolError> {
        let mut candidates = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let bundled = if cfg!(windows) {
                "xdelta3.exe"
            } else {
                "xdelta3_linux"
            };
            candidates.push(dir.join("bin").join(bundled));
        }
        candidates.push(PathBuf::from("xdelta3"));

        for candidate in &candidates {
            let probe = Command::new(candidate)
                .arg("-V")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match probe {
                Ok(_) => {
                    debug!(binary = %candidate.display(), "using delta tool");
                    return Ok(Self::new(candidate.clone()));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(ToolError::Io(err)),
            }
        }
        Err(ToolError::Missing(
            explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("xdelta3")),
        ))
    }
}

impl DeltaTool for Xdelta {
    fn apply(&self, source: &Path, delta: &Path, output: &Path) -> Result<(), ToolError> {
        let result = Command::new(&self.binary)
            .arg("-d")
            .arg("-s")
            .arg(source)
            .arg(delta)
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        let output = match result {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ToolError::Missing(self.binary.clone()))
            }
            Err(err) => return Err(ToolError::Io(err)),
        };
        if !output.status.success() {
            return Err(ToolError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    Working,
    AlreadyPatched,
    Success,
    CopySuccess,
    Failed,
    Error,
}

impl PatchStatus {
    pub fn label(self) -> &'static str {
        match self {
            PatchStatus::Working => "Backup & Patching...",
            PatchStatus::AlreadyPatched => "Already Patched",
            PatchStatus::Success => "Success",
            PatchStatus::CopySuccess => "Success (Copy)",
            PatchStatus::Failed => "Failed",
            PatchStatus::Error => "Error",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            PatchStatus::AlreadyPatched | PatchStatus::Success | PatchStatus::CopySuccess
        )
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for PatchStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileProgress {
    pub index: usize,
    pub path: String,
    pub status: PatchStatus,
    pub detail: String,
}

pub type PatchProgressFn = Arc<dyn Fn(&FileProgress) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub outcomes: Vec<FileProgress>,
    /// Set when the batch stopped early; counts then cover processed files only.
    pub cancelled: bool,
}

enum Outcome {
    AlreadyPatched,
    Patched,
    Copied,
    Failed(&'static str),
}

/// Transforms every manifest entry towards its target digest.
///
/// Each file is backed up before it is touched and replaced atomically; one
/// file's failure never stops the batch.
pub fn apply(
    config: &EngineConfig,
    manifest: &Manifest,
    tool: &dyn DeltaTool,
    progress: Option<PatchProgressFn>,
    cancel: &CancelToken,
) -> Result<PatchReport, PatchError> {
    let root = &config.install_root;
    if !root.is_dir() {
        return Err(PatchError::MissingRoot(root.clone()));
    }
    if !game::probe_writable(root) {
        return Err(PatchError::ReadOnly(root.clone()));
    }

    let patcher = Patcher {
        config,
        backups: BackupStore::new(config),
        tool,
    };
    let emit = |event: &FileProgress| {
        if let Some(progress) = &progress {
            progress(event);
        }
    };

    let mut report = PatchReport::default();
    for (index, entry) in manifest.files.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(processed = index, "patch cancelled");
            report.cancelled = true;
            break;
        }

        let working = FileProgress {
            index,
            path: entry.path.clone(),
            status: PatchStatus::Working,
            detail: String::new(),
        };
        let (status, detail) = match patcher.process(entry, || emit(&working)) {
            Ok(Outcome::AlreadyPatched) => (PatchStatus::AlreadyPatched, String::new()),
            Ok(Outcome::Patched) => (PatchStatus::Success, String::new()),
            Ok(Outcome::Copied) => (PatchStatus::CopySuccess, String::new()),
            Ok(Outcome::Failed(reason)) => {
                warn!(path = %entry.path, reason, "patch failed");
                (PatchStatus::Failed, reason.to_string())
            }
            Err(err) => {
                warn!(path = %entry.path, error = %format!("{err:#}"), "patch error");
                (PatchStatus::Error, format!("{err:#}"))
            }
        };

        if status.is_success() {
            report.success_count += 1;
        } else {
            report.fail_count += 1;
        }
        let event = FileProgress {
            index,
            path: entry.path.clone(),
            status,
            detail,
        };
        emit(&event);
        report.outcomes.push(event);
    }

    info!(
        success = report.success_count,
        failed = report.fail_count,
        "patch finished"
    );
    Ok(report)
}

struct Patcher<'a> {
    config: &'a EngineConfig,
    backups: BackupStore,
    tool: &'a dyn DeltaTool,
}

impl Patcher<'_> {
    fn process(&self, entry: &FileEntry, started: impl FnOnce()) -> Result<Outcome> {
        let root = &self.config.install_root;
        let resolved = self.config.resolve_in(root, &entry.path);
        let target = root.join(&resolved);
        let current = digest::digest_file(&target);

        let variant = version::patched_variant(self.config, &entry.path, current.as_ref());
        if current.as_ref() == Some(&entry.target_hash) || variant.is_some() {
            self.fill_missing_alternates(&resolved, &target)?;
            return Ok(Outcome::AlreadyPatched);
        }

        started();
        if target.exists() {
            self.backups
                .save(&resolved)
                .with_context(|| format!("back up {resolved}"))?;
        }

        match entry.action {
            FileAction::Copy => {
                let patches = &self.config.patches_dir;
                let asset = patches.join(self.config.resolve_in(patches, &entry.path));
                if !asset.is_file() {
                    return Ok(Outcome::Failed("Replacement file missing"));
                }
                let temp = temp_path_for(&target);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).context("create target dir")?;
                }
                copy_preserving_mtime(&asset, &temp).context("stage replacement")?;
                if let Some(reason) = self.commit(&temp, &target, &entry.target_hash)? {
                    return Ok(Outcome::Failed(reason));
                }
                self.mirror(&resolved, &target)?;
                Ok(Outcome::Copied)
            }
            FileAction::Patch => {
                let delta = self.config.delta_path(&entry.path);
                if !delta.is_file() {
                    return Ok(Outcome::Failed("Patch file missing"));
                }
                let temp = temp_path_for(&target);
                discard(&temp);
                if let Err(err) = self.tool.apply(&target, &delta, &temp) {
                    warn!(path = %entry.path, error = %err, "delta tool failed");
                    discard(&temp);
                    return Ok(Outcome::Failed("xdelta error"));
                }
                if let Some(reason) = self.commit(&temp, &target, &entry.target_hash)? {
                    return Ok(Outcome::Failed(reason));
                }
                self.mirror(&resolved, &target)?;
                Ok(Outcome::Patched)
            }
        }
    }

    /// Verifies the staged file and renames it over the target.
    fn commit(&self, temp: &Path, target: &Path, expected: &Digest) -> Result<Option<&'static str>> {
        if digest::digest_file(temp).as_ref() != Some(expected) {
            discard(temp);
            return Ok(Some("Hash mismatch"));
        }
        fs::rename(temp, target)
            .with_context(|| format!("replace {}", target.display()))?;
        info!(path = %target.display(), "file replaced");
        Ok(None)
    }

    /// Keeps every other executable name in sync with the patched one.
    fn mirror(&self, resolved: &str, target: &Path) -> Result<()> {
        let root = &self.config.install_root;
        for alternate in self.config.alternates_of(resolved) {
            let alt_path = root.join(&alternate);
            if alt_path.exists() {
                self.backups
                    .save(&alternate)
                    .with_context(|| format!("back up {alternate}"))?;
            }
            let temp = temp_path_for(&alt_path);
            copy_preserving_mtime(target, &temp).context("stage mirror copy")?;
            fs::rename(&temp, &alt_path)
                .with_context(|| format!("mirror to {alternate}"))?;
            debug!(from = resolved, to = %alternate, "mirrored executable");
        }
        Ok(())
    }

    fn fill_missing_alternates(&self, resolved: &str, target: &Path) -> Result<()> {
        let root = &self.config.install_root;
        for alternate in self.config.alternates_of(resolved) {
            let alt_path = root.join(&alternate);
            if alt_path.exists() {
                continue;
            }
            copy_preserving_mtime(target, &alt_path)
                .with_context(|| format!("mirror to {alternate}"))?;
            debug!(from = resolved, to = %alternate, "created missing executable copy");
        }
        Ok(())
    }
}

fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

fn discard(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{entry, write_file, FailingDelta, FakeDelta, Fixture};
    use std::sync::Mutex;

    fn run(fx: &Fixture, manifest: &Manifest, tool: &dyn DeltaTool) -> PatchReport {
        apply(&fx.config, manifest, tool, None, &CancelToken::new()).unwrap()
    }

    #[test]
    fn patches_original_executable_and_mirrors_it() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta_sa.exe", b"AAA");
        write_file(fx.patches(), "gta_sa.exe.xdelta", b"BBB");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);
        let tool = FakeDelta::default();

        let report = run(&fx, &manifest, &tool);
        assert_eq!((report.success_count, report.fail_count), (1, 0));
        assert_eq!(report.outcomes[0].status, PatchStatus::Success);
        assert_eq!(
            digest::digest_file(&fx.root().join("gta_sa.exe")),
            Some(Digest::of_bytes(b"BBB"))
        );
        assert_eq!(fs::read(fx.root().join("gta-sa.exe")).unwrap(), b"BBB");
        assert_eq!(fs::read(fx.root().join("backups/gta_sa.exe")).unwrap(), b"AAA");
        assert!(!fx.root().join("gta_sa.exe.tmp").exists());
        assert_eq!(tool.calls(), 1);
    }

    #[test]
    fn already_patched_tree_is_left_untouched() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta_sa.exe", b"BBB");
        write_file(fx.root(), "gta-sa.exe", b"BBB");
        write_file(fx.patches(), "gta_sa.exe.xdelta", b"BBB");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);
        let tool = FakeDelta::default();
        let before = fx.tree_with_times();

        let report = run(&fx, &manifest, &tool);
        assert_eq!((report.success_count, report.fail_count), (1, 0));
        assert_eq!(report.outcomes[0].status.label(), "Already Patched");
        assert_eq!(tool.calls(), 0);
        assert_eq!(fx.tree_with_times(), before);
        assert!(!fx.root().join("backups").exists());
    }

    #[test]
    fn already_patched_executable_gets_missing_alternate() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta-sa.exe", b"BBB");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);

        let report = run(&fx, &manifest, &FakeDelta::default());
        assert_eq!(report.outcomes[0].status, PatchStatus::AlreadyPatched);
        assert_eq!(fs::read(fx.root().join("gta_sa.exe")).unwrap(), b"BBB");
    }

    #[test]
    fn missing_delta_fails_only_that_file() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old-a");
        write_file(fx.root(), "b.dat", b"old-b");
        write_file(fx.patches(), "b.dat.xdelta", b"new-b");
        let manifest = fx.manifest(vec![
            entry("a.dat", b"old-a", b"new-a"),
            entry("b.dat", b"old-b", b"new-b"),
        ]);

        let report = run(&fx, &manifest, &FakeDelta::default());
        assert_eq!((report.success_count, report.fail_count), (1, 1));
        assert_eq!(report.outcomes[0].status, PatchStatus::Failed);
        assert_eq!(report.outcomes[0].detail, "Patch file missing");
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old-a");
        assert_eq!(fs::read(fx.root().join("b.dat")).unwrap(), b"new-b");
    }

    #[test]
    fn tool_failure_discards_output_and_keeps_original() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"new");
        let manifest = fx.manifest(vec![entry("a.dat", b"old", b"new")]);

        let report = run(&fx, &manifest, &FailingDelta);
        assert_eq!(report.fail_count, 1);
        assert_eq!(report.outcomes[0].detail, "xdelta error");
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old");
        assert!(!fx.root().join("a.dat.tmp").exists());
        assert_eq!(fs::read(fx.root().join("backups/a.dat")).unwrap(), b"old");
    }

    #[test]
    fn wrong_output_is_rejected_before_replacing() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"something else");
        let manifest = fx.manifest(vec![entry("a.dat", b"old", b"new")]);

        let report = run(&fx, &manifest, &FakeDelta::default());
        assert_eq!(report.outcomes[0].detail, "Hash mismatch");
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old");
        assert!(!fx.root().join("a.dat.tmp").exists());
    }

    #[test]
    fn copy_action_replaces_modified_file() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta_sa.exe", b"tampered");
        write_file(fx.root(), "gta-sa.exe", b"tampered twin");
        write_file(fx.patches(), "gta_sa.exe", b"clean");
        let mut copy = entry("gta_sa.exe", b"AAA", b"clean");
        copy.action = FileAction::Copy;
        let manifest = fx.manifest(vec![copy]);
        let tool = FakeDelta::default();

        let report = run(&fx, &manifest, &tool);
        assert_eq!(report.outcomes[0].status.label(), "Success (Copy)");
        assert_eq!(tool.calls(), 0);
        assert_eq!(fs::read(fx.root().join("gta_sa.exe")).unwrap(), b"clean");
        assert_eq!(fs::read(fx.root().join("gta-sa.exe")).unwrap(), b"clean");
        assert_eq!(fs::read(fx.root().join("backups/gta_sa.exe")).unwrap(), b"tampered");
        assert_eq!(
            fs::read(fx.root().join("backups/gta-sa.exe")).unwrap(),
            b"tampered twin"
        );
    }

    #[test]
    fn backup_failure_blocks_the_patch() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"new");
        // A plain file where the backup directory should be.
        write_file(fx.root(), "backups", b"not a directory");
        let manifest = fx.manifest(vec![entry("a.dat", b"old", b"new")]);
        let tool = FakeDelta::default();

        let report = run(&fx, &manifest, &tool);
        assert_eq!(report.outcomes[0].status, PatchStatus::Error);
        assert_eq!(tool.calls(), 0);
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old");
    }

    #[test]
    fn renamed_executable_is_backed_up_under_its_real_name() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta-sa.exe", b"AAA");
        write_file(fx.patches(), "gta_sa.exe.xdelta", b"BBB");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);

        let report = run(&fx, &manifest, &FakeDelta::default());
        assert_eq!(report.success_count, 1);
        assert_eq!(fs::read(fx.root().join("backups/gta-sa.exe")).unwrap(), b"AAA");
        assert_eq!(fs::read(fx.root().join("gta-sa.exe")).unwrap(), b"BBB");
        assert_eq!(fs::read(fx.root().join("gta_sa.exe")).unwrap(), b"BBB");
    }

    #[test]
    fn progress_reports_working_then_result_and_counts_sum() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"new");
        write_file(fx.root(), "b.dat", b"new-b");
        let manifest = fx.manifest(vec![
            entry("a.dat", b"old", b"new"),
            entry("b.dat", b"old-b", b"new-b"),
            entry("c.dat", b"old-c", b"new-c"),
        ]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress: PatchProgressFn = Arc::new(move |event: &FileProgress| {
            sink.lock().unwrap().push((event.index, event.status));
        });

        let report = apply(
            &fx.config,
            &manifest,
            &FakeDelta::default(),
            Some(progress),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.success_count + report.fail_count, manifest.len());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (0, PatchStatus::Working),
                (0, PatchStatus::Success),
                (1, PatchStatus::AlreadyPatched),
                (2, PatchStatus::Working),
                (2, PatchStatus::Failed),
            ]
        );
    }

    #[test]
    fn missing_root_is_rejected_up_front() {
        let fx = Fixture::new();
        let mut config = fx.config.clone();
        config.install_root = fx.root().join("nowhere");
        let err = apply(
            &config,
            &Manifest::default(),
            &FakeDelta::default(),
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::MissingRoot(_)));
    }

    #[test]
    fn cancelled_batch_stops_before_next_file() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"new");
        let manifest = fx.manifest(vec![entry("a.dat", b"old", b"new")]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = apply(&fx.config, &manifest, &FakeDelta::default(), None, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old");
    }

    #[test]
    fn recognised_executable_variant_counts_as_patched() {
        let fx = Fixture::new();
        assert_eq!(fx.config.patched_variants, version::PATCHED_VARIANTS);
        let mut config = fx.config.clone();
        config.patched_variants = vec![version::PatchedVariant {
            digest: "900150983cd24fb0d6963f7d28e17f72",
            label: "LAA",
        }];
        write_file(fx.root(), "gta_sa.exe", b"abc");
        write_file(fx.root(), "gta-sa.exe", b"abc");
        write_file(fx.patches(), "gta_sa.exe.xdelta", b"BBB");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);
        let tool = FakeDelta::default();
        let before = fx.tree_with_times();

        let report = apply(&config, &manifest, &tool, None, &CancelToken::new()).unwrap();
        assert_eq!(report.outcomes[0].status, PatchStatus::AlreadyPatched);
        assert_eq!(report.success_count, 1);
        assert_eq!(tool.calls(), 0);
        assert_eq!(fx.tree_with_times(), before);
        assert!(!fx.root().join("backups").exists());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_installation_is_rejected_before_any_write() {
        use crate::{scan, version::VersionTable};
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"old");
        write_file(fx.patches(), "a.dat.xdelta", b"new");
        let manifest = fx.manifest(vec![entry("a.dat", b"old", b"new")]);
        fs::set_permissions(fx.root(), fs::Permissions::from_mode(0o555)).unwrap();
        if game::probe_writable(fx.root()) {
            // Running as root: directory modes are not enforced.
            fs::set_permissions(fx.root(), fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = apply(
            &fx.config,
            &manifest,
            &FakeDelta::default(),
            None,
            &CancelToken::new(),
        );
        let snapshot = scan::scan(
            &fx.config,
            &manifest,
            &VersionTable::builtin(),
            None,
            &CancelToken::new(),
        );
        fs::set_permissions(fx.root(), fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(result, Err(PatchError::ReadOnly(_))));
        assert!(snapshot.read_only);
        assert_eq!(fs::read(fx.root().join("a.dat")).unwrap(), b"old");
        assert!(!fx.root().join("backups").exists());
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn xdelta_is_invoked_in_decode_mode() {
        let fx = Fixture::new();
        let bin = script(
            fx.patches(),
            "fake-xdelta",
            r#"echo "$@" > "$(dirname "$0")/args.txt"
cp "$4" "$5""#,
        );
        let source = fx.root().join("s");
        let delta = fx.root().join("d");
        let output = fx.root().join("o");
        fs::write(&source, b"src").unwrap();
        fs::write(&delta, b"rebuilt").unwrap();

        Xdelta::new(&bin).apply(&source, &delta, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"rebuilt");
        let args = fs::read_to_string(fx.patches().join("args.txt")).unwrap();
        assert_eq!(
            args.trim_end(),
            format!(
                "-d -s {} {} {}",
                source.display(),
                delta.display(),
                output.display()
            )
        );
    }

    #[cfg(unix)]
    #[test]
    fn xdelta_exit_status_and_absence_are_reported() {
        let fx = Fixture::new();
        let bin = script(fx.patches(), "broken-xdelta", "echo 'bad delta' >&2\nexit 3");
        let (s, d, o) = (fx.root().join("s"), fx.root().join("d"), fx.root().join("o"));

        match Xdelta::new(&bin).apply(&s, &d, &o) {
            Err(ToolError::Failed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bad delta");
            }
            other => panic!("expected a tool failure, got {other:?}"),
        }
        assert!(matches!(
            Xdelta::new(fx.patches().join("absent")).apply(&s, &d, &o),
            Err(ToolError::Missing(_))
        ));
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path_for(Path::new("/g/gta_sa.exe")),
            PathBuf::from("/g/gta_sa.exe.tmp")
        );
    }
}
