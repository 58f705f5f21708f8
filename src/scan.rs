use crate::{
    addons::AddonState,
    cancel::CancelToken,
    config::EngineConfig,
    digest::{self, Digest},
    game,
    manifest::{FileEntry, Manifest},
    version::{self, VersionLabel, VersionTable},
};
use serde::{Serialize, Serializer};
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::{debug, info};

/// `(files done, total files)`, sent after every file.
pub type ScanProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Original,
    AlreadyPatched { variant: Option<&'static str> },
    Modified,
    Missing,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Original => f.write_str("Original"),
            FileStatus::AlreadyPatched { variant: None } => f.write_str("Already Downgraded"),
            FileStatus::AlreadyPatched {
                variant: Some(label),
            } => write!(f, "Already Downgraded ({label})"),
            FileStatus::Modified => f.write_str("Modified"),
            FileStatus::Missing => f.write_str("Missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeedsPatch {
    Yes,
    No,
    ForceYes,
    NotApplicable,
}

impl fmt::Display for NeedsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NeedsPatch::Yes => "Yes",
            NeedsPatch::No => "No",
            NeedsPatch::ForceYes => "Yes (Force)",
            NeedsPatch::NotApplicable => "N/A",
        })
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub path: String,
    /// Variant actually probed; differs from `path` for a renamed executable.
    pub resolved_path: String,
    pub current_hash: Option<Digest>,
    pub target_hash: Digest,
    #[serde(serialize_with = "serialize_display")]
    pub status: FileStatus,
    #[serde(serialize_with = "serialize_display")]
    pub needs_patch: NeedsPatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationSnapshot {
    pub results: Vec<ScanResult>,
    pub detected_version: VersionLabel,
    pub read_only: bool,
    pub installed_addons: BTreeSet<String>,
    pub has_backups: bool,
    /// True when the scan stopped early; `results` is then a prefix.
    pub cancelled: bool,
}

impl InstallationSnapshot {
    pub fn count(&self, status: fn(&FileStatus) -> bool) -> usize {
        self.results.iter().filter(|r| status(&r.status)).count()
    }

    pub fn needs_work(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.needs_patch, NeedsPatch::Yes | NeedsPatch::ForceYes))
    }
}

/// Classifies one file against its manifest entry.
pub fn classify(
    config: &EngineConfig,
    entry: &FileEntry,
    current: Option<&Digest>,
) -> (FileStatus, NeedsPatch) {
    let variant = version::patched_variant(config, &entry.path, current);
    match current {
        Some(hash) if *hash == entry.target_hash || variant.is_some() => (
            FileStatus::AlreadyPatched {
                variant: variant.map(|v| v.label),
            },
            NeedsPatch::No,
        ),
        Some(hash) if *hash == entry.source_hash => (FileStatus::Original, NeedsPatch::Yes),
        None => (FileStatus::Missing, NeedsPatch::NotApplicable),
        Some(_) => (FileStatus::Modified, NeedsPatch::ForceYes),
    }
}

/// Reads the installation and reports the state of every manifest entry.
///
/// Touches the filesystem only for the transient writability probe.
pub fn scan(
    config: &EngineConfig,
    manifest: &Manifest,
    table: &VersionTable,
    progress: Option<ScanProgressFn>,
    cancel: &CancelToken,
) -> InstallationSnapshot {
    let root = &config.install_root;
    let read_only = !game::probe_writable(root);
    let detected_version = table.classify_installation(config);
    debug!(version = %detected_version, read_only, "probed installation");

    let total = manifest.len();
    let mut results = Vec::with_capacity(total);
    let mut cancelled = false;
    for (index, entry) in manifest.files.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let resolved_path = config.resolve_in(root, &entry.path);
        let current_hash = digest::digest_file(&root.join(&resolved_path));
        let (status, needs_patch) = classify(config, entry, current_hash.as_ref());
        debug!(path = %entry.path, %status, "scanned");

        results.push(ScanResult {
            path: entry.path.clone(),
            resolved_path,
            current_hash,
            target_hash: entry.target_hash.clone(),
            status,
            needs_patch,
        });
        if let Some(progress) = &progress {
            progress(index + 1, total);
        }
    }

    let installed_addons = AddonState::load(&config.addon_state_path())
        .map(|state| state.installed_mods)
        .unwrap_or_default();

    info!(
        files = results.len(),
        version = %detected_version,
        read_only,
        "scan finished"
    );

    InstallationSnapshot {
        results,
        detected_version,
        read_only,
        installed_addons,
        has_backups: config.backup_root().is_dir(),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{entry, write_file, Fixture};
    use std::sync::Mutex;

    #[test]
    fn classifies_every_state() {
        let fx = Fixture::new();
        write_file(fx.root(), "original.dat", b"source");
        write_file(fx.root(), "patched.dat", b"target");
        write_file(fx.root(), "modified.dat", b"tampered");
        let manifest = fx.manifest(vec![
            entry("original.dat", b"source", b"target"),
            entry("patched.dat", b"source", b"target"),
            entry("modified.dat", b"source", b"target"),
            entry("missing.dat", b"source", b"target"),
        ]);

        let snapshot = scan(
            &fx.config,
            &manifest,
            &VersionTable::builtin(),
            None,
            &CancelToken::new(),
        );
        let statuses: Vec<(FileStatus, NeedsPatch)> = snapshot
            .results
            .iter()
            .map(|r| (r.status, r.needs_patch))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (FileStatus::Original, NeedsPatch::Yes),
                (FileStatus::AlreadyPatched { variant: None }, NeedsPatch::No),
                (FileStatus::Modified, NeedsPatch::ForceYes),
                (FileStatus::Missing, NeedsPatch::NotApplicable),
            ]
        );
        assert!(snapshot.results[3].current_hash.is_none());
        assert!(!snapshot.read_only);
        assert_eq!(snapshot.detected_version, VersionLabel::NotFound);
        assert!(snapshot.needs_work());
    }

    #[test]
    fn executable_scenario_reports_original_then_downgraded() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta_sa.exe", b"AAA");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);
        let table = VersionTable::builtin();

        let snapshot = scan(&fx.config, &manifest, &table, None, &CancelToken::new());
        assert_eq!(snapshot.results[0].status.to_string(), "Original");
        assert_eq!(snapshot.results[0].needs_patch.to_string(), "Yes");
        assert!(matches!(snapshot.detected_version, VersionLabel::Unrecognized(_)));

        write_file(fx.root(), "gta_sa.exe", b"BBB");
        let snapshot = scan(&fx.config, &manifest, &table, None, &CancelToken::new());
        assert_eq!(snapshot.results[0].status.to_string(), "Already Downgraded");
        assert_eq!(snapshot.results[0].needs_patch.to_string(), "No");
    }

    #[test]
    fn renamed_executable_is_found_through_variant() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta-sa.exe", b"AAA");
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);

        let snapshot = scan(
            &fx.config,
            &manifest,
            &VersionTable::builtin(),
            None,
            &CancelToken::new(),
        );
        assert_eq!(snapshot.results[0].resolved_path, "gta-sa.exe");
        assert_eq!(snapshot.results[0].status, FileStatus::Original);
    }

    #[test]
    fn laa_variant_counts_as_downgraded_for_executable_only() {
        let fx = Fixture::new();
        let manifest = fx.manifest(vec![entry("gta_sa.exe", b"AAA", b"BBB")]);
        let laa = Digest::parse("2b5066bd4097ac2944ce6a9cf8fe5677").unwrap();

        let (status, needs) = classify(&fx.config, &manifest.files[0], Some(&laa));
        assert_eq!(status.to_string(), "Already Downgraded (LAA)");
        assert_eq!(needs, NeedsPatch::No);

        let data_entry = entry("data/gta.dat", b"AAA", b"BBB");
        let (status, _) = classify(&fx.config, &data_entry, Some(&laa));
        assert_eq!(status, FileStatus::Modified);
    }

    #[test]
    fn progress_ticks_once_per_file_and_scan_does_not_write() {
        let fx = Fixture::new();
        write_file(fx.root(), "a.dat", b"source");
        let manifest = fx.manifest(vec![
            entry("a.dat", b"source", b"target"),
            entry("b.dat", b"source", b"target"),
        ]);
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let progress: ScanProgressFn = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

        let before = fx.tree();
        scan(
            &fx.config,
            &manifest,
            &VersionTable::builtin(),
            Some(progress),
            &CancelToken::new(),
        );
        assert_eq!(*ticks.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(fx.tree(), before);
    }

    #[test]
    fn reports_installed_addons_and_cancellation() {
        let fx = Fixture::new();
        write_file(
            fx.root(),
            "modloader/.downgrader",
            br#"{"installed_mods": ["ASI Loader"], "version": "0.1.1"}"#,
        );
        let manifest = fx.manifest(vec![entry("a.dat", b"s", b"t")]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let snapshot = scan(&fx.config, &manifest, &VersionTable::builtin(), None, &cancel);
        assert!(snapshot.cancelled);
        assert!(snapshot.results.is_empty());
        assert!(snapshot.installed_addons.contains("ASI Loader"));
    }
}
