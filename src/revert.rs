use crate::{
    backup::{copy_preserving_mtime, BackupStore},
    cancel::CancelToken,
    config::EngineConfig,
    game,
};
use serde::Serialize;
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RevertError {
    #[error("no backups found at {0}")]
    NoBackups(PathBuf),

    #[error("installation directory is read-only: {0}")]
    ReadOnly(PathBuf),

    #[error("failed to restore {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// `(files restored, total files)`
pub type RevertProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertReport {
    pub restored: Vec<String>,
    pub cancelled: bool,
}

/// Copies every file in the backup store back over the installation.
///
/// The store itself is left in place, so reverting twice is harmless.
pub fn revert(
    config: &EngineConfig,
    progress: Option<RevertProgressFn>,
    cancel: &CancelToken,
) -> Result<RevertReport, RevertError> {
    let store = BackupStore::new(config);
    if !store.exists() {
        return Err(RevertError::NoBackups(store.root().to_path_buf()));
    }
    if !game::probe_writable(store.install_root()) {
        return Err(RevertError::ReadOnly(store.install_root().to_path_buf()));
    }

    let entries = store.entries().map_err(|source| RevertError::Io {
        path: store.root().display().to_string(),
        source,
    })?;
    let total = entries.len();
    let mut report = RevertReport::default();
    for rel in entries {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let dest = store.install_root().join(&rel);
        copy_preserving_mtime(&store.backup_path(&rel), &dest).map_err(|source| {
            RevertError::Io {
                path: rel.clone(),
                source,
            }
        })?;
        debug!(path = %rel, "restored");
        report.restored.push(rel);
        if let Some(progress) = &progress {
            progress(report.restored.len(), total);
        }
    }

    info!(files = report.restored.len(), "revert finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        patch,
        scan::{self, FileStatus},
        testutil::{entry, write_file, FakeDelta, Fixture},
        version::VersionTable,
    };
    use std::fs;

    #[test]
    fn missing_store_is_an_explicit_error() {
        let fx = Fixture::new();
        let err = revert(&fx.config, None, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, RevertError::NoBackups(_)));
    }

    #[test]
    fn restores_every_backed_up_file_including_unmanaged_ones() {
        let fx = Fixture::new();
        write_file(fx.root(), "backups/gta_sa.exe", b"original exe");
        write_file(fx.root(), "backups/audio/CONFIG/TrakLkup.dat", b"tracks");
        write_file(fx.root(), "gta_sa.exe", b"patched exe");

        let report = revert(&fx.config, None, &CancelToken::new()).unwrap();
        assert_eq!(report.restored, vec!["audio/CONFIG/TrakLkup.dat", "gta_sa.exe"]);
        assert_eq!(fs::read(fx.root().join("gta_sa.exe")).unwrap(), b"original exe");
        assert_eq!(
            fs::read(fx.root().join("audio/CONFIG/TrakLkup.dat")).unwrap(),
            b"tracks"
        );
        // Store survives and a second run is identical.
        assert!(fx.root().join("backups/gta_sa.exe").is_file());
        let again = revert(&fx.config, None, &CancelToken::new()).unwrap();
        assert_eq!(again.restored, report.restored);
    }

    #[test]
    fn patch_then_revert_then_scan_reports_original() {
        let fx = Fixture::new();
        write_file(fx.root(), "gta_sa.exe", b"AAA");
        write_file(fx.root(), "data/script.img", b"script v2");
        write_file(fx.patches(), "gta_sa.exe.xdelta", b"BBB");
        write_file(fx.patches(), "data/script.img.xdelta", b"script v1");
        let manifest = fx.manifest(vec![
            entry("gta_sa.exe", b"AAA", b"BBB"),
            entry("data/script.img", b"script v2", b"script v1"),
        ]);
        let table = VersionTable::builtin();

        let report = patch::apply(
            &fx.config,
            &manifest,
            &FakeDelta::default(),
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.fail_count, 0);

        revert(&fx.config, None, &CancelToken::new()).unwrap();
        let snapshot = scan::scan(&fx.config, &manifest, &table, None, &CancelToken::new());
        assert!(snapshot
            .results
            .iter()
            .all(|result| result.status == FileStatus::Original));
        assert!(snapshot.has_backups);
    }

    #[test]
    fn progress_counts_restored_files() {
        let fx = Fixture::new();
        write_file(fx.root(), "backups/a.dat", b"a");
        write_file(fx.root(), "backups/b.dat", b"b");
        let ticks = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let progress: RevertProgressFn = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });

        revert(&fx.config, Some(progress), &CancelToken::new()).unwrap();
        assert_eq!(*ticks.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }
}
