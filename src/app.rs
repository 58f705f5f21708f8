use crate::{
    addons::{self, AddonError, AddonProgressFn, AddonReport, AssetSource},
    cancel::CancelToken,
    config::EngineConfig,
    manifest::{Manifest, ManifestError},
    patch::{self, DeltaTool, FileProgress, PatchError, PatchProgressFn, PatchReport},
    revert::{self, RevertError, RevertProgressFn, RevertReport},
    scan::{self, InstallationSnapshot, ScanProgressFn},
    version::VersionTable,
};
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Scan,
    Patch,
    Revert,
    Addons,
}

impl JobKind {
    fn mutates(self) -> bool {
        !matches!(self, JobKind::Scan)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Scan => "scan",
            JobKind::Patch => "patch",
            JobKind::Revert => "revert",
            JobKind::Addons => "add-on install",
        })
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a {0} is already running")]
    Busy(JobKind),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// What the front end gets to see, in arrival order.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ScanProgress { done: usize, total: usize },
    PatchProgress(FileProgress),
    RevertProgress { done: usize, total: usize },
    AddonProgress { index: usize, total: usize, name: String },
    ScanCompleted(InstallationSnapshot),
    PatchCompleted(PatchReport),
    RevertCompleted(RevertReport),
    AddonsCompleted(AddonReport),
    Failed { kind: JobKind, error: String },
}

enum ScanMessage {
    Progress { done: usize, total: usize },
    Completed(InstallationSnapshot),
    Panicked(String),
}

enum PatchMessage {
    Progress(FileProgress),
    Completed(PatchReport),
    Failed(PatchError),
    Panicked(String),
}

enum RevertMessage {
    Progress { done: usize, total: usize },
    Completed(RevertReport),
    Failed(RevertError),
    Panicked(String),
}

enum AddonMessage {
    Progress {
        index: usize,
        total: usize,
        name: String,
    },
    Completed(AddonReport),
    Failed(AddonError),
    Panicked(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `job` on its own thread. A panic is reported back through `panicked`
/// so the job's slot is always released.
fn spawn_worker<M: Send + 'static>(
    kind: JobKind,
    tx: Sender<M>,
    panicked: fn(String) -> M,
    job: impl FnOnce() -> M + Send + 'static,
) {
    thread::spawn(move || {
        let message = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(message) => message,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(job = %kind, reason = %reason, "worker panicked");
                panicked(reason)
            }
        };
        let _ = tx.send(message);
    });
}

/// Runs engine jobs on worker threads and collects their results.
///
/// One job per kind at a time; mutating jobs also exclude each other. The
/// caller drives it by calling [`App::poll`].
pub struct App {
    config: Arc<EngineConfig>,
    table: Arc<VersionTable>,
    tool: Arc<dyn DeltaTool>,
    source: Arc<dyn AssetSource>,

    scan_tx: Sender<ScanMessage>,
    scan_rx: Receiver<ScanMessage>,
    patch_tx: Sender<PatchMessage>,
    patch_rx: Receiver<PatchMessage>,
    revert_tx: Sender<RevertMessage>,
    revert_rx: Receiver<RevertMessage>,
    addon_tx: Sender<AddonMessage>,
    addon_rx: Receiver<AddonMessage>,

    scan_active: Option<CancelToken>,
    patch_active: Option<CancelToken>,
    revert_active: Option<CancelToken>,
    addon_active: Option<CancelToken>,

    /// Installed after the running patch finishes cleanly.
    queued_addons: Vec<String>,
    rescan_after_addons: bool,

    pub snapshot: Option<InstallationSnapshot>,
    pub last_patch: Option<PatchReport>,
    pub last_revert: Option<RevertReport>,
    pub last_addons: Option<AddonReport>,
}

impl App {
    pub fn new(
        config: EngineConfig,
        tool: Arc<dyn DeltaTool>,
        source: Arc<dyn AssetSource>,
    ) -> Self {
        let (scan_tx, scan_rx) = mpsc::channel();
        let (patch_tx, patch_rx) = mpsc::channel();
        let (revert_tx, revert_rx) = mpsc::channel();
        let (addon_tx, addon_rx) = mpsc::channel();
        let table = Arc::new(VersionTable::for_config(&config));
        Self {
            config: Arc::new(config),
            table,
            tool,
            source,
            scan_tx,
            scan_rx,
            patch_tx,
            patch_rx,
            revert_tx,
            revert_rx,
            addon_tx,
            addon_rx,
            scan_active: None,
            patch_active: None,
            revert_active: None,
            addon_active: None,
            queued_addons: Vec::new(),
            rescan_after_addons: false,
            snapshot: None,
            last_patch: None,
            last_revert: None,
            last_addons: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn slot(&self, kind: JobKind) -> &Option<CancelToken> {
        match kind {
            JobKind::Scan => &self.scan_active,
            JobKind::Patch => &self.patch_active,
            JobKind::Revert => &self.revert_active,
            JobKind::Addons => &self.addon_active,
        }
    }

    pub fn is_active(&self, kind: JobKind) -> bool {
        self.slot(kind).is_some()
    }

    pub fn is_busy(&self) -> bool {
        [JobKind::Scan, JobKind::Patch, JobKind::Revert, JobKind::Addons]
            .into_iter()
            .any(|kind| self.is_active(kind))
    }

    fn ensure_idle(&self, kind: JobKind) -> Result<(), StartError> {
        if self.is_active(kind) {
            return Err(StartError::Busy(kind));
        }
        if kind.mutates() {
            for other in [JobKind::Patch, JobKind::Revert, JobKind::Addons] {
                if self.is_active(other) {
                    return Err(StartError::Busy(other));
                }
            }
        }
        Ok(())
    }

    /// Asks the running job of `kind` to stop after its current file.
    pub fn cancel(&self, kind: JobKind) {
        if let Some(token) = self.slot(kind) {
            info!(job = %kind, "cancel requested");
            token.cancel();
        }
    }

    fn load_manifest(&self) -> Result<Arc<Manifest>, StartError> {
        Ok(Arc::new(Manifest::load(&self.config.manifest_path())?))
    }

    pub fn start_scan(&mut self) -> Result<(), StartError> {
        self.ensure_idle(JobKind::Scan)?;
        let manifest = self.load_manifest()?;
        let cancel = CancelToken::new();
        self.scan_active = Some(cancel.clone());

        let config = self.config.clone();
        let table = self.table.clone();
        let tx = self.scan_tx.clone();
        let progress_tx = tx.clone();
        let progress: ScanProgressFn = Arc::new(move |done, total| {
            let _ = progress_tx.send(ScanMessage::Progress { done, total });
        });
        spawn_worker(JobKind::Scan, tx, ScanMessage::Panicked, move || {
            ScanMessage::Completed(scan::scan(&config, &manifest, &table, Some(progress), &cancel))
        });
        debug!("scan started");
        Ok(())
    }

    /// Starts a patch; `addons` are installed afterwards if every file succeeded.
    pub fn start_patch(&mut self, addons: Vec<String>) -> Result<(), StartError> {
        self.ensure_idle(JobKind::Patch)?;
        let manifest = self.load_manifest()?;
        let cancel = CancelToken::new();
        self.patch_active = Some(cancel.clone());
        self.queued_addons = addons;

        let config = self.config.clone();
        let tool = self.tool.clone();
        let tx = self.patch_tx.clone();
        let progress_tx = tx.clone();
        let progress: PatchProgressFn = Arc::new(move |event: &FileProgress| {
            let _ = progress_tx.send(PatchMessage::Progress(event.clone()));
        });
        spawn_worker(JobKind::Patch, tx, PatchMessage::Panicked, move || {
            match patch::apply(&config, &manifest, tool.as_ref(), Some(progress), &cancel) {
                Ok(report) => PatchMessage::Completed(report),
                Err(err) => PatchMessage::Failed(err),
            }
        });
        info!(root = %self.config.install_root.display(), "patch started");
        Ok(())
    }

    pub fn start_revert(&mut self) -> Result<(), StartError> {
        self.ensure_idle(JobKind::Revert)?;
        let cancel = CancelToken::new();
        self.revert_active = Some(cancel.clone());

        let config = self.config.clone();
        let tx = self.revert_tx.clone();
        let progress_tx = tx.clone();
        let progress: RevertProgressFn = Arc::new(move |done, total| {
            let _ = progress_tx.send(RevertMessage::Progress { done, total });
        });
        spawn_worker(JobKind::Revert, tx, RevertMessage::Panicked, move || {
            match revert::revert(&config, Some(progress), &cancel) {
                Ok(report) => RevertMessage::Completed(report),
                Err(err) => RevertMessage::Failed(err),
            }
        });
        Ok(())
    }

    pub fn start_addons(&mut self, requested: Vec<String>) -> Result<(), StartError> {
        self.ensure_idle(JobKind::Addons)?;
        let cancel = CancelToken::new();
        self.addon_active = Some(cancel.clone());

        let config = self.config.clone();
        let source = self.source.clone();
        let tx = self.addon_tx.clone();
        let progress_tx = tx.clone();
        let progress: AddonProgressFn = Arc::new(move |index, total, name: &str| {
            let _ = progress_tx.send(AddonMessage::Progress {
                index,
                total,
                name: name.to_string(),
            });
        });
        spawn_worker(JobKind::Addons, tx, AddonMessage::Panicked, move || {
            match addons::install_addons(
                &config,
                &requested,
                source.as_ref(),
                Some(progress),
                &cancel,
            ) {
                Ok(report) => AddonMessage::Completed(report),
                Err(err) => AddonMessage::Failed(err),
            }
        });
        Ok(())
    }

    /// Drains every worker channel and runs follow-up jobs.
    pub fn poll(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        self.poll_scans(&mut events);
        self.poll_patches(&mut events);
        self.poll_reverts(&mut events);
        self.poll_addons(&mut events);
        events
    }

    /// Polls until nothing is running, handing each event to `on_event`.
    pub fn run_until_idle(&mut self, mut on_event: impl FnMut(&AppEvent)) {
        loop {
            for event in self.poll() {
                on_event(&event);
            }
            if !self.is_busy() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn poll_scans(&mut self, events: &mut Vec<AppEvent>) {
        loop {
            match self.scan_rx.try_recv() {
                Ok(ScanMessage::Progress { done, total }) => {
                    events.push(AppEvent::ScanProgress { done, total })
                }
                Ok(ScanMessage::Completed(snapshot)) => {
                    self.scan_active = None;
                    self.snapshot = Some(snapshot.clone());
                    events.push(AppEvent::ScanCompleted(snapshot));
                }
                Ok(ScanMessage::Panicked(reason)) => {
                    self.scan_active = None;
                    events.push(AppEvent::Failed {
                        kind: JobKind::Scan,
                        error: reason,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn poll_patches(&mut self, events: &mut Vec<AppEvent>) {
        loop {
            match self.patch_rx.try_recv() {
                Ok(PatchMessage::Progress(event)) => events.push(AppEvent::PatchProgress(event)),
                Ok(PatchMessage::Completed(report)) => {
                    self.patch_active = None;
                    self.last_patch = Some(report.clone());
                    let clean = report.fail_count == 0 && !report.cancelled;
                    events.push(AppEvent::PatchCompleted(report));
                    self.after_patch(clean, events);
                }
                Ok(PatchMessage::Failed(err)) => {
                    self.patch_active = None;
                    self.queued_addons.clear();
                    warn!(error = %err, "patch failed");
                    events.push(AppEvent::Failed {
                        kind: JobKind::Patch,
                        error: err.to_string(),
                    });
                }
                Ok(PatchMessage::Panicked(reason)) => {
                    self.patch_active = None;
                    self.queued_addons.clear();
                    events.push(AppEvent::Failed {
                        kind: JobKind::Patch,
                        error: reason,
                    });
                    self.rescan(events);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn after_patch(&mut self, clean: bool, events: &mut Vec<AppEvent>) {
        let queued = std::mem::take(&mut self.queued_addons);
        if clean && !queued.is_empty() {
            match self.start_addons(queued) {
                Ok(()) => {
                    self.rescan_after_addons = true;
                    return;
                }
                Err(err) => events.push(AppEvent::Failed {
                    kind: JobKind::Addons,
                    error: err.to_string(),
                }),
            }
        } else if !queued.is_empty() {
            info!("skipping add-ons after an incomplete patch");
        }
        self.rescan(events);
    }

    fn rescan(&mut self, events: &mut Vec<AppEvent>) {
        if let Err(err) = self.start_scan() {
            events.push(AppEvent::Failed {
                kind: JobKind::Scan,
                error: err.to_string(),
            });
        }
    }

    fn poll_reverts(&mut self, events: &mut Vec<AppEvent>) {
        loop {
            match self.revert_rx.try_recv() {
                Ok(RevertMessage::Progress { done, total }) => {
                    events.push(AppEvent::RevertProgress { done, total })
                }
                Ok(RevertMessage::Completed(report)) => {
                    self.revert_active = None;
                    self.last_revert = Some(report.clone());
                    events.push(AppEvent::RevertCompleted(report));
                    self.rescan(events);
                }
                Ok(RevertMessage::Failed(err)) => {
                    self.revert_active = None;
                    // Only an I/O failure can leave the tree half restored.
                    let touched = matches!(err, RevertError::Io { .. });
                    events.push(AppEvent::Failed {
                        kind: JobKind::Revert,
                        error: err.to_string(),
                    });
                    if touched {
                        self.rescan(events);
                    }
                }
                Ok(RevertMessage::Panicked(reason)) => {
                    self.revert_active = None;
                    events.push(AppEvent::Failed {
                        kind: JobKind::Revert,
                        error: reason,
                    });
                    self.rescan(events);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn poll_addons(&mut self, events: &mut Vec<AppEvent>) {
        loop {
            match self.addon_rx.try_recv() {
                Ok(AddonMessage::Progress { index, total, name }) => {
                    events.push(AppEvent::AddonProgress { index, total, name })
                }
                Ok(AddonMessage::Completed(report)) => {
                    self.addon_active = None;
                    self.last_addons = Some(report.clone());
                    events.push(AppEvent::AddonsCompleted(report));
                    self.after_addons(events);
                }
                Ok(AddonMessage::Failed(err)) => {
                    self.addon_active = None;
                    events.push(AppEvent::Failed {
                        kind: JobKind::Addons,
                        error: err.to_string(),
                    });
                    self.after_addons(events);
                }
                Ok(AddonMessage::Panicked(reason)) => {
                    self.addon_active = None;
                    events.push(AppEvent::Failed {
                        kind: JobKind::Addons,
                        error: reason,
                    });
                    self.after_addons(events);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn after_addons(&mut self, events: &mut Vec<AppEvent>) {
        if std::mem::take(&mut self.rescan_after_addons) {
            self.rescan(events);
        }
    }
}
