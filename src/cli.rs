use crate::{
    addons::{self, AddonState},
    app::{App, AppEvent},
    backup::BackupStore,
    config::{self, AppConfig, EngineConfig},
    download::{self, HttpSource},
    game, laa,
    patch::{PatchStatus, Xdelta},
    recipes,
    scan::InstallationSnapshot,
    update::{self, UpdateResult},
};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "sa-downgrader")]
#[command(author, version, about = "Downgrade GTA San Andreas to a mod-friendly executable", long_about = None)]
pub struct Cli {
    /// Game installation directory
    #[arg(long, global = true)]
    pub game: Option<PathBuf>,

    /// Directory holding manifest.json and the delta files
    #[arg(long, global = true)]
    pub patches: Option<PathBuf>,

    /// Path to the xdelta3 binary
    #[arg(long, global = true)]
    pub xdelta: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// More log output (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the state of every managed file
    Scan,
    /// Downgrade the installation, then optionally install add-ons
    Patch {
        /// Add-ons to install after a clean patch (comma separated)
        #[arg(long, value_delimiter = ',')]
        mods: Vec<String>,
        /// Do not add ASI Loader / ModLoader automatically
        #[arg(long)]
        no_deps: bool,
    },
    /// Restore every backed-up file
    Revert,
    /// Manage add-ons
    Mods {
        #[command(subcommand)]
        command: ModsCommand,
    },
    /// Inspect or delete the backup store
    Backups {
        #[command(subcommand)]
        command: BackupsCommand,
    },
    /// Mark the executable large-address-aware
    Laa,
    /// Download the patch bundle into the patches directory
    FetchPatches {
        /// iCloud Drive share link of the bundle
        #[arg(long)]
        url: Option<String>,
    },
    /// Check for a newer release
    Update {
        /// Download the new release into the cache directory
        #[arg(long)]
        download: bool,
    },
    /// Show resolved paths
    Paths,
}

#[derive(Subcommand)]
pub enum ModsCommand {
    /// Install add-ons by name
    Install {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long)]
        no_deps: bool,
    },
    /// Show installed add-ons
    List,
    /// Show every add-on that can be installed
    Available,
}

#[derive(Subcommand)]
pub enum BackupsCommand {
    List,
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

struct Session {
    app_config: AppConfig,
    format: OutputFormat,
    game: Option<PathBuf>,
    patches: PathBuf,
    xdelta: Option<PathBuf>,
}

impl Session {
    fn new(cli: &Cli) -> Self {
        let app_config = AppConfig::load_or_create().unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "using default settings");
            AppConfig::default()
        });
        let patches = app_config.resolve_patches_dir(cli.patches.as_deref());
        let xdelta = cli.xdelta.clone().or_else(|| app_config.xdelta_path.clone());
        let game = cli
            .game
            .clone()
            .or_else(|| app_config.game_root.clone())
            .or_else(game::detect_game_root);
        Self {
            app_config,
            format: cli.format,
            game,
            patches,
            xdelta,
        }
    }

    fn engine_config(&mut self) -> Result<EngineConfig> {
        let Some(root) = self.game.clone() else {
            bail!("Game directory not found; pass --game <dir>");
        };
        if !root.is_dir() {
            bail!("Game directory does not exist: {}", root.display());
        }
        if !game::looks_like_game_root(&root) {
            warn!(root = %root.display(), "no gta_sa.exe or gta-sa.exe in game directory");
        } else if self.app_config.game_root.as_deref() != Some(root.as_path()) {
            self.app_config.game_root = Some(root.clone());
            if let Err(err) = self.app_config.save() {
                warn!(error = %format!("{err:#}"), "could not remember game directory");
            }
        }

        let mut config = EngineConfig::new(root, self.patches.clone());
        config.extra_versions = self.app_config.extra_versions.clone();
        Ok(config)
    }

    fn app(&mut self, locate_tool: bool) -> Result<App> {
        let config = self.engine_config()?;
        let tool = if locate_tool {
            Xdelta::locate(self.xdelta.as_deref())
                .context("xdelta3 is required to patch; install it or pass --xdelta")?
        } else {
            Xdelta::new(self.xdelta.clone().unwrap_or_else(|| PathBuf::from("xdelta3")))
        };
        Ok(App::new(config, Arc::new(tool), Arc::new(HttpSource)))
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let mut ctx = Session::new(&cli);
    match cli.command {
        Commands::Scan => run_scan(&mut ctx),
        Commands::Patch { mods, no_deps } => run_patch(&mut ctx, mods, no_deps),
        Commands::Revert => run_revert(&mut ctx),
        Commands::Mods { command } => match command {
            ModsCommand::Install { names, no_deps } => run_mods_install(&mut ctx, names, no_deps),
            ModsCommand::List => list_installed_mods(&mut ctx),
            ModsCommand::Available => list_available_mods(ctx.format),
        },
        Commands::Backups { command } => match command {
            BackupsCommand::List => list_backups(&mut ctx),
            BackupsCommand::Clear { yes } => clear_backups(&mut ctx, yes),
        },
        Commands::Laa => run_laa(&mut ctx),
        Commands::FetchPatches { url } => run_fetch_patches(&ctx, url),
        Commands::Update { download } => run_update(ctx.format, download),
        Commands::Paths => list_paths(&ctx),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_scan(ctx: &mut Session) -> Result<()> {
    let mut app = ctx.app(false)?;
    app.start_scan()?;
    let text = ctx.format == OutputFormat::Text;
    app.run_until_idle(|event| {
        if let AppEvent::ScanProgress { done, total } = event {
            if text {
                eprint!("\rScanning {done}/{total}");
                if done == total {
                    eprintln!();
                }
            }
        }
    });
    let snapshot = app.snapshot.context("scan produced no result")?;
    match ctx.format {
        OutputFormat::Json => print_json(&snapshot),
        OutputFormat::Text => {
            print_snapshot(&snapshot);
            Ok(())
        }
    }
}

fn print_snapshot(snapshot: &InstallationSnapshot) {
    println!("Version: {}", snapshot.detected_version);
    if snapshot.read_only {
        println!("Warning: installation directory is read-only");
    }
    let width = snapshot
        .results
        .iter()
        .map(|result| result.path.len())
        .max()
        .unwrap_or(4);
    for result in &snapshot.results {
        let current = result
            .current_hash
            .as_ref()
            .map(|digest| digest.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{path:<width$}  {current:<8}  {status:<28}  {needs}",
            path = result.path,
            status = result.status.to_string(),
            needs = result.needs_patch
        );
    }
    if !snapshot.installed_addons.is_empty() {
        let names: Vec<&str> = snapshot.installed_addons.iter().map(String::as_str).collect();
        println!("Add-ons: {}", names.join(", "));
    }
    println!("Backups: {}", if snapshot.has_backups { "present" } else { "none" });
    if snapshot.needs_work() {
        println!("Run `sa-downgrader patch` to downgrade.");
    }
}

#[derive(Default, Serialize)]
struct JobSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    patch: Option<crate::patch::PatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revert: Option<crate::revert::RevertReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    addons: Option<addons::AddonReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<InstallationSnapshot>,
    errors: Vec<String>,
}

/// Drives the app to completion, echoing progress in text mode.
fn drive(app: &mut App, format: OutputFormat) -> JobSummary {
    let text = format == OutputFormat::Text;
    let mut errors = Vec::new();
    app.run_until_idle(|event| match event {
        AppEvent::PatchProgress(progress) if text => {
            if progress.status == PatchStatus::Working {
                return;
            }
            if progress.detail.is_empty() {
                println!("[{}] {}: {}", progress.index + 1, progress.path, progress.status);
            } else {
                println!(
                    "[{}] {}: {} ({})",
                    progress.index + 1,
                    progress.path,
                    progress.status,
                    progress.detail
                );
            }
        }
        AppEvent::PatchCompleted(report) if text => {
            println!(
                "Patched: {} succeeded, {} failed",
                report.success_count, report.fail_count
            );
        }
        AppEvent::RevertCompleted(report) if text => {
            println!("Restored {} file(s) from backup", report.restored.len());
        }
        AppEvent::AddonProgress { index, total, name } if text => {
            println!("Add-on {index}/{total}: {name}");
        }
        AppEvent::AddonsCompleted(report) if text => {
            println!(
                "Add-ons: {} installed, {} already present",
                report.applied.len(),
                report.skipped.len()
            );
        }
        AppEvent::Failed { kind, error } => {
            if text {
                eprintln!("{kind} failed: {error}");
            }
            errors.push(format!("{kind}: {error}"));
        }
        _ => {}
    });

    JobSummary {
        patch: app.last_patch.take(),
        revert: app.last_revert.take(),
        addons: app.last_addons.take(),
        snapshot: app.snapshot.take(),
        errors,
    }
}

fn finish(summary: JobSummary, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        print_json(&summary)?;
    }
    if let Some(patch) = &summary.patch {
        if patch.fail_count > 0 {
            bail!("{} file(s) could not be patched", patch.fail_count);
        }
    }
    if let Some(error) = summary.errors.first() {
        bail!("{error}");
    }
    Ok(())
}

fn requested_addons(names: Vec<String>, no_deps: bool) -> Result<Vec<String>> {
    for name in &names {
        if recipes::recipe_for(name).is_none() {
            let known: Vec<&str> = recipes::addon_names().collect();
            bail!("Unknown add-on: {name} (known: {})", known.join(", "));
        }
    }
    Ok(if no_deps {
        names
    } else {
        addons::with_required_infrastructure(&names)
    })
}

fn run_patch(ctx: &mut Session, mods: Vec<String>, no_deps: bool) -> Result<()> {
    let mods = requested_addons(mods, no_deps)?;
    let mut app = ctx.app(true)?;
    if ctx.format == OutputFormat::Text {
        println!("Game root: {}", app.config().install_root.display());
    }
    app.start_patch(mods)?;
    let summary = drive(&mut app, ctx.format);
    if ctx.format == OutputFormat::Text {
        if let Some(snapshot) = &summary.snapshot {
            print_snapshot(snapshot);
        }
    }
    finish(summary, ctx.format)
}

fn run_revert(ctx: &mut Session) -> Result<()> {
    let mut app = ctx.app(false)?;
    app.start_revert()?;
    let summary = drive(&mut app, ctx.format);
    finish(summary, ctx.format)
}

fn run_mods_install(ctx: &mut Session, names: Vec<String>, no_deps: bool) -> Result<()> {
    let names = requested_addons(names, no_deps)?;
    let mut app = ctx.app(false)?;
    app.start_addons(names)?;
    let summary = drive(&mut app, ctx.format);
    finish(summary, ctx.format)
}

fn list_installed_mods(ctx: &mut Session) -> Result<()> {
    let config = ctx.engine_config()?;
    let state = AddonState::load(&config.addon_state_path()).unwrap_or_default();
    match ctx.format {
        OutputFormat::Json => print_json(&state),
        OutputFormat::Text => {
            if state.installed_mods.is_empty() {
                println!("No add-ons installed.");
            }
            for name in &state.installed_mods {
                println!("{name}");
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct AddonListItem {
    name: &'static str,
    description: &'static str,
    requires: &'static [&'static str],
}

fn list_available_mods(format: OutputFormat) -> Result<()> {
    let items: Vec<AddonListItem> = recipes::RECIPES
        .iter()
        .map(|recipe| AddonListItem {
            name: recipe.name,
            description: recipe.description,
            requires: recipe.requires(),
        })
        .collect();
    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Text => {
            for item in items {
                if item.requires.is_empty() {
                    println!("{:<32} {}", item.name, item.description);
                } else {
                    println!(
                        "{:<32} {} (needs {})",
                        item.name,
                        item.description,
                        item.requires.join(", ")
                    );
                }
            }
            Ok(())
        }
    }
}

fn list_backups(ctx: &mut Session) -> Result<()> {
    let store = BackupStore::new(&ctx.engine_config()?);
    let entries = store.entries().context("read backups")?;
    match ctx.format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No backups.");
            }
            for entry in entries {
                println!("{entry}");
            }
            Ok(())
        }
    }
}

fn clear_backups(ctx: &mut Session, yes: bool) -> Result<()> {
    let store = BackupStore::new(&ctx.engine_config()?);
    if !yes {
        bail!(
            "Refusing to delete {} without --yes; revert will no longer be possible",
            store.root().display()
        );
    }
    let removed = store.clear().context("delete backups")?;
    if ctx.format == OutputFormat::Text {
        println!("{}", if removed { "Backups deleted." } else { "No backups." });
    }
    Ok(())
}

fn run_laa(ctx: &mut Session) -> Result<()> {
    let config = ctx.engine_config()?;
    let outcomes = laa::apply(&config)?;
    match ctx.format {
        OutputFormat::Json => print_json(&outcomes),
        OutputFormat::Text => {
            for outcome in outcomes {
                println!("{}: {:?}", outcome.path, outcome.status);
            }
            Ok(())
        }
    }
}

fn run_fetch_patches(ctx: &Session, url: Option<String>) -> Result<()> {
    let url = url.unwrap_or_else(|| download::PATCH_BUNDLE_URL.to_string());
    let text = ctx.format == OutputFormat::Text;
    let progress = |received: u64, total: Option<u64>| {
        if !text {
            return;
        }
        match total {
            Some(total) if total > 0 => eprint!("\rDownloading {}%", received * 100 / total),
            _ => eprint!("\rDownloading {} KiB", received / 1024),
        }
        let _ = std::io::stderr().flush();
    };
    let written = download::fetch_patch_bundle(&url, &ctx.patches, Some(&progress))?;
    if text {
        eprintln!();
    }
    info!(files = written.len(), "patch bundle ready");
    match ctx.format {
        OutputFormat::Json => print_json(&written),
        OutputFormat::Text => {
            println!(
                "Extracted {} file(s) into {}",
                written.len(),
                ctx.patches.display()
            );
            Ok(())
        }
    }
}

fn run_update(format: OutputFormat, download: bool) -> Result<()> {
    let result = update::check_for_updates(env!("CARGO_PKG_VERSION"), download)?;
    if format == OutputFormat::Json {
        return print_json(&result);
    }
    match result {
        UpdateResult::UpToDate => println!("Up to date (v{})", env!("CARGO_PKG_VERSION")),
        UpdateResult::Available(info) => {
            println!("New version v{} available: {}", info.version, info.download_url)
        }
        UpdateResult::Ready {
            info,
            path,
            instructions,
        } => {
            println!("Update v{} downloaded to {}", info.version, path.display());
            println!("{instructions}");
        }
        UpdateResult::Skipped { version, reason } => {
            println!("Update v{version} skipped: {reason}")
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    game_root: Option<String>,
    patches_dir: String,
    manifest: String,
    backups: Option<String>,
    addon_state: Option<String>,
    settings: Option<String>,
    xdelta: Option<String>,
}

fn list_paths(ctx: &Session) -> Result<()> {
    let display = |path: &Path| path.display().to_string();
    let engine = ctx
        .game
        .as_ref()
        .map(|root| EngineConfig::new(root.clone(), ctx.patches.clone()));
    let output = PathsOutput {
        game_root: ctx.game.as_deref().map(display),
        patches_dir: display(&ctx.patches),
        manifest: display(&ctx.patches.join(config::MANIFEST_FILE)),
        backups: engine.as_ref().map(|config| display(&config.backup_root())),
        addon_state: engine.as_ref().map(|config| display(&config.addon_state_path())),
        settings: config::base_data_dir()
            .ok()
            .map(|dir| display(&dir.join("config.json"))),
        xdelta: Xdelta::locate(ctx.xdelta.as_deref())
            .ok()
            .map(|tool| display(tool.binary())),
    };

    match ctx.format {
        OutputFormat::Json => print_json(&output),
        OutputFormat::Text => {
            let or_missing = |value: &Option<String>| {
                value.clone().unwrap_or_else(|| "(not found)".to_string())
            };
            println!("Game root: {}", or_missing(&output.game_root));
            println!("Patches: {}", output.patches_dir);
            println!("Manifest: {}", output.manifest);
            println!("Backups: {}", or_missing(&output.backups));
            println!("Add-on state: {}", or_missing(&output.addon_state));
            println!("Settings: {}", or_missing(&output.settings));
            println!("xdelta3: {}", or_missing(&output.xdelta));
            Ok(())
        }
    }
}
