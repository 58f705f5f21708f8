use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

pub const GAME_NAME: &str = "Grand Theft Auto San Andreas";
pub const STEAM_APP_ID: &str = "12120";

/// Accepted file names for the primary executable, canonical first.
pub const EXE_VARIANTS: [&str; 2] = ["gta_sa.exe", "gta-sa.exe"];

const WRITE_PROBE: &str = ".downgrader_test";

/// Looks for the game in the usual Steam library locations.
pub fn detect_game_root() -> Option<PathBuf> {
    let home = dirs_home()?;
    let mut libraries = Vec::new();
    for base in [
        home.join(".local/share/Steam"),
        home.join(".steam/steam"),
        home.join(".steam/root"),
        home.join(".var/app/com.valvesoftware.Steam/data/Steam"),
    ] {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                libraries.extend(paths);
            }
        }
        libraries.push(base);
    }
    // Steam Deck SD card
    libraries.push(PathBuf::from("/run/media/mmcblk0p1"));

    libraries
        .into_iter()
        .map(|lib| lib.join("steamapps/common").join(GAME_NAME))
        .find(|candidate| looks_like_game_root(candidate))
}

fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

pub fn looks_like_game_root(path: &Path) -> bool {
    EXE_VARIANTS.iter().any(|name| path.join(name).is_file())
}

/// Creates and removes a throwaway file. Any failure means read-only.
pub fn probe_writable(dir: &Path) -> bool {
    let probe = dir.join(WRITE_PROBE);
    let result = File::create(&probe).and_then(|mut file| file.write_all(b"test"));
    match result {
        Ok(()) => fs::remove_file(&probe).is_ok(),
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "write probe failed");
            false
        }
    }
}
