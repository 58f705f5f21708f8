use crate::{backup::BackupStore, config::EngineConfig};
use serde::Serialize;
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::info;

/// `IMAGE_FILE_LARGE_ADDRESS_AWARE` in the COFF characteristics.
pub const LARGE_ADDRESS_AWARE: u16 = 0x0020;

const PE_POINTER_OFFSET: usize = 0x3C;
const CHARACTERISTICS_OFFSET: usize = 4 + 18;

#[derive(Debug, Error)]
pub enum LaaError {
    #[error("{path} is not a PE executable: {reason}")]
    NotExecutable { path: String, reason: &'static str },

    #[error("failed to update {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LaaStatus {
    Applied,
    AlreadySet,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaaOutcome {
    pub path: String,
    pub status: LaaStatus,
}

/// Byte offset of the characteristics word, after validating both signatures.
fn characteristics_offset(image: &[u8]) -> Result<usize, &'static str> {
    if image.get(..2) != Some(b"MZ".as_slice()) {
        return Err("missing MZ signature");
    }
    let pointer = image
        .get(PE_POINTER_OFFSET..PE_POINTER_OFFSET + 4)
        .ok_or("truncated DOS header")?;
    let pe = u32::from_le_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]) as usize;
    if image.get(pe..pe + 4) != Some(b"PE\0\0".as_slice()) {
        return Err("missing PE signature");
    }
    let offset = pe + CHARACTERISTICS_OFFSET;
    if image.len() < offset + 2 {
        return Err("truncated COFF header");
    }
    Ok(offset)
}

pub fn is_large_address_aware(image: &[u8]) -> Result<bool, &'static str> {
    let offset = characteristics_offset(image)?;
    let flags = u16::from_le_bytes([image[offset], image[offset + 1]]);
    Ok(flags & LARGE_ADDRESS_AWARE != 0)
}

/// Sets the flag in place. Returns whether anything changed.
pub fn set_large_address_aware(image: &mut [u8]) -> Result<bool, &'static str> {
    let offset = characteristics_offset(image)?;
    let flags = u16::from_le_bytes([image[offset], image[offset + 1]]);
    if flags & LARGE_ADDRESS_AWARE != 0 {
        return Ok(false);
    }
    image[offset..offset + 2].copy_from_slice(&(flags | LARGE_ADDRESS_AWARE).to_le_bytes());
    Ok(true)
}

/// Marks every executable variant large-address-aware, backing each one up
/// first unless a backup already exists.
pub fn apply(config: &EngineConfig) -> Result<Vec<LaaOutcome>, LaaError> {
    let store = BackupStore::new(config);
    let mut outcomes = Vec::new();
    for name in &config.exe_variants {
        let path = config.install_root.join(name);
        if !path.is_file() {
            outcomes.push(LaaOutcome {
                path: name.clone(),
                status: LaaStatus::Missing,
            });
            continue;
        }
        let status = patch_file(&store, name, &path)?;
        outcomes.push(LaaOutcome {
            path: name.clone(),
            status,
        });
    }
    Ok(outcomes)
}

fn patch_file(store: &BackupStore, name: &str, path: &Path) -> Result<LaaStatus, LaaError> {
    let io_err = |source| LaaError::Io {
        path: name.to_string(),
        source,
    };
    let mut image = fs::read(path).map_err(io_err)?;
    let changed = set_large_address_aware(&mut image).map_err(|reason| LaaError::NotExecutable {
        path: name.to_string(),
        reason,
    })?;
    if !changed {
        return Ok(LaaStatus::AlreadySet);
    }

    store.save_if_absent(name).map_err(io_err)?;
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);
    fs::write(&tmp, &image).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    info!(path = name, "large address aware flag set");
    Ok(LaaStatus::Applied)
}
