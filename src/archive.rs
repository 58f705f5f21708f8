use anyhow::{Context, Result};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs,
    io::{Cursor, Read, Seek},
    path::{Path, PathBuf},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use tracing::debug;

/// Which archive members a step extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Exact member paths plus everything under the given prefixes.
    Named {
        names: &'static [&'static str],
        prefixes: &'static [&'static str],
    },
    /// Members whose name ends with one of the extensions, case-insensitive.
    Extensions(&'static [&'static str]),
    /// Everything except members whose path contains the marker.
    Excluding(&'static str),
}

impl Selection {
    pub fn matches(&self, member: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Named { names, prefixes } => {
                names.iter().any(|name| *name == member)
                    || prefixes.iter().any(|prefix| member.starts_with(prefix))
            }
            Selection::Extensions(extensions) => {
                let lower = member.to_lowercase();
                extensions.iter().any(|ext| lower.ends_with(ext))
            }
            Selection::Excluding(marker) => !member.contains(marker),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Keep the member's directory structure.
    Preserve,
    /// Drop directories and write every file by its base name.
    Flatten,
}

/// Extracts the selected members of an in-memory zip into `dest`.
/// Returns the written paths relative to `dest`.
pub fn extract_zip_bytes(
    bytes: &[u8],
    dest: &Path,
    selection: Selection,
    layout: Layout,
) -> Result<Vec<PathBuf>> {
    extract_zip_from(Cursor::new(bytes), dest, selection, layout)
}

fn extract_zip_from<R: Read + Seek>(
    reader: R,
    dest: &Path,
    selection: Selection,
    layout: Layout,
) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(reader).context("read zip")?;
    fs::create_dir_all(dest).context("create extraction dir")?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("zip entry")?;
        let Some(enclosed) = file.enclosed_name() else {
            debug!(name = file.name(), "skipping unsafe zip entry");
            continue;
        };
        let member = enclosed.to_string_lossy().replace('\\', "/");
        if !selection.matches(&member) {
            continue;
        }

        let rel = match layout {
            Layout::Preserve => enclosed,
            Layout::Flatten => {
                if file.is_dir() {
                    continue;
                }
                match enclosed.file_name() {
                    Some(name) => PathBuf::from(name),
                    None => continue,
                }
            }
        };

        let out_path = dest.join(&rel);
        if file.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }

        let mut out_file = fs::File::create(&out_path).context("write zip entry")?;
        std::io::copy(&mut file, &mut out_file).context("extract zip entry")?;
        if let Some(mtime) = file.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
        written.push(rel);
    }

    debug!(dest = %dest.display(), files = written.len(), "extracted zip");
    Ok(written)
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}
