use crate::{config::EngineConfig, digest::Digest};
use serde::{Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

const BUILTIN_VERSIONS: &[(&str, &str)] = &[
    ("170b3a9108687b26da2d8901c6948a18", "v1.0 US (Hoodlum)"),
    ("2b5066bd4097ac2944ce6a9cf8fe5677", "v1.0 US (Hoodlum + LAA Patch)"),
    ("667f799c4ba8c9e1054fccaea6d4259b", "v1.0 US (Compact)"),
    ("6c6160da9b175b66cf9127c86be57bf7", "v1.0 EU"),
    ("49dd417760484a18017805df46b308b8", "v1.0 EU (Alt)"),
    ("9f2d711dbf1fbbcda5ff9418a2cc1ef5", "v1.01 US"),
    ("25405921d1c47747fd01fd0bfe0a05ae", "v1.01 EU"),
    ("d9cb35c898d3298ca904a63e10ee18d9", "NewSteam R2 (German)"),
    ("5bfd4dd83989a8264de4b8e771f237fd", "NewSteam R2"),
];

/// Post-processed executables that count as already patched. Applies to the
/// executable variants only and is not derived from the manifest.
pub const PATCHED_VARIANTS: &[PatchedVariant] = &[PatchedVariant {
    digest: "2b5066bd4097ac2944ce6a9cf8fe5677",
    label: "LAA",
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchedVariant {
    pub digest: &'static str,
    pub label: &'static str,
}

/// Known variant matching `digest`, when `rel_path` names the executable.
pub fn patched_variant<'a>(
    config: &'a EngineConfig,
    rel_path: &str,
    digest: Option<&Digest>,
) -> Option<&'a PatchedVariant> {
    let digest = digest?;
    if !config.is_executable(rel_path) {
        return None;
    }
    config
        .patched_variants
        .iter()
        .find(|variant| variant.digest == digest.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionLabel {
    Known(String),
    Unrecognized(Digest),
    NotFound,
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionLabel::Known(label) => f.write_str(label),
            VersionLabel::Unrecognized(digest) => write!(f, "Custom/Unknown ({})", digest.short()),
            VersionLabel::NotFound => f.write_str("Unknown"),
        }
    }
}

impl Serialize for VersionLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Immutable digest to release label lookup.
#[derive(Debug, Clone)]
pub struct VersionTable {
    labels: BTreeMap<Digest, String>,
}

impl VersionTable {
    pub fn builtin() -> Self {
        let labels = BUILTIN_VERSIONS
            .iter()
            .filter_map(|(hex, label)| Some((Digest::parse(hex)?, label.to_string())))
            .collect();
        Self { labels }
    }

    /// Built-in table plus the configured extras. Extras may override labels.
    pub fn for_config(config: &EngineConfig) -> Self {
        let mut table = Self::builtin();
        table.extend(
            config
                .extra_versions
                .iter()
                .map(|(hex, label)| (hex.as_str(), label.as_str())),
        );
        table
    }

    pub fn extend<'a>(&mut self, extra: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (hex, label) in extra {
            if let Some(digest) = Digest::parse(hex) {
                self.labels.insert(digest, label.to_string());
            }
        }
    }

    pub fn classify(&self, digest: &Digest) -> VersionLabel {
        match self.labels.get(digest) {
            Some(label) => VersionLabel::Known(label.clone()),
            None => VersionLabel::Unrecognized(digest.clone()),
        }
    }

    /// Classifies the installed executable. A recognised variant wins over
    /// an unrecognised one; no executable at all yields `NotFound`.
    pub fn classify_installation(&self, config: &EngineConfig) -> VersionLabel {
        let mut fallback = VersionLabel::NotFound;
        for (_, path) in config.existing_executables() {
            let Some(digest) = crate::digest::digest_file(&path) else {
                continue;
            };
            match self.classify(&digest) {
                known @ VersionLabel::Known(_) => return known,
                unknown => {
                    if fallback == VersionLabel::NotFound {
                        fallback = unknown;
                    }
                }
            }
        }
        fallback
    }
}
