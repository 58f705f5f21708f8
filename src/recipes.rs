use crate::archive::{Layout, Selection};

pub const ASI_LOADER: &str = "ASI Loader";
pub const MODLOADER: &str = "ModLoader";

/// Applied before anything else, in this order.
pub const INFRASTRUCTURE: [&str; 2] = [ASI_LOADER, MODLOADER];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetPick {
    Exact(&'static str),
    /// Lowercased name contains the needle and ends with the suffix; any
    /// `.zip` is accepted when nothing matches.
    Preferred {
        contains: &'static str,
        suffix: &'static str,
    },
}

impl AssetPick {
    pub fn pick<'a>(&self, names: &[&'a str]) -> Option<&'a str> {
        match self {
            AssetPick::Exact(wanted) => names.iter().copied().find(|name| name == wanted),
            AssetPick::Preferred { contains, suffix } => names
                .iter()
                .copied()
                .find(|name| name.to_lowercase().contains(contains) && name.ends_with(suffix))
                .or_else(|| names.iter().copied().find(|name| name.ends_with(".zip"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Url(&'static str),
    LatestRelease {
        repo: &'static str,
        pick: AssetPick,
    },
    TaggedRelease {
        repo: &'static str,
        tag: &'static str,
        pick: AssetPick,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    InstallRoot,
    /// `<install_root>/<addon dir>/<name>`
    AddonDir(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub source: Source,
    pub selection: Selection,
    pub layout: Layout,
    pub destination: Destination,
}

#[derive(Debug, Clone, Copy)]
pub struct Recipe {
    pub name: &'static str,
    pub description: &'static str,
    pub steps: &'static [Step],
}

impl Recipe {
    /// Add-ons that must be present for this one to load.
    pub fn requires(&self) -> &'static [&'static str] {
        match self.name {
            ASI_LOADER => &[],
            MODLOADER => &[ASI_LOADER],
            _ => &INFRASTRUCTURE,
        }
    }
}

const fn whole(source: Source, destination: Destination) -> Step {
    Step {
        source,
        selection: Selection::All,
        layout: Layout::Preserve,
        destination,
    }
}

pub const RECIPES: &[Recipe] = &[
    Recipe {
        name: ASI_LOADER,
        description: "Silent's ASI Loader",
        steps: &[Step {
            source: Source::Url("https://silent.rockstarvision.com/uploads/silents_asi_loader_13.zip"),
            selection: Selection::Named {
                names: &["vorbisFile.dll", "vorbisHooked.dll"],
                prefixes: &["scripts/"],
            },
            layout: Layout::Preserve,
            destination: Destination::InstallRoot,
        }],
    },
    Recipe {
        name: MODLOADER,
        description: "Loads mods from the modloader folder",
        steps: &[whole(
            Source::Url("https://fs.xserv.pp.ua/files/modloader.zip"),
            Destination::InstallRoot,
        )],
    },
    Recipe {
        name: "SilentPatch",
        description: "Engine bug fixes",
        steps: &[Step {
            source: Source::LatestRelease {
                repo: "CookiePLMonster/SilentPatch",
                pick: AssetPick::Exact("SilentPatchSA.zip"),
            },
            selection: Selection::Extensions(&[".asi", ".ini"]),
            layout: Layout::Flatten,
            destination: Destination::AddonDir("SilentPatch"),
        }],
    },
    Recipe {
        name: "Widescreen Fixes",
        description: "Widescreen fix and frontend",
        steps: &[
            whole(
                Source::Url(
                    "https://github.com/ThirteenAG/WidescreenFixesPack/releases/download/gtasa/GTASA.WidescreenFix.zip",
                ),
                Destination::AddonDir("WidescreenFix"),
            ),
            whole(
                Source::Url(
                    "https://github.com/ThirteenAG/WidescreenFixesPack/releases/download/gtasa/GTASA.WidescreenFrontend.zip",
                ),
                Destination::AddonDir("WidescreenFrontend"),
            ),
        ],
    },
    Recipe {
        name: "SkyGFX",
        description: "PS2-style rendering",
        steps: &[whole(
            Source::LatestRelease {
                repo: "aap/skygfx",
                pick: AssetPick::Preferred {
                    contains: "sa",
                    suffix: ".zip",
                },
            },
            Destination::AddonDir("SkyGFX"),
        )],
    },
    Recipe {
        name: "Frontend Mods",
        description: "Menu and HUD tweaks",
        steps: &[whole(
            Source::Url("https://fs.xserv.pp.ua/files/Frontend%20Mods.zip"),
            Destination::AddonDir("FrontendMods"),
        )],
    },
    Recipe {
        name: "Framerate Vigilante (60fps fix)",
        description: "Fixes physics and timing above 30 fps",
        steps: &[whole(
            Source::Url("https://fs.xserv.pp.ua/files/Framerate%20Vigilante.zip"),
            Destination::AddonDir("FramerateVigilante"),
        )],
    },
    Recipe {
        name: "GInput",
        description: "Native gamepad support",
        steps: &[Step {
            source: Source::Url("https://silent.rockstarvision.com/uploads/GInputSA.zip"),
            selection: Selection::Excluding("GInputAPI (for modders)"),
            layout: Layout::Preserve,
            destination: Destination::AddonDir("GInput"),
        }],
    },
    Recipe {
        name: "Project 2DFX",
        description: "Distant light coronas",
        steps: &[whole(
            Source::TaggedRelease {
                repo: "ThirteenAG/III.VC.SA.IV.Project2DFX",
                tag: "gtasa",
                pick: AssetPick::Preferred {
                    contains: "gtasa",
                    suffix: ".zip",
                },
            },
            Destination::AddonDir("Project2DFX"),
        )],
    },
];

pub fn recipe_for(name: &str) -> Option<&'static Recipe> {
    RECIPES.iter().find(|recipe| recipe.name == name)
}

pub fn addon_names() -> impl Iterator<Item = &'static str> {
    RECIPES.iter().map(|recipe| recipe.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_recipe_is_reachable_by_name() {
        assert_eq!(RECIPES.len(), 9);
        for name in addon_names() {
            assert_eq!(recipe_for(name).map(|r| r.name), Some(name));
        }
        assert!(recipe_for("Hot Coffee").is_none());
    }

    #[test]
    fn dependencies_point_at_infrastructure() {
        assert!(recipe_for(ASI_LOADER).unwrap().requires().is_empty());
        assert_eq!(recipe_for(MODLOADER).unwrap().requires(), &[ASI_LOADER]);
        assert_eq!(recipe_for("SkyGFX").unwrap().requires(), &INFRASTRUCTURE);
    }

    #[test]
    fn widescreen_urls_share_release_base() {
        let recipe = recipe_for("Widescreen Fixes").unwrap();
        for step in recipe.steps {
            match step.source {
                Source::Url(url) => assert!(url
                    .starts_with("https://github.com/ThirteenAG/WidescreenFixesPack/releases/download/gtasa/")),
                other => panic!("unexpected source {other:?}"),
            }
        }
    }

    #[test]
    fn preferred_pick_falls_back_to_any_zip() {
        let pick = AssetPick::Preferred {
            contains: "gtasa",
            suffix: ".zip",
        };
        assert_eq!(
            pick.pick(&["III.Project2DFX.zip", "GTASA.Project2DFX.zip"]),
            Some("GTASA.Project2DFX.zip")
        );
        assert_eq!(pick.pick(&["notes.txt", "bundle.zip"]), Some("bundle.zip"));
        assert_eq!(pick.pick(&["notes.txt"]), None);
        assert_eq!(
            AssetPick::Exact("SilentPatchSA.zip").pick(&["SilentPatchIII.zip"]),
            None
        );
    }
}
