//! Immutable tool configuration
//!
//! Read once from TOML and handed to the pipeline by reference.

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::image::IdentityPatch;
use crate::legacy::{LegacyProfile, LegacyProfiles, PaddedLayout, DEFAULT_COPY_SIZE};
use crate::legacy::{DEFAULT_ZERO_OFFSET, DEFAULT_ZERO_SIZE};
use crate::Error;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    legacy: Option<Vec<RawLegacyProfile>>,
    #[serde(default)]
    target: Vec<Target>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawLegacyProfile {
    base_address: u32,
    pad_start: Option<u32>,
    #[serde(default = "default_copy_size")]
    copy_size: u32,
    #[serde(default = "default_zero_offset")]
    zero_offset: u32,
    #[serde(default = "default_zero_size")]
    zero_size: u32,
}

fn default_copy_size() -> u32 {
    DEFAULT_COPY_SIZE
}

fn default_zero_offset() -> u32 {
    DEFAULT_ZERO_OFFSET
}

fn default_zero_size() -> u32 {
    DEFAULT_ZERO_SIZE
}

/// A board built from a firmware project, identified by its board and family id
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Target {
    /// Name of the firmware project, matched against the input file stem
    pub firmware: String,
    pub board_id: u16,
    pub family_id: Option<u16>,
}

impl Target {
    pub fn identity(&self) -> IdentityPatch {
        IdentityPatch {
            board_id: Some(self.board_id),
            family_id: self.family_id,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    legacy: LegacyProfiles,
    targets: Vec<Target>,
}

impl Config {
    pub fn new(legacy: LegacyProfiles, targets: Vec<Target>) -> Config {
        Config { legacy, targets }
    }

    /// Reads the configuration file at `path`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|err| Error::Config(path.to_path_buf(), err.to_string()))?;

        debug!("Reading configuration from {}", path.display());

        Config::from_toml(&content).map_err(|err| match err {
            Error::Config(_, msg) => Error::Config(path.to_path_buf(), msg),
            other => other,
        })
    }

    /// Parses a configuration from TOML source
    ///
    /// Leaving out the `legacy` table keeps the built-in legacy profiles, an empty list disables
    /// them.
    pub fn from_toml(content: &str) -> Result<Config, Error> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|err| Error::Config("<toml>".into(), err.to_string()))?;

        let legacy = match raw.legacy {
            Some(profiles) => LegacyProfiles::new(
                profiles
                    .into_iter()
                    .map(|raw| {
                        let padded = raw.pad_start.map(|start| PaddedLayout {
                            start,
                            copy_size: raw.copy_size,
                        });

                        LegacyProfile::with_zero_window(
                            raw.base_address,
                            raw.zero_offset,
                            raw.zero_size,
                            padded,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => LegacyProfiles::builtin(),
        };

        Ok(Config {
            legacy,
            targets: raw.target,
        })
    }

    pub fn legacy_profiles(&self) -> &LegacyProfiles {
        &self.legacy
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Returns every target built from the firmware project `firmware`
    pub fn targets_for<'a>(&'a self, firmware: &'a str) -> impl Iterator<Item = &'a Target> + 'a {
        self.targets
            .iter()
            .filter(move |target| target.firmware == firmware)
    }
}
