//! The finalization pipeline
//!
//! `Loaded -> ChecksumPatched -> [IdentityPatched] -> CRCFinalized -> Emitted`, with a legacy
//! branch cloned off after identity patching and finalized independently.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::Config;
use crate::emit::{self, Artifacts};
use crate::image::{finalize_crc, patch_checksum, stored_crc, IdentityPatch, Image, LoadOptions};
use crate::image::VectorTable;
use crate::legacy::{self, LegacyMode, LegacyVariant};
use crate::Error;

/// Name of the C source that is shared by every image built into the same directory
pub const GENERIC_C_FILE_NAME: &str = "bootloader_image.c";

/// Per-run parameters of the pipeline
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Params {
    pub identity: IdentityPatch,
    pub legacy: LegacyMode,
}

/// The in-memory result of a finalization run
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Finalized {
    pub image: Image,
    /// The vector table checksum that was written
    pub checksum: u32,
    /// The CRC stored in the last four bytes of `image`
    pub crc: u32,
    /// Address of the identity record, if ids were written
    pub identity_address: Option<u32>,
    pub legacy: Option<LegacyVariant>,
}

/// Runs every in-memory stage on `image`
///
/// This is a pure function of its inputs, so independent images may be finalized in parallel.
pub fn finalize(mut image: Image, params: &Params, config: &Config) -> Result<Finalized, Error> {
    let checksum = patch_checksum(&mut image)?;
    let identity_address = params.identity.apply(&mut image)?;

    let legacy = match params.legacy {
        LegacyMode::Disabled => None,
        LegacyMode::Required => Some(legacy::derive(&image, config.legacy_profiles())?),
        LegacyMode::Auto => match config.legacy_profiles().find(image.base_address()) {
            Some(profile) => Some(legacy::derive_with(&image, profile)?),
            None => {
                debug!(
                    "No legacy profile for {:#010x}, skipping legacy image",
                    image.base_address()
                );
                None
            }
        },
    };

    let crc = finalize_crc(&mut image)?;

    info!(
        "Finalized {:#x} bytes at {:#010x}, CRC32 {:#010x}",
        image.len(),
        image.base_address(),
        crc
    );

    Ok(Finalized {
        image,
        checksum,
        crc,
        identity_address,
        legacy,
    })
}

/// Appends `suffix` to the file name of `base` without touching its extension
fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// The file names written for one output base
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutputPaths {
    pub hex: PathBuf,
    pub bin: PathBuf,
    pub txt: PathBuf,
    pub c: PathBuf,
    pub generic_c: PathBuf,
    pub legacy_bin: PathBuf,
    pub legacy_padded_bin: PathBuf,
    pub legacy_txt: PathBuf,
}

impl OutputPaths {
    /// Derives the names as `<output>[-<board_id>][-<family_id>][-<bin_offset>].<ext>`
    pub fn new(output: &Path, identity: &IdentityPatch, bin_offset: Option<u32>) -> OutputPaths {
        let mut base = output.to_path_buf();

        let ids = [identity.board_id, identity.family_id];
        let parts = ids
            .iter()
            .map(|id| id.map(u32::from))
            .chain(std::iter::once(bin_offset));

        for value in parts.flatten() {
            base = suffixed(&base, &format!("-{:#x}", value));
        }

        let generic_c = match output.parent() {
            Some(dir) => dir.join(GENERIC_C_FILE_NAME),
            None => PathBuf::from(GENERIC_C_FILE_NAME),
        };

        OutputPaths {
            hex: suffixed(&base, ".hex"),
            bin: suffixed(&base, ".bin"),
            txt: suffixed(&base, ".txt"),
            c: suffixed(&base, ".c"),
            generic_c,
            legacy_bin: suffixed(&base, "_legacy_0x8000.bin"),
            legacy_padded_bin: suffixed(&base, "_legacy_0x5000.bin"),
            legacy_txt: suffixed(&base, "_legacy.txt"),
        }
    }
}

/// Serializes a finalized image into the files named by `paths`
pub fn render(finalized: &Finalized, paths: &OutputPaths) -> Result<Artifacts, Error> {
    let mut artifacts = Artifacts::new();
    let c_source = emit::to_c_array(&finalized.image);

    artifacts.push(&paths.hex, emit::to_hex(&finalized.image)?);
    artifacts.push(&paths.bin, emit::to_bin(&finalized.image));
    artifacts.push(&paths.txt, emit::crc_text(finalized.crc));
    artifacts.push(&paths.c, c_source.clone());
    artifacts.push(&paths.generic_c, c_source);

    if let Some(legacy) = &finalized.legacy {
        artifacts.push(&paths.legacy_bin, emit::to_bin(&legacy.image));
        artifacts.push(&paths.legacy_txt, emit::crc_text(legacy.crc));

        if let Some(padded) = &legacy.padded {
            artifacts.push(&paths.legacy_padded_bin, emit::to_bin(padded));
        }
    }

    Ok(artifacts)
}

/// Everything needed to finalize one input file
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub load: LoadOptions,
    pub params: Params,
}

/// What a successful run produced
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Summary {
    pub base_address: u32,
    pub length: u32,
    pub crc: u32,
    pub legacy_crc: Option<u32>,
    pub files: Vec<PathBuf>,
}

impl Job {
    /// Loads, finalizes and writes the image, nothing is written if any stage fails
    pub fn run(&self, config: &Config) -> Result<Summary, Error> {
        let image = Image::load(&self.input, &self.load)?;
        let finalized = finalize(image, &self.params, config)?;
        let paths = OutputPaths::new(&self.output, &self.params.identity, self.load.bin_offset);
        let artifacts = render(&finalized, &paths)?;

        artifacts.persist()?;

        Ok(Summary {
            base_address: finalized.image.base_address(),
            length: finalized.image.len(),
            crc: finalized.crc,
            legacy_crc: finalized.legacy.as_ref().map(|legacy| legacy.crc),
            files: artifacts.paths().map(Path::to_path_buf).collect(),
        })
    }
}

/// Integrity report for an existing image
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Verification {
    pub stored_checksum: u32,
    pub expected_checksum: u32,
    pub stored_crc: u32,
    pub computed_crc: u32,
}

impl Verification {
    pub fn checksum_ok(&self) -> bool {
        self.stored_checksum == self.expected_checksum
    }

    pub fn crc_ok(&self) -> bool {
        self.stored_crc == self.computed_crc
    }

    pub fn is_valid(&self) -> bool {
        self.checksum_ok() && self.crc_ok()
    }
}

/// Checks the vector table checksum and trailing CRC of an already finalized image
pub fn verify(image: &Image) -> Result<Verification, Error> {
    let table = VectorTable::new(image)?;
    let (stored_crc, computed_crc) = stored_crc(image)?;

    Ok(Verification {
        stored_checksum: table.checksum(),
        expected_checksum: table.expected_checksum(),
        stored_crc,
        computed_crc,
    })
}
