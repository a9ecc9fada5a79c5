//! Image variants for bootloaders that predate the current flash layout
//!
//! Older bootloaders expect the interface firmware at a lower flash address and don't know about
//! the words that follow the vector checksum, so for every known base address a profile
//! describes how to derive a compatible image from the checksummed primary image.

use std::str::FromStr;

use log::{debug, info};

use crate::image::{finalize_crc, Image};
use crate::Error;

/// Offset of the window that is cleared in legacy images
pub const DEFAULT_ZERO_OFFSET: u32 = 7 * 4;

/// Size of the window that is cleared in legacy images
pub const DEFAULT_ZERO_SIZE: u32 = 4 * 4;

/// Number of header bytes duplicated at the start of a padded image
pub const DEFAULT_COPY_SIZE: u32 = 0x40;

const PADDING_BYTE: u8 = 0xFF;

/// Whether legacy variants should be generated
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LegacyMode {
    /// Only for base addresses that have a profile
    Auto,
    /// Always, failing for base addresses without a profile
    Required,
    /// Never
    Disabled,
}

impl Default for LegacyMode {
    fn default() -> LegacyMode {
        LegacyMode::Auto
    }
}

impl FromStr for LegacyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(LegacyMode::Auto),
            "required" => Ok(LegacyMode::Required),
            "disabled" => Ok(LegacyMode::Disabled),
            other => Err(format!(
                "unknown legacy mode {:?}, expected auto, required or disabled",
                other
            )),
        }
    }
}

/// Layout of the padded image for devices that start even lower in flash
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PaddedLayout {
    /// The address the padded image starts at
    pub start: u32,
    /// Number of leading bytes of the legacy image copied to `start`
    pub copy_size: u32,
}

/// Describes how the legacy variant of an image at `base_address` is derived
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LegacyProfile {
    base_address: u32,
    zero_offset: u32,
    zero_size: u32,
    padded: Option<PaddedLayout>,
}

impl LegacyProfile {
    /// Creates a profile that clears the default window
    pub fn new(base_address: u32, padded: Option<PaddedLayout>) -> Result<LegacyProfile, Error> {
        LegacyProfile::with_zero_window(
            base_address,
            DEFAULT_ZERO_OFFSET,
            DEFAULT_ZERO_SIZE,
            padded,
        )
    }

    pub fn with_zero_window(
        base_address: u32,
        zero_offset: u32,
        zero_size: u32,
        padded: Option<PaddedLayout>,
    ) -> Result<LegacyProfile, Error> {
        if zero_offset.checked_add(zero_size).is_none() {
            return Err(Error::InvalidLegacyProfile(
                base_address,
                "zero window overflows",
            ));
        }

        if let Some(layout) = padded {
            if layout.start >= base_address {
                return Err(Error::InvalidLegacyProfile(
                    base_address,
                    "padded image must start below the base address",
                ));
            }

            if base_address - layout.start < layout.copy_size {
                return Err(Error::InvalidLegacyProfile(
                    base_address,
                    "copied header does not fit below the base address",
                ));
            }
        }

        Ok(LegacyProfile {
            base_address,
            zero_offset,
            zero_size,
            padded,
        })
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn padded(&self) -> Option<PaddedLayout> {
        self.padded
    }

    /// The cleared window as an offset range into the image
    pub fn zero_window(&self) -> std::ops::Range<u32> {
        self.zero_offset..self.zero_offset + self.zero_size
    }
}

/// The set of base addresses legacy variants are known for
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LegacyProfiles {
    profiles: Vec<LegacyProfile>,
}

impl LegacyProfiles {
    pub fn new(profiles: Vec<LegacyProfile>) -> LegacyProfiles {
        LegacyProfiles { profiles }
    }

    /// The profiles of the current interface bootloaders
    ///
    /// Images are padded down by 0x3000, except for the ST-Link layout which is padded by 0x8000.
    pub fn builtin() -> LegacyProfiles {
        let padded = |base_address: u32, delta: u32| LegacyProfile {
            base_address,
            zero_offset: DEFAULT_ZERO_OFFSET,
            zero_size: DEFAULT_ZERO_SIZE,
            padded: Some(PaddedLayout {
                start: base_address - delta,
                copy_size: DEFAULT_COPY_SIZE,
            }),
        };

        LegacyProfiles::new(vec![
            padded(0x0000_8000, 0x3000),
            padded(0x0001_0000, 0x3000),
            padded(0x0008_8000, 0x3000),
            padded(0x0800_C000, 0x8000),
        ])
    }

    /// Returns the profile for `base_address`, if there is one
    pub fn find(&self, base_address: u32) -> Option<&LegacyProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.base_address == base_address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LegacyProfile> {
        self.profiles.iter()
    }
}

impl Default for LegacyProfiles {
    fn default() -> LegacyProfiles {
        LegacyProfiles::builtin()
    }
}

/// The images derived for legacy bootloaders
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LegacyVariant {
    /// Same address range as the primary image, with the window cleared and its own CRC
    pub image: Image,
    /// The CRC of `image`
    pub crc: u32,
    /// The padded copy of `image` that starts lower in flash
    pub padded: Option<Image>,
}

/// Derives the legacy variant of a checksummed, not yet CRC finalized image
pub fn derive(image: &Image, profiles: &LegacyProfiles) -> Result<LegacyVariant, Error> {
    let profile = profiles
        .find(image.base_address())
        .ok_or_else(|| Error::UnsupportedBaseAddress(image.base_address()))?;

    derive_with(image, profile)
}

/// Derives the legacy variant of `image` using `profile`
pub fn derive_with(image: &Image, profile: &LegacyProfile) -> Result<LegacyVariant, Error> {
    if profile.base_address != image.base_address() {
        return Err(Error::UnsupportedBaseAddress(image.base_address()));
    }

    let window = profile.zero_window();
    image.require_len(window.end)?;

    let mut legacy = image.clone();
    for byte in &mut legacy.bytes_mut()[window.start as usize..window.end as usize] {
        *byte = 0;
    }

    debug!(
        "Cleared legacy window {:#010x}..{:#010x}",
        image.base_address() + window.start,
        image.base_address() + window.end
    );

    let crc = finalize_crc(&mut legacy)?;

    info!(
        "Legacy image at {:#010x}, CRC32 {:#010x}",
        legacy.base_address(),
        crc
    );

    let padded = match profile.padded {
        Some(layout) => Some(pad_image(&legacy, &layout)?),
        None => None,
    };

    Ok(LegacyVariant {
        image: legacy,
        crc,
        padded,
    })
}

/// Creates an image starting at `layout.start` for devices that boot from that address
///
/// The first `layout.copy_size` bytes of `image` are duplicated at the new start, the space up to
/// the original base address is filled with 0xFF and `image` follows unchanged.
pub fn pad_image(image: &Image, layout: &PaddedLayout) -> Result<Image, Error> {
    // Guaranteed by LegacyProfile::with_zero_window
    assert!(
        layout.start < image.base_address(),
        "padded image start {:#010x} must be below {:#010x}",
        layout.start,
        image.base_address()
    );

    let gap = (image.base_address() - layout.start) as usize;
    let copy_size = layout.copy_size as usize;

    assert!(copy_size <= gap, "copied header larger than the padding gap");

    image.require_len(layout.copy_size)?;

    let mut bytes = Vec::with_capacity(gap + image.len() as usize);
    bytes.extend_from_slice(&image.as_bytes()[..copy_size]);
    bytes.resize(gap, PADDING_BYTE);
    bytes.extend_from_slice(image.as_bytes());

    debug!(
        "Padded image at {:#010x}, {:#x} bytes",
        layout.start,
        bytes.len()
    );

    Image::new(layout.start, bytes)
}
