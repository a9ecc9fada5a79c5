//! Post-build finalization of interface and bootloader firmware images
//!
//! A compiled image is loaded from Intel HEX or raw binary, gets its vector table checksum
//! patched, optionally has board and family ids stamped in, and finally receives a CRC32 over
//! the whole image that the bootloader checks before booting it. Images at addresses used by
//! older bootloaders additionally get a legacy variant.
//!
//! ```no_run
//! use fwpost::image::{Image, LoadOptions};
//! use fwpost::pipeline::{finalize, Params};
//! use fwpost::Config;
//!
//! let image = Image::load("build/k20dx_if.hex", &LoadOptions::default())?;
//! let finalized = finalize(image, &Params::default(), &Config::default())?;
//!
//! println!("CRC32 {:#010x}", finalized.crc);
//!
//! # Ok::<(), fwpost::Error>(())
//! ```

pub mod config;
pub mod emit;
mod error;
pub mod image;
pub mod legacy;
pub mod pipeline;
pub mod release;

pub use config::{Config, Target};
pub use error::Error;
pub use image::{IdentityPatch, Image};
