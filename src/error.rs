use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {}", _0)]
    Io(#[from] io::Error),

    #[error("Could not read {}: {}", _0.display(), _1)]
    InputError(PathBuf, io::Error),

    #[error("The input image does not contain any data")]
    EmptyImage,

    #[error("{} bytes at {:#010x} extend past the end of the address space", _1, _0)]
    AddressOverflow(u32, usize),

    #[error("Only 1 region allowed in hex file, {} found", _0)]
    MultiRegion(usize),

    #[error("Address {:#010x} is defined more than once in the hex file", _0)]
    OverlappingData(u32),

    #[error("{} is not a text hex file: {}", _0.display(), _1)]
    HexEncoding(PathBuf, std::string::FromUtf8Error),

    #[error("Hex parse error: {}", _0)]
    HexParse(#[from] ihex::ReaderError),

    #[error("Hex write error: {}", _0)]
    HexWrite(#[from] ihex::WriterError),

    #[error("Image of {} bytes is too small, at least {} bytes are required", _0, _1)]
    TooSmall(u32, u32),

    #[error(
        "Identity pointer {:#010x} is outside of the image range {:#010x}..{:#010x}",
        pointer,
        start,
        end
    )]
    IdentityOffsetOutOfRange { pointer: u32, start: u32, end: u64 },

    #[error("No legacy profile exists for base address {:#010x}", _0)]
    UnsupportedBaseAddress(u32),

    #[error("Invalid legacy profile for base address {:#010x}: {}", _0, _1)]
    InvalidLegacyProfile(u32, &'static str),

    #[error("Configuration error in {}: {}", _0.display(), _1)]
    Config(PathBuf, String),
}
