use std::path::PathBuf;

use structopt::StructOpt;

use fwpost::image::ImageFormat;
use fwpost::legacy::LegacyMode;

/// Parses a hexadecimal number with or without a `0x` prefix
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid hex value {:?}: {}", s, err))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;

    if value > u32::from(u16::MAX) {
        return Err(format!("{:?} does not fit in 16 bits", s));
    }

    Ok(value as u16)
}

#[derive(StructOpt, Debug)]
pub struct LoadArgs {
    /// Format of the input image, derived from the file extension when omitted
    #[structopt(long = "format", possible_values = &["hex", "bin"])]
    pub format: Option<ImageFormat>,
    /// Load address of a binary input in hex, also appended to the output name
    #[structopt(long = "bin-offset", parse(try_from_str = parse_hex_u32))]
    pub bin_offset: Option<u32>,
    /// Fill holes between hex regions with 0xFF instead of rejecting the file
    #[structopt(long = "fill-gaps")]
    pub fill_gaps: bool,
}

#[derive(StructOpt, Debug)]
pub struct FinalizeOpts {
    /// Hex or bin file to read from
    pub input: PathBuf,
    /// Output base file name
    pub output: PathBuf,
    #[structopt(flatten)]
    pub load: LoadArgs,
    /// Board id of the target in hex
    #[structopt(long = "board-id", parse(try_from_str = parse_hex_u16))]
    pub board_id: Option<u16>,
    /// Family id of the target in hex
    #[structopt(long = "family-id", parse(try_from_str = parse_hex_u16))]
    pub family_id: Option<u16>,
    /// When to derive images for legacy bootloaders
    #[structopt(
        long = "legacy",
        default_value = "auto",
        possible_values = &["auto", "required", "disabled"]
    )]
    pub legacy: LegacyMode,
}

#[derive(StructOpt, Debug)]
pub struct VerifyOpts {
    /// The finalized image to check
    pub input: PathBuf,
    #[structopt(flatten)]
    pub load: LoadArgs,
}

#[derive(StructOpt, Debug)]
pub struct ReleaseOpts {
    /// Hex files of the projects to release, named after their firmware project
    #[structopt(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Number of images to finalize in parallel
    #[structopt(short = "j", long = "jobs", default_value = "4")]
    pub jobs: usize,
    /// When to derive images for legacy bootloaders
    #[structopt(
        long = "legacy",
        default_value = "auto",
        possible_values = &["auto", "required", "disabled"]
    )]
    pub legacy: LegacyMode,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Checksum, stamp and CRC an image and write it in every output format
    Finalize(FinalizeOpts),
    /// Check the vector checksum and CRC of a finalized image
    Verify(VerifyOpts),
    /// Finalize release builds once plain and once per configured target
    Release(ReleaseOpts),
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Post-build finalization for interface and bootloader images")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// Configuration file with legacy profiles and targets
    #[structopt(env = "FWPOST_CONFIG", short = "c", long = "config")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_parse_hex_values() {
        assert_eq!(parse_hex_u32("0x8000"), Ok(0x8000));
        assert_eq!(parse_hex_u32("8000"), Ok(0x8000));
        assert_eq!(parse_hex_u16("0231"), Ok(0x0231));
        assert!(parse_hex_u16("0x10000").is_err());
        assert!(parse_hex_u32("zz").is_err());
    }

    #[test]
    fn it_should_parse_a_finalize_command() {
        let opts = Opts::from_iter_safe(&[
            "fwpost",
            "finalize",
            "build/if.hex",
            "build/if_crc",
            "--board-id",
            "0x0231",
            "--family-id",
            "1",
        ])
        .unwrap();

        match opts.command {
            Command::Finalize(finalize) => {
                assert_eq!(finalize.board_id, Some(0x0231));
                assert_eq!(finalize.family_id, Some(0x0001));
                assert_eq!(finalize.legacy, LegacyMode::Auto);
                assert_eq!(finalize.load.format, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
