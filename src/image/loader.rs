use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use ihex::Record;
use log::{debug, trace};

use super::{Image, StartAddress};
use crate::Error;

/// The padding value used when the loader is explicitly asked to fill holes in a hex file
pub const PADDING_BYTE: u8 = 0xFF;

/// The on-disk format of an input image
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageFormat {
    /// Intel HEX records
    Hex,
    /// Raw binary, loaded at a user supplied offset
    Bin,
}

impl ImageFormat {
    /// Guesses the format from the file extension, anything other than `.bin` is treated as hex
    pub fn from_path<P: AsRef<Path>>(path: P) -> ImageFormat {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("bin") => ImageFormat::Bin,
            _ => ImageFormat::Hex,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" | "ihex" => Ok(ImageFormat::Hex),
            "bin" | "binary" => Ok(ImageFormat::Bin),
            other => Err(format!("unknown image format {:?}, expected hex or bin", other)),
        }
    }
}

/// Options that control how an input artifact is turned into an `Image`
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct LoadOptions {
    /// The declared format, or `None` to derive it from the file extension
    pub format: Option<ImageFormat>,
    /// Load address of a raw binary
    pub bin_offset: Option<u32>,
    /// Fill holes between hex regions with `PADDING_BYTE` instead of failing
    pub fill_gaps: bool,
}

impl Image {
    /// Reads the image at `path` according to `options`
    pub fn load<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Image, Error> {
        let path = path.as_ref();
        let format = options
            .format
            .unwrap_or_else(|| ImageFormat::from_path(path));

        debug!("Loading {} as {:?}", path.display(), format);

        match format {
            ImageFormat::Hex => {
                let bytes =
                    fs::read(path).map_err(|err| Error::InputError(path.to_path_buf(), err))?;
                let content = String::from_utf8(bytes)
                    .map_err(|err| Error::HexEncoding(path.to_path_buf(), err))?;

                Image::from_hex_str(&content, options.fill_gaps)
            }
            ImageFormat::Bin => {
                let bytes =
                    fs::read(path).map_err(|err| Error::InputError(path.to_path_buf(), err))?;

                Image::from_bin(bytes, options.bin_offset.unwrap_or(0))
            }
        }
    }

    /// Creates an image from a raw binary that is located at `offset`
    pub fn from_bin(bytes: Vec<u8>, offset: u32) -> Result<Image, Error> {
        Image::new(offset, bytes)
    }

    /// Parses Intel HEX records into an image
    ///
    /// The defined addresses must form exactly one contiguous run unless `fill_gaps` is set, in
    /// which case every hole between the lowest and highest address is filled with
    /// `PADDING_BYTE`.
    pub fn from_hex_str(content: &str, fill_gaps: bool) -> Result<Image, Error> {
        let (memory, start_address) = read_hex_records(content)?;
        let regions = contiguous_regions(&memory);

        trace!("Hex file defines regions {:#x?}", regions);

        let (start, end) = match (regions.first(), regions.last()) {
            (Some(&(start, _)), Some(&(_, end))) => (start, end),
            _ => return Err(Error::EmptyImage),
        };

        if regions.len() != 1 && !fill_gaps {
            return Err(Error::MultiRegion(regions.len()));
        }

        let size = (end - start) as usize + 1;
        let mut bytes = vec![PADDING_BYTE; size];

        for (&address, &value) in &memory {
            bytes[(address - start) as usize] = value;
        }

        debug!(
            "Loaded {} bytes at {:#010x} ({} region(s))",
            size,
            start,
            regions.len()
        );

        Ok(Image::new(start, bytes)?.with_start_address(start_address))
    }
}

/// Walks the records of a hex file and returns the defined bytes keyed by absolute address
fn read_hex_records(content: &str) -> Result<(BTreeMap<u32, u8>, Option<StartAddress>), Error> {
    let mut memory = BTreeMap::new();
    let mut upper: u32 = 0;
    let mut start_address = None;

    for record in ihex::Reader::new(content) {
        match record? {
            Record::Data { offset, value } => {
                let record_base = upper
                    .checked_add(u32::from(offset))
                    .ok_or(Error::AddressOverflow(upper, value.len()))?;

                for (i, byte) in value.iter().enumerate() {
                    let address = record_base
                        .checked_add(i as u32)
                        .ok_or(Error::AddressOverflow(record_base, value.len()))?;

                    if memory.insert(address, *byte).is_some() {
                        return Err(Error::OverlappingData(address));
                    }
                }
            }
            Record::ExtendedSegmentAddress(segment) => upper = u32::from(segment) << 4,
            Record::ExtendedLinearAddress(linear) => upper = u32::from(linear) << 16,
            Record::StartSegmentAddress { cs, ip } => {
                start_address = Some(StartAddress::Segment { cs, ip })
            }
            Record::StartLinearAddress(address) => {
                start_address = Some(StartAddress::Linear(address))
            }
            Record::EndOfFile => break,
        }
    }

    Ok((memory, start_address))
}

/// Groups the sorted addresses into maximal runs of consecutive addresses, each returned as an
/// inclusive `(start, end)` pair
fn contiguous_regions(memory: &BTreeMap<u32, u8>) -> Vec<(u32, u32)> {
    let mut regions: Vec<(u32, u32)> = Vec::new();

    for &address in memory.keys() {
        match regions.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(address) => *end = address,
            _ => regions.push((address, address)),
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn data_record(offset: u16, value: Vec<u8>) -> Record {
        Record::Data { offset, value }
    }

    fn to_hex(records: &[Record]) -> String {
        ihex::create_object_file_representation(records).unwrap()
    }

    #[test]
    fn it_should_load_a_single_region() {
        let hex = to_hex(&[
            data_record(0x8000, hex!("00 01 02 03").to_vec()),
            data_record(0x8004, hex!("04 05 06 07").to_vec()),
            Record::EndOfFile,
        ]);
        let image = Image::from_hex_str(&hex, false).unwrap();

        assert_eq!(image.base_address(), 0x8000);
        assert_eq!(image.len(), 8);
        assert_eq!(image.as_bytes(), &hex!("00 01 02 03 04 05 06 07"));
        assert_eq!(image.start_address(), None);
    }

    #[test]
    fn it_should_apply_extended_linear_addresses() {
        let hex = to_hex(&[
            Record::ExtendedLinearAddress(0x0800),
            data_record(0xc000, vec![0xaa; 16]),
            Record::StartLinearAddress(0x0800_c101),
            Record::EndOfFile,
        ]);
        let image = Image::from_hex_str(&hex, false).unwrap();

        assert_eq!(image.base_address(), 0x0800_c000);
        assert_eq!(image.len(), 16);
        assert_eq!(image.start_address(), Some(StartAddress::Linear(0x0800_c101)));
    }

    #[test]
    fn it_should_apply_extended_segment_addresses() {
        let hex = to_hex(&[
            Record::ExtendedSegmentAddress(0x1000),
            data_record(0x0010, vec![0x11; 4]),
            Record::EndOfFile,
        ]);
        let image = Image::from_hex_str(&hex, false).unwrap();

        assert_eq!(image.base_address(), 0x10010);
    }

    #[test]
    fn it_should_reject_multiple_regions() {
        let hex = to_hex(&[
            data_record(0x0000, vec![0x00; 0x80]),
            data_record(0x0080, vec![0x00; 0x80]),
            data_record(0x1000, vec![0x00; 0x80]),
            data_record(0x1080, vec![0x00; 0x80]),
            Record::EndOfFile,
        ]);

        assert!(matches!(
            Image::from_hex_str(&hex, false),
            Err(Error::MultiRegion(2))
        ));
    }

    #[test]
    fn it_should_fill_gaps_when_asked_to() {
        let hex = to_hex(&[
            data_record(0x0000, vec![0x00; 4]),
            data_record(0x0008, vec![0x11; 4]),
            Record::EndOfFile,
        ]);
        let image = Image::from_hex_str(&hex, true).unwrap();

        assert_eq!(
            image.as_bytes(),
            &hex!("00 00 00 00 FF FF FF FF 11 11 11 11")
        );
    }

    #[test]
    fn it_should_reject_overlapping_records() {
        let hex = to_hex(&[
            data_record(0x0000, vec![0x00; 4]),
            data_record(0x0002, vec![0x11; 4]),
            Record::EndOfFile,
        ]);

        assert!(matches!(
            Image::from_hex_str(&hex, false),
            Err(Error::OverlappingData(2))
        ));
    }

    #[test]
    fn it_should_reject_hex_without_data() {
        let hex = to_hex(&[Record::EndOfFile]);

        assert!(matches!(
            Image::from_hex_str(&hex, false),
            Err(Error::EmptyImage)
        ));
    }

    #[test]
    fn it_should_reject_malformed_records() {
        assert!(matches!(
            Image::from_hex_str(":10000000ZZ\n", false),
            Err(Error::HexParse(_))
        ));
    }

    #[test]
    fn it_should_load_binaries_at_an_offset() {
        let image = Image::from_bin(vec![1, 2, 3, 4], 0x5000).unwrap();

        assert_eq!(image.base_address(), 0x5000);
        assert_eq!(image.len(), 4);
        assert!(matches!(Image::from_bin(vec![], 0), Err(Error::EmptyImage)));
    }

    #[test]
    fn it_should_guess_the_format_from_the_extension() {
        assert_eq!(ImageFormat::from_path("a/b/image.BIN"), ImageFormat::Bin);
        assert_eq!(ImageFormat::from_path("image.hex"), ImageFormat::Hex);
        assert_eq!(ImageFormat::from_path("image"), ImageFormat::Hex);
        assert_eq!("bin".parse::<ImageFormat>(), Ok(ImageFormat::Bin));
        assert!("elf".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn it_should_report_binary_data_in_hex_files_as_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.hex");
        fs::write(&path, hex!("3a 10 ff fe 00")).unwrap();

        assert!(matches!(
            Image::load(&path, &LoadOptions::default()),
            Err(Error::HexEncoding(ref p, _)) if *p == path
        ));
    }

    #[test]
    fn it_should_report_missing_inputs_as_input_errors() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            Image::load(dir.path().join("missing.hex"), &LoadOptions::default()),
            Err(Error::InputError(_, _))
        ));
    }
}
