use crc::{Crc, CRC_32_ISO_HDLC};
use log::debug;

use super::Image;
use crate::Error;

/// Size of the CRC slot at the end of the image
pub const CRC_SIZE: u32 = 4;

/// The crc32 used by zip and zlib (polynomial 0xEDB88320 reflected, initial value 0xFFFFFFFF)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calculates the crc32 checksum for the given slice of `bytes`
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Computes the crc32 of everything but the trailing CRC slot and stores it little endian in
/// that slot
///
/// Must run after every other stage that modifies the image.
pub fn finalize_crc(image: &mut Image) -> Result<u32, Error> {
    image.require_len(CRC_SIZE)?;

    let slot = (image.len() - CRC_SIZE) as usize;
    let crc = crc32(&image.as_bytes()[..slot]);

    image.write_u32_at(slot, crc);

    debug!(
        "CRC32 {:#010x} over {:#x} bytes at {:#010x}",
        crc,
        slot,
        image.base_address()
    );

    Ok(crc)
}

/// Returns the `(stored, computed)` pair for an already finalized image
pub fn stored_crc(image: &Image) -> Result<(u32, u32), Error> {
    image.require_len(CRC_SIZE)?;

    let slot = (image.len() - CRC_SIZE) as usize;

    Ok((image.read_u32_at(slot), crc32(&image.as_bytes()[..slot])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_hex::assert_eq_hex;

    #[test]
    fn it_should_compute_the_zip_crc32() {
        assert_eq_hex!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq_hex!(crc32(&[]), 0);
    }

    #[test]
    fn it_should_store_the_crc_in_the_last_four_bytes() {
        let bytes: Vec<u8> = (0..0x100).map(|i| (i * 7) as u8).collect();
        let expected = crc32(&bytes[..0xfc]);
        let mut image = Image::new(0x8000, bytes).unwrap();

        assert_eq_hex!(finalize_crc(&mut image).unwrap(), expected);
        assert_eq!(&image.as_bytes()[0xfc..], &expected.to_le_bytes());

        let (stored, computed) = stored_crc(&image).unwrap();
        assert_eq_hex!(stored, computed);
    }

    #[test]
    fn it_should_ignore_the_previous_slot_contents() {
        let mut a = Image::new(0, vec![0x55; 0x40]).unwrap();
        let mut b = a.clone();
        b.bytes_mut()[0x3c..].copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(finalize_crc(&mut a).unwrap(), finalize_crc(&mut b).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn it_should_handle_a_crc_only_image() {
        let mut image = Image::new(0, vec![0xAA; 4]).unwrap();

        assert_eq!(finalize_crc(&mut image).unwrap(), 0);
        assert_eq!(image.as_bytes(), &[0u8; 4]);
    }

    #[test]
    fn it_should_reject_images_without_room_for_a_crc() {
        let mut image = Image::new(0, vec![0xAA; 3]).unwrap();

        assert!(matches!(finalize_crc(&mut image), Err(Error::TooSmall(3, 4))));
    }
}
