use log::debug;

use super::Image;
use crate::Error;

/// The number of vectors that are covered by the checksum
pub const VECTOR_COUNT: usize = 7;

/// The offset from the start of the image where the vector checksum is stored
pub const CHECKSUM_OFFSET: usize = 0x1C;

/// The size of the vector table including the checksum slot
pub const VECTOR_TABLE_SIZE: u32 = 0x20;

/// A view of the first eight words of an image
///
/// The ROM bootloaders of NXP Kinetis and LPC parts only consider an image valid when the first
/// eight words sum up to zero, so the eighth word holds the two's complement of the others.
pub struct VectorTable<'a> {
    image: &'a Image,
}

impl<'a> VectorTable<'a> {
    /// Borrows the vector table of `image`, which must be at least `VECTOR_TABLE_SIZE` long
    pub fn new(image: &'a Image) -> Result<VectorTable<'a>, Error> {
        image.require_len(VECTOR_TABLE_SIZE)?;

        Ok(VectorTable { image })
    }

    /// Returns the first `VECTOR_COUNT` vectors
    pub fn vectors(&self) -> [u32; VECTOR_COUNT] {
        let mut vectors = [0u32; VECTOR_COUNT];

        for (i, vector) in vectors.iter_mut().enumerate() {
            *vector = self.image.read_u32_at(i * 4);
        }

        vectors
    }

    /// The checksum that makes the vector table sum up to zero
    pub fn expected_checksum(&self) -> u32 {
        let sum = self
            .vectors()
            .iter()
            .fold(0u32, |sum, vector| sum.wrapping_add(*vector));

        (!sum).wrapping_add(1)
    }

    /// The value currently stored in the checksum slot
    pub fn checksum(&self) -> u32 {
        self.image.read_u32_at(CHECKSUM_OFFSET)
    }

    pub fn is_valid(&self) -> bool {
        self.checksum() == self.expected_checksum()
    }
}

/// Writes the vector table checksum into `image`, overwriting whatever the slot held
///
/// This is done for every image regardless of target family since it is harmless where the ROM
/// doesn't check it.
pub fn patch_checksum(image: &mut Image) -> Result<u32, Error> {
    let checksum = VectorTable::new(image)?.expected_checksum();

    image.write_u32_at(CHECKSUM_OFFSET, checksum);

    debug!("Vector table checksum {:#010x}", checksum);

    Ok(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_hex::assert_eq_hex;
    use hex_literal::hex;

    fn image_with_vectors(vectors: &[u32], len: usize) -> Image {
        let mut bytes = vec![0xFFu8; len];

        for (i, vector) in vectors.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&vector.to_le_bytes());
        }

        Image::new(0x8000, bytes).unwrap()
    }

    #[test]
    fn it_should_write_the_twos_complement_of_the_vectors() {
        let mut image = image_with_vectors(&[1, 2, 3, 4, 5, 6, 7], 0x100);
        let checksum = patch_checksum(&mut image).unwrap();

        assert_eq_hex!(checksum, 0u32.wrapping_sub(28));
        assert_eq!(&image.as_bytes()[0x1c..0x20], &hex!("E4 FF FF FF"));
    }

    #[test]
    fn it_should_make_the_table_sum_to_zero() {
        let mut image = image_with_vectors(
            &[
                0x2000_8000, 0x0000_80d5, 0x0000_8111, 0x0000_8113, 0x0000_8115, 0x0000_8117,
                0x0000_8119,
            ],
            0x40,
        );
        patch_checksum(&mut image).unwrap();

        let sum = (0..8)
            .map(|i| image.read_u32_at(i * 4))
            .fold(0u32, |sum, word| sum.wrapping_add(word));

        assert_eq!(sum, 0);
        assert!(VectorTable::new(&image).unwrap().is_valid());
    }

    #[test]
    fn it_should_leave_other_bytes_untouched() {
        let mut image = image_with_vectors(&[1, 2, 3, 4, 5, 6, 7], 0x40);
        let before = image.clone();
        patch_checksum(&mut image).unwrap();

        assert_eq!(&image.as_bytes()[..0x1c], &before.as_bytes()[..0x1c]);
        assert_eq!(&image.as_bytes()[0x20..], &before.as_bytes()[0x20..]);
    }

    #[test]
    fn it_should_reject_short_images() {
        let mut image = Image::new(0, vec![0; 0x1f]).unwrap();

        assert!(matches!(
            patch_checksum(&mut image),
            Err(Error::TooSmall(0x1f, 0x20))
        ));
    }
}
