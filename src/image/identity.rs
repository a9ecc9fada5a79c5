use std::convert::TryInto;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use super::Image;
use crate::Error;

/// Offset of the word that holds the address of the identity record
pub const IDENTITY_POINTER_OFFSET: usize = 13 * 4;

/// Size of the `{ reserved: u16, family_id: u16, board_id: [u8; 4] }` record
pub const IDENTITY_RECORD_SIZE: u32 = 8;

const FAMILY_ID_OFFSET: usize = 2;
const BOARD_ID_OFFSET: usize = 4;

/// Typed access to the identity record the firmware points at from its header
///
/// Construction resolves the pointer and bounds checks the whole record, so the accessors can
/// never touch memory outside of the image.
pub struct IdentityBlock<'a> {
    image: &'a mut Image,
    address: u32,
    range: Range<usize>,
}

impl<'a> IdentityBlock<'a> {
    /// Follows the identity pointer of `image`
    pub fn locate(image: &'a mut Image) -> Result<IdentityBlock<'a>, Error> {
        image.require_len((IDENTITY_POINTER_OFFSET + 4) as u32)?;

        let address = image.read_u32_at(IDENTITY_POINTER_OFFSET);
        let range = image
            .offset_range(address, IDENTITY_RECORD_SIZE)
            .ok_or(Error::IdentityOffsetOutOfRange {
                pointer: address,
                start: image.base_address(),
                end: image.end_address(),
            })?;

        debug!(
            "Identity record at {:#010x} (offset {:#x})",
            address, range.start
        );

        Ok(IdentityBlock {
            image,
            address,
            range,
        })
    }

    /// The absolute address of the identity record
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn family_id(&self) -> u16 {
        LittleEndian::read_u16(&self.record()[FAMILY_ID_OFFSET..FAMILY_ID_OFFSET + 2])
    }

    /// The raw ASCII board id
    pub fn board_id(&self) -> [u8; 4] {
        let mut board_id = [0u8; 4];
        board_id.copy_from_slice(&self.record()[BOARD_ID_OFFSET..BOARD_ID_OFFSET + 4]);
        board_id
    }

    pub fn set_family_id(&mut self, family_id: u16) {
        LittleEndian::write_u16(
            &mut self.record_mut()[FAMILY_ID_OFFSET..FAMILY_ID_OFFSET + 2],
            family_id,
        );
    }

    /// Stores `board_id` as four uppercase hex digits
    pub fn set_board_id(&mut self, board_id: u16) {
        self.record_mut()[BOARD_ID_OFFSET..BOARD_ID_OFFSET + 4]
            .copy_from_slice(&board_id_ascii(board_id));
    }

    fn record(&self) -> &[u8] {
        &self.image.as_bytes()[self.range.clone()]
    }

    fn record_mut(&mut self) -> &mut [u8] {
        let range = self.range.clone();

        &mut self.image.bytes_mut()[range]
    }
}

/// Formats a board id the way host tooling expects to find it, e.g. `0x231` -> `b"0231"`
pub fn board_id_ascii(board_id: u16) -> [u8; 4] {
    let text = format!("{:04X}", board_id);

    // A u16 always formats to exactly four hex digits
    text.as_bytes().try_into().unwrap_or([b'0'; 4])
}

/// The identity values to embed in an image
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct IdentityPatch {
    pub board_id: Option<u16>,
    pub family_id: Option<u16>,
}

impl IdentityPatch {
    pub fn is_empty(&self) -> bool {
        self.board_id.is_none() && self.family_id.is_none()
    }

    /// Writes the supplied ids into `image`, returning the identity record address if anything
    /// was written
    pub fn apply(&self, image: &mut Image) -> Result<Option<u32>, Error> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut block = IdentityBlock::locate(image)?;

        if let Some(family_id) = self.family_id {
            info!("Setting family id {:#06x}", family_id);
            block.set_family_id(family_id);
        }

        if let Some(board_id) = self.board_id {
            info!("Setting board id {:04X}", board_id);
            block.set_board_id(board_id);
        }

        Ok(Some(block.address()))
    }
}
