//! `embedded-storage` NOR flash traits. Bytes map to half-words little-endian.

use embedded_hal::digital::InputPin;
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, MultiwriteNorFlash, NorFlash,
    NorFlashErrorKind, ReadNorFlash,
};

use super::{Nor, NorBus, NorChip, NorError};
use crate::Error;

/// Half-words moved per inner `write` call.
const CHUNK_WORDS: usize = 16;

/// The range checks only report alignment and bounds.
fn range_error(kind: NorFlashErrorKind) -> Error {
    match kind {
        NorFlashErrorKind::NotAligned => NorError::NotAligned.into(),
        _ => NorError::OutOfBounds.into(),
    }
}

impl<C: NorChip, B: NorBus, P: InputPin> ErrorType for Nor<C, B, P> {
    type Error = Error;
}

impl<C: NorChip, B: NorBus, P: InputPin> ReadNorFlash for Nor<C, B, P> {
    const READ_SIZE: usize = 2;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Error> {
        check_read(&*self, offset, bytes.len()).map_err(range_error)?;

        self.enter_read_mode();

        for (addr, pair) in (offset / 2..).zip(bytes.chunks_exact_mut(2)) {
            pair.copy_from_slice(&self.bus.read_half_word(addr).to_le_bytes());
        }

        Ok(())
    }

    fn capacity(&self) -> usize {
        C::CAPACITY as usize
    }
}

impl<C: NorChip, B: NorBus, P: InputPin> NorFlash for Nor<C, B, P> {
    const WRITE_SIZE: usize = 2;
    const ERASE_SIZE: usize = C::BLOCK_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Error> {
        check_erase(&*self, from, to).map_err(range_error)?;

        for block in (from..to).step_by(C::BLOCK_SIZE as usize) {
            self.erase_block(block)?;
        }

        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        // Check the whole span up front so nothing is programmed if it runs off the end.
        check_write(&*self, offset, bytes.len()).map_err(range_error)?;

        let mut words = [0_u16; CHUNK_WORDS];
        let mut offset = offset;

        for chunk in bytes.chunks(CHUNK_WORDS * 2) {
            let words = &mut words[..chunk.len() / 2];
            for (word, pair) in words.iter_mut().zip(chunk.chunks_exact(2)) {
                *word = u16::from_le_bytes([pair[0], pair[1]]);
            }

            Nor::write(self, offset, words)?;

            offset += chunk.len() as u32;
        }

        Ok(())
    }
}

// Programming only clears bits, so a half-word can be programmed again as long as the new
// value doesn't need any cleared bit set.
impl<C: NorChip, B: NorBus, P: InputPin> MultiwriteNorFlash for Nor<C, B, P> {}
