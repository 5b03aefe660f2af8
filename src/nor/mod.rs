//! Support for parallel NOR flash using the AMD/Spansion command set on a 16-bit bus, such as
//! Micron's M29W256GL. The chip is driven through the [`NorBus`] trait: on hardware, this is
//! [`MemoryMappedBus`] over an FMC bank configured by the [`fmc`](crate::fmc) module.
//!
//! Offsets passed to this module's operations are in bytes, relative to the start of the chip,
//! and must be even. Data is in half-words, matching the bus width.
//!
//! Program and erase operations wait for completion using the chip's ready/busy output if one
//! is provided, then poll the toggle bit (DQ6) and error bit (DQ5). All waits are iteration-bounded
//! busy loops; there's no sleep or yield.

use core::marker::PhantomData;

use embedded_hal::digital::{ErrorType, InputPin};

use crate::{Result, util::bounded_loop};

mod commands;
mod storage;

#[cfg(test)]
mod tests;

use commands::*;

/// Max status checks for a single half-word program. Also used for buffered programs.
pub const PROGRAM_TIMEOUT: u32 = 0x0000_4400;
/// Max status checks for a block erase.
pub const BLOCK_ERASE_TIMEOUT: u32 = 0x00a0_0000;
/// Max status checks for a chip erase.
pub const CHIP_ERASE_TIMEOUT: u32 = 0x3000_0000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NorError {
    /// An offset or length wasn't a multiple of the access size (or erase block, for erases).
    NotAligned,
    /// The operation would have run past the end of the chip.
    OutOfBounds,
    /// The chip was still busy when the iteration budget ran out.
    Timeout,
    /// The chip reported that a program or erase failed (DQ5 set, DQ6 still toggling). This is
    /// usually a write to protected block, or programming a `0` bit back to `1`.
    DeviceFailure,
    /// A buffered program was passed more half-words than the chip's write buffer holds.
    BufferTooLarge,
    /// A buffered program would have crossed a write buffer page.
    CrossesBufferPage,
    /// The chip didn't return a valid CFI query table.
    CfiNotSupported,
    /// Reading the ready/busy pin failed.
    ReadyBusyPin,
}

/// Half-word access to a NOR chip. Addresses are in half-words, from the start of the chip.
pub trait NorBus {
    fn read_half_word(&mut self, word_addr: u32) -> u16;

    fn write_half_word(&mut self, word_addr: u32, value: u16);
}

/// A NOR chip mapped into the address space, eg by an FMC NOR/SRAM bank.
pub struct MemoryMappedBus {
    base: *mut u16,
}

impl MemoryMappedBus {
    /// Create a bus over a chip whose first byte is at `base_addr`.
    ///
    /// # Safety
    /// `base_addr` must be the start of a mapped 16-bit memory region at least as large as the
    /// chip, and nothing else may access that region while this bus exists. On cores with a
    /// data cache (eg H7), the region must be configured as device memory using the MPU.
    pub const unsafe fn new(base_addr: u32) -> Self {
        Self {
            base: base_addr as usize as *mut u16,
        }
    }

    /// The address of the chip's first byte.
    pub fn base_addr(&self) -> u32 {
        self.base as usize as u32
    }
}

impl NorBus for MemoryMappedBus {
    fn read_half_word(&mut self, word_addr: u32) -> u16 {
        unsafe { core::ptr::read_volatile(self.base.add(word_addr as usize)) }
    }

    fn write_half_word(&mut self, word_addr: u32, value: u16) {
        unsafe { core::ptr::write_volatile(self.base.add(word_addr as usize), value) }
        // Make sure command cycles reach the chip before we start polling it.
        #[cfg(fmc)]
        cortex_m::asm::dsb();
    }
}

/// Geometry of a specific NOR chip. Erase blocks are assumed to be uniform.
pub trait NorChip {
    /// Total size, in bytes.
    const CAPACITY: u32;
    /// Erase block size, in bytes.
    const BLOCK_SIZE: u32;
    /// Max half-words in one buffered program. Buffered programs must also stay within a page of
    /// this size.
    const WRITE_BUFFER_WORDS: u32;
}

#[derive(Copy, Clone, Debug, Default)]
/// Micron M29W256GL: 256Mbit, 256 uniform 128KiB blocks.
pub struct M29w256gl;

impl NorChip for M29w256gl {
    const CAPACITY: u32 = 32 * 1024 * 1024;
    const BLOCK_SIZE: u32 = 128 * 1024;
    const WRITE_BUFFER_WORDS: u32 = 32;
}

/// Stands in for the ready/busy pin when the chip's ready/busy output isn't connected. Completion
/// is then detected by status polling alone. This type can't be constructed.
pub enum NoReadyBusy {}

impl ErrorType for NoReadyBusy {
    type Error = core::convert::Infallible;
}

impl InputPin for NoReadyBusy {
    fn is_high(&mut self) -> core::result::Result<bool, Self::Error> {
        match *self {}
    }

    fn is_low(&mut self) -> core::result::Result<bool, Self::Error> {
        match *self {}
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Codes read in autoselect mode.
pub struct NorId {
    pub manufacturer_code: u16,
    pub device_code_1: u16,
    pub device_code_2: u16,
    pub device_code_3: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Fields read from the chip's Common Flash Interface query table.
pub struct NorCfi {
    /// Primary vendor command set. `0x0002` is the AMD/Spansion set this module implements.
    pub command_set: u16,
    /// Size, in bytes.
    pub device_size: u32,
    /// Write buffer size, in bytes. 1 if the chip has no write buffer.
    pub write_buffer_size: u32,
    /// Number of erase block regions.
    pub erase_regions: u8,
    /// Number of blocks in the first erase region.
    pub region_1_blocks: u32,
    /// Block size in the first erase region, in bytes.
    pub region_1_block_size: u32,
}

/// Represents a NOR flash chip. `C` describes its geometry, `B` is how it's accessed, and `P`
/// is its ready/busy output, which is low while the chip is busy.
pub struct Nor<C, B, P = NoReadyBusy> {
    bus: B,
    ready_busy: Option<P>,
    _chip: PhantomData<C>,
}

impl<C: NorChip, B: NorBus> Nor<C, B, NoReadyBusy> {
    /// Create a driver for a chip whose ready/busy output isn't connected.
    pub fn new_without_ready_busy(_chip: C, bus: B) -> Self {
        Self {
            bus,
            ready_busy: None,
            _chip: PhantomData,
        }
    }
}

impl<C: NorChip, B: NorBus, P: InputPin> Nor<C, B, P> {
    /// Create a driver for a chip. The pin must already be configured as an input (or an
    /// alternate function whose level can be read).
    pub fn new(_chip: C, bus: B, ready_busy: P) -> Self {
        Self {
            bus,
            ready_busy: Some(ready_busy),
            _chip: PhantomData,
        }
    }

    /// Release the bus and ready/busy pin.
    pub fn free(self) -> (B, Option<P>) {
        (self.bus, self.ready_busy)
    }

    /// Read half-words starting at a byte offset. Puts the chip in read mode first.
    pub fn read(&mut self, offset: u32, buf: &mut [u16]) -> Result<()> {
        let start = check_span::<C>(offset, buf.len())?;

        self.enter_read_mode();

        for (addr, word) in (start..).zip(buf.iter_mut()) {
            *word = self.bus.read_half_word(addr);
        }

        Ok(())
    }

    /// Program half-words starting at a byte offset, one at a time, waiting for each to complete.
    /// Stops at the first half-word that fails. Programming can only clear bits; the target
    /// should be erased first.
    pub fn write(&mut self, offset: u32, data: &[u16]) -> Result<()> {
        let start = check_span::<C>(offset, data.len())?;

        for (addr, word) in (start..).zip(data.iter()) {
            self.unlock();
            self.bus
                .write_half_word(ADDR_UNLOCK_1, Command::Program as u16);
            self.bus.write_half_word(addr, *word);

            if let Err(e) = self.status(PROGRAM_TIMEOUT) {
                warn!("NOR program failed at {:#x}", addr * 2);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Program up to a write buffer's worth of half-words in a single operation. The data must
    /// fit within one write buffer page (`C::WRITE_BUFFER_WORDS` half-words, aligned). Empty
    /// data is accepted and does nothing.
    pub fn program_buffer(&mut self, offset: u32, data: &[u16]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if data.len() > C::WRITE_BUFFER_WORDS as usize {
            return Err(NorError::BufferTooLarge.into());
        }

        let start = check_span::<C>(offset, data.len())?;
        let end = start + data.len() as u32 - 1;

        if start / C::WRITE_BUFFER_WORDS != end / C::WRITE_BUFFER_WORDS {
            return Err(NorError::CrossesBufferPage.into());
        }

        self.unlock();
        self.bus
            .write_half_word(start, Command::WriteToBuffer as u16);
        self.bus.write_half_word(start, data.len() as u16 - 1);

        for (addr, word) in (start..).zip(data.iter()) {
            self.bus.write_half_word(addr, *word);
        }

        // The confirm can go to any address in the block.
        self.bus
            .write_half_word(start, Command::BufferToFlash as u16);

        let result = self.status(PROGRAM_TIMEOUT);
        if result.is_err() {
            warn!("NOR buffered program failed at {:#x}", offset);
        }
        result
    }

    /// Erase the block containing a byte offset, setting it to all `0xff`.
    pub fn erase_block(&mut self, offset: u32) -> Result<()> {
        let addr = check_span::<C>(offset, 1)?;

        self.erase_setup();
        self.bus.write_half_word(addr, Command::BlockErase as u16);

        let result = self.status(BLOCK_ERASE_TIMEOUT);
        match result {
            Ok(()) => debug!("NOR block erased at {:#x}", offset),
            Err(_) => warn!("NOR block erase failed at {:#x}", offset),
        }
        result
    }

    /// Erase the whole chip, setting it to all `0xff`. This takes a long time; on the order of
    /// minutes for large chips.
    pub fn erase_chip(&mut self) -> Result<()> {
        self.erase_setup();
        self.bus
            .write_half_word(ADDR_UNLOCK_1, Command::ChipErase as u16);

        let result = self.status(CHIP_ERASE_TIMEOUT);
        match result {
            Ok(()) => info!("NOR chip erased"),
            Err(_) => warn!("NOR chip erase failed"),
        }
        result
    }

    /// Read the manufacturer and device codes. This leaves the chip in autoselect mode, where
    /// reads return identification data instead of memory contents. Use `return_to_read_mode`
    /// before accessing memory directly; `read` does this on its own.
    pub fn read_id(&mut self) -> Result<NorId> {
        self.unlock();
        self.bus
            .write_half_word(ADDR_UNLOCK_1, Command::Autoselect as u16);

        let id = NorId {
            manufacturer_code: self.bus.read_half_word(ADDR_MANUFACTURER),
            device_code_1: self.bus.read_half_word(ADDR_DEVICE_1),
            device_code_2: self.bus.read_half_word(ADDR_DEVICE_2),
            device_code_3: self.bus.read_half_word(ADDR_DEVICE_3),
        };

        debug!(
            "NOR ID: manufacturer {:#x}, device {:#x} {:#x} {:#x}",
            id.manufacturer_code, id.device_code_1, id.device_code_2, id.device_code_3
        );

        Ok(id)
    }

    /// Read the chip's geometry from its CFI query table. Returns the chip to read mode.
    pub fn read_cfi(&mut self) -> Result<NorCfi> {
        self.bus
            .write_half_word(ADDR_CFI_QUERY, Command::CfiQuery as u16);

        let qry = [
            self.cfi_byte(CFI_QRY),
            self.cfi_byte(CFI_QRY + 1),
            self.cfi_byte(CFI_QRY + 2),
        ];

        if qry != *b"QRY" {
            self.return_to_read_mode();
            return Err(NorError::CfiNotSupported.into());
        }

        let cfi = NorCfi {
            command_set: self.cfi_u16(CFI_COMMAND_SET),
            device_size: pow2(self.cfi_byte(CFI_DEVICE_SIZE).into()),
            write_buffer_size: pow2(self.cfi_u16(CFI_WRITE_BUFFER).into()),
            erase_regions: self.cfi_byte(CFI_ERASE_REGIONS),
            region_1_blocks: self.cfi_u16(CFI_REGION_1) as u32 + 1,
            region_1_block_size: self.cfi_u16(CFI_REGION_1 + 2) as u32 * 256,
        };

        self.return_to_read_mode();

        Ok(cfi)
    }

    /// Put the chip back into read mode, eg after `read_id`, or to abort a failed operation.
    pub fn return_to_read_mode(&mut self) {
        self.bus.write_half_word(0, Command::ReadReset as u16);
    }

    /// Wait for the chip's ready/busy output to go high, for up to `timeout` checks. First waits
    /// for the chip to go busy, since the output may lag the command. Running out of checks in
    /// either phase isn't an error: the pin only shortens the wait, and `status` polls the chip
    /// to decide the result. Returns immediately if no ready/busy pin was provided.
    pub fn wait_ready(&mut self, timeout: u32) -> Result<()> {
        let Some(pin) = self.ready_busy.as_mut() else {
            return Ok(());
        };

        let mut remaining = timeout;
        while remaining > 0 && !is_busy(pin)? {
            remaining -= 1;
        }

        let mut remaining = timeout;
        while remaining > 0 && is_busy(pin)? {
            remaining -= 1;
        }

        Ok(())
    }

    /// Wait for a program or erase operation to complete, and report whether it succeeded.
    /// Waits on the ready/busy pin, then polls the toggle bit at most `timeout` times.
    pub fn status(&mut self, timeout: u32) -> Result<()> {
        self.wait_ready(timeout)?;

        bounded_loop!(self.in_progress()?, NorError::Timeout, timeout);

        Ok(())
    }

    /// Compare two status reads. Returns `true` while DQ6 toggles, or an error if DQ5 was set
    /// on the first read and DQ6 is still toggling afterwards.
    fn in_progress(&mut self) -> Result<bool> {
        let first = self.bus.read_half_word(ADDR_STATUS);
        let second = self.bus.read_half_word(ADDR_STATUS);

        if (first ^ second) & STATUS_TOGGLE == 0 {
            return Ok(false);
        }

        if first & STATUS_TIMEOUT != 0 {
            // DQ5 may have been set just as the operation completed; check again.
            let first = self.bus.read_half_word(ADDR_STATUS);
            let second = self.bus.read_half_word(ADDR_STATUS);
            if (first ^ second) & STATUS_TOGGLE == 0 {
                return Ok(false);
            }
            return Err(NorError::DeviceFailure.into());
        }

        Ok(true)
    }

    fn enter_read_mode(&mut self) {
        self.unlock();
        self.bus
            .write_half_word(ADDR_UNLOCK_1, Command::ReadReset as u16);
    }

    fn unlock(&mut self) {
        self.bus
            .write_half_word(ADDR_UNLOCK_1, Command::Unlock1 as u16);
        self.bus
            .write_half_word(ADDR_UNLOCK_2, Command::Unlock2 as u16);
    }

    fn erase_setup(&mut self) {
        self.unlock();
        self.bus
            .write_half_word(ADDR_UNLOCK_1, Command::EraseSetup as u16);
        self.unlock();
    }

    fn cfi_byte(&mut self, addr: u32) -> u8 {
        self.bus.read_half_word(addr) as u8
    }

    /// CFI multi-byte fields are little endian, one byte per word.
    fn cfi_u16(&mut self, addr: u32) -> u16 {
        u16::from_le_bytes([self.cfi_byte(addr), self.cfi_byte(addr + 1)])
    }
}

/// Sizes in the CFI table are stored as powers of two.
fn pow2(exp: u32) -> u32 {
    1_u32.checked_shl(exp).unwrap_or(0)
}

fn is_busy<P: InputPin>(pin: &mut P) -> Result<bool> {
    pin.is_low().map_err(|_| NorError::ReadyBusyPin.into())
}

/// Check that `len` half-words starting at byte offset `offset` are aligned, and fit on the chip.
/// Returns the starting word address.
fn check_span<C: NorChip>(offset: u32, len: usize) -> Result<u32> {
    if offset % 2 != 0 {
        return Err(NorError::NotAligned.into());
    }

    let end = u32::try_from(len)
        .ok()
        .and_then(|len| len.checked_mul(2))
        .and_then(|bytes| offset.checked_add(bytes));

    match end {
        Some(end) if end <= C::CAPACITY => Ok(offset / 2),
        _ => Err(NorError::OutOfBounds.into()),
    }
}
