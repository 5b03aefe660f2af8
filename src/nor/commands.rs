//! Command set and table addresses for AMD/Spansion-compatible (CFI command set `0x0002`)
//! NOR flash, in x16 mode. Addresses are word addresses.

/// Word addresses of the unlock cycles.
pub(crate) const ADDR_UNLOCK_1: u32 = 0x0555;
pub(crate) const ADDR_UNLOCK_2: u32 = 0x02aa;
/// Word address the CFI query command is written to.
pub(crate) const ADDR_CFI_QUERY: u32 = 0x0055;
/// Status (DQ5, DQ6) is read here while an operation runs.
pub(crate) const ADDR_STATUS: u32 = 0;

/// Autoselect mode addresses.
pub(crate) const ADDR_MANUFACTURER: u32 = 0x00;
pub(crate) const ADDR_DEVICE_1: u32 = 0x01;
pub(crate) const ADDR_DEVICE_2: u32 = 0x0e;
pub(crate) const ADDR_DEVICE_3: u32 = 0x0f;

/// CFI query mode addresses. Only the low byte of each word is meaningful.
pub(crate) const CFI_QRY: u32 = 0x10;
pub(crate) const CFI_COMMAND_SET: u32 = 0x13;
pub(crate) const CFI_DEVICE_SIZE: u32 = 0x27;
pub(crate) const CFI_WRITE_BUFFER: u32 = 0x2a;
pub(crate) const CFI_ERASE_REGIONS: u32 = 0x2c;
pub(crate) const CFI_REGION_1: u32 = 0x2d;

/// DQ6 toggles on every read while a program or erase is in progress.
pub(crate) const STATUS_TOGGLE: u16 = 1 << 6;
/// DQ5 is set when the operation exceeded the chip's internal time limit.
pub(crate) const STATUS_TIMEOUT: u16 = 1 << 5;

#[derive(Copy, Clone)]
#[repr(u16)]
/// Data written during command cycles.
pub(crate) enum Command {
    Unlock1 = 0x00aa,
    Unlock2 = 0x0055,
    /// Return to read mode. Also aborts autoselect and CFI query mode.
    ReadReset = 0x00f0,
    Autoselect = 0x0090,
    CfiQuery = 0x0098,
    Program = 0x00a0,
    EraseSetup = 0x0080,
    BlockErase = 0x0030,
    ChipErase = 0x0010,
    WriteToBuffer = 0x0025,
    BufferToFlash = 0x0029,
}
