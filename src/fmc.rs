//! Flexible Memory Controller (FMC): The NOR/SRAM controller, used to access external
//! parallel memory through the memory map. This module configures bank 1 (`0x6000_0000`),
//! which is divided into 4 sub-banks, each selected by its own `NEx` chip select line.
//!
//! The register words are built by plain functions on the config structs, so they can be
//! checked without hardware. [`Fmc`] writes them to the peripheral.

// Some register constants are only used by `Fmc`, which needs a PAC.
#![cfg_attr(not(fmc), allow(dead_code))]

#[cfg(fmc)]
use crate::{
    error::Result,
    pac::{FMC, RCC},
    util::RccPeriph,
};

/// Start of FMC bank 1 in the memory map.
pub const NOR_SRAM_BASE_ADDR: u32 = 0x6000_0000;

/// Each sub-bank spans 64MB of the memory map.
const SUB_BANK_SIZE: u32 = 0x0400_0000;

// BCR fields, by bit position. See RM0090, section 37.5.6: "SRAM/NOR-Flash chip-select control
// registers 1..4 (FMC_BCR1..4)".
const BCR_MBKEN: u32 = 1 << 0;
const BCR_MUXEN: u32 = 1 << 1;
const BCR_MTYP_POS: u32 = 2;
const BCR_MWID_POS: u32 = 4;
const BCR_FACCEN: u32 = 1 << 6;
// Reserved; reads as 1 after reset, and we preserve that.
const BCR_RESERVED_7: u32 = 1 << 7;
const BCR_BURSTEN: u32 = 1 << 8;
const BCR_WAITPOL: u32 = 1 << 9;
const BCR_WRAPMOD: u32 = 1 << 10;
const BCR_WAITCFG: u32 = 1 << 11;
const BCR_WREN: u32 = 1 << 12;
const BCR_WAITEN: u32 = 1 << 13;
const BCR_EXTMOD: u32 = 1 << 14;
const BCR_ASYNCWAIT: u32 = 1 << 15;
const BCR_CBURSTRW: u32 = 1 << 19;
const BCR_CCLKEN: u32 = 1 << 20;
// H7 only: global enable of the FMC, on BCR1.
#[cfg(feature = "h7")]
const BCR1_FMCEN: u32 = 1 << 31;

// BTR and BWTR fields.
const BTR_ADDHLD_POS: u32 = 4;
const BTR_DATAST_POS: u32 = 8;
const BTR_BUSTURN_POS: u32 = 16;
const BTR_CLKDIV_POS: u32 = 20;
const BTR_DATLAT_POS: u32 = 24;
const BTR_ACCMOD_POS: u32 = 28;
const BTR_CLKDIV_MASK: u32 = 0xf << BTR_CLKDIV_POS;

/// Reset value of BCR1. Sub-banks 2 - 4 reset to the same, minus MBKEN and MUXEN.
pub const BCR1_RESET: u32 = 0x0000_30db;
pub const BCR_RESET: u32 = 0x0000_30d2;
/// Reset value of BTR and BWTR. Also written to BWTR when extended mode is off.
pub const BTR_RESET: u32 = 0x0fff_ffff;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Identifies an out-of-range timing value.
pub enum TimingField {
    AddressSetup,
    AddressHold,
    DataSetup,
    BusTurnaround,
    ClockDivision,
    DataLatency,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Indicates an error with the FMC configuration.
pub enum FmcError {
    /// A timing value doesn't fit its register field.
    InvalidTiming(TimingField),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// Bank 1 sub-bank, ie which `NEx` chip select the memory is wired to.
pub enum SubBank {
    Ne1 = 0,
    Ne2 = 1,
    Ne3 = 2,
    Ne4 = 3,
}

impl SubBank {
    /// The address the sub-bank is mapped to; memory offset 0 is read here.
    pub const fn base_addr(&self) -> u32 {
        NOR_SRAM_BASE_ADDR + *self as u32 * SUB_BANK_SIZE
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// Sets the `MTYP` field.
pub enum MemoryType {
    Sram = 0b00,
    Psram = 0b01,
    Nor = 0b10,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// External memory data bus width. Sets the `MWID` field.
pub enum DataWidth {
    Bits8 = 0b00,
    Bits16 = 0b01,
    Bits32 = 0b10,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// Asynchronous access mode. Sets the `ACCMOD` field of BTR and BWTR. Only used
/// when extended mode is enabled; otherwise the controller uses mode 1 (SRAM/PSRAM) or
/// mode 2 (NOR).
pub enum AccessMode {
    A = 0b00,
    B = 0b01,
    C = 0b10,
    D = 0b11,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// Polarity of the `NWAIT` signal. Sets the `WAITPOL` field.
pub enum WaitPolarity {
    ActiveLow = 0,
    ActiveHigh = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// Whether `NWAIT` is asserted one data cycle before the wait state, or during it.
/// Sets the `WAITCFG` field.
pub enum WaitTiming {
    BeforeWaitState = 0,
    DuringWaitState = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
/// Whether `CLK` is generated only during synchronous accesses, or continuously.
/// Sets the `CCLKEN` field, which only exists on BCR1.
pub enum ContinuousClock {
    SyncOnly = 0,
    SyncAsync = 1,
}

/// Configuration of a NOR/SRAM sub-bank. Written to the `BCRx` register.
///
/// The default is the controller's reset state for `NE1`: 16-bit, multiplexed NOR, with
/// writes and the wait signal enabled.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NorSramConfig {
    pub sub_bank: SubBank,
    /// Multiplex address and data on the data lines. Only valid for NOR and PSRAM.
    pub address_data_mux: bool,
    pub memory_type: MemoryType,
    pub data_width: DataWidth,
    /// Synchronous burst reads. Only valid for synchronous burst memories.
    pub burst_access: bool,
    pub wait_polarity: WaitPolarity,
    /// Only on F4. Reserved on H7, where this must stay `false`.
    pub wrap_mode: bool,
    pub wait_timing: WaitTiming,
    /// If false, the controller blocks writes to the bank with an AHB error.
    pub write_enable: bool,
    /// Honour `NWAIT` during synchronous accesses.
    pub wait_signal: bool,
    /// Use separate read (BTR) and write (BWTR) timings.
    pub extended_mode: bool,
    /// Honour `NWAIT` during asynchronous accesses.
    pub async_wait: bool,
    /// Synchronous burst writes.
    pub write_burst: bool,
    pub continuous_clock: ContinuousClock,
}

impl Default for NorSramConfig {
    fn default() -> Self {
        Self {
            sub_bank: SubBank::Ne1,
            address_data_mux: true,
            memory_type: MemoryType::Nor,
            data_width: DataWidth::Bits16,
            burst_access: false,
            wait_polarity: WaitPolarity::ActiveLow,
            wrap_mode: false,
            wait_timing: WaitTiming::BeforeWaitState,
            write_enable: true,
            wait_signal: true,
            extended_mode: false,
            async_wait: false,
            write_burst: false,
            continuous_clock: ContinuousClock::SyncOnly,
        }
    }
}

impl NorSramConfig {
    /// The value to write to `BCRx`, with the bank still disabled (`MBKEN` clear).
    pub fn bcr_bits(&self) -> u32 {
        let mut val = BCR_RESERVED_7
            | ((self.memory_type as u32) << BCR_MTYP_POS)
            | ((self.data_width as u32) << BCR_MWID_POS);

        // NOR flash accesses must be enabled for NOR memory.
        if self.memory_type == MemoryType::Nor {
            val |= BCR_FACCEN;
        }

        let flags = [
            (self.address_data_mux, BCR_MUXEN),
            (self.burst_access, BCR_BURSTEN),
            (self.wait_polarity == WaitPolarity::ActiveHigh, BCR_WAITPOL),
            (self.wrap_mode, BCR_WRAPMOD),
            (self.wait_timing == WaitTiming::DuringWaitState, BCR_WAITCFG),
            (self.write_enable, BCR_WREN),
            (self.wait_signal, BCR_WAITEN),
            (self.extended_mode, BCR_EXTMOD),
            (self.async_wait, BCR_ASYNCWAIT),
            (self.write_burst, BCR_CBURSTRW),
        ];
        for (set, bit) in flags {
            if set {
                val |= bit;
            }
        }

        // CCLKEN only exists on BCR1. Other sub-banks set it there; see `Fmc::new`.
        if self.sub_bank == SubBank::Ne1 && self.continuous_clock == ContinuousClock::SyncAsync {
            val |= BCR_CCLKEN;
        }

        val
    }
}

/// Read or write timing for a sub-bank, in HCLK cycles (FMC_CLK cycles for
/// `data_latency`). Written to `BTRx`, or `BWTRx` for write timing in extended mode.
///
/// The default is the reset state of the timing registers: all fields at their maximum.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Timing {
    /// 0 - 15.
    pub address_setup: u8,
    /// 1 - 15.
    pub address_hold: u8,
    /// 1 - 255.
    pub data_setup: u8,
    /// 0 - 15.
    pub bus_turnaround: u8,
    /// FMC_CLK period, in HCLK cycles. 2 - 16. Only used in synchronous modes.
    pub clock_division: u8,
    /// FMC_CLK cycles before the first data in a synchronous burst. 2 - 17.
    pub data_latency: u8,
    pub access_mode: AccessMode,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            address_setup: 15,
            address_hold: 15,
            data_setup: 255,
            bus_turnaround: 15,
            clock_division: 16,
            data_latency: 17,
            access_mode: AccessMode::A,
        }
    }
}

impl Timing {
    /// Check every field fits its register field.
    pub fn validate(&self) -> core::result::Result<(), FmcError> {
        let checks = [
            (self.address_setup <= 15, TimingField::AddressSetup),
            (
                (1..=15).contains(&self.address_hold),
                TimingField::AddressHold,
            ),
            (self.data_setup >= 1, TimingField::DataSetup),
            (self.bus_turnaround <= 15, TimingField::BusTurnaround),
            (
                (2..=16).contains(&self.clock_division),
                TimingField::ClockDivision,
            ),
            (
                (2..=17).contains(&self.data_latency),
                TimingField::DataLatency,
            ),
        ];

        for (valid, field) in checks {
            if !valid {
                return Err(FmcError::InvalidTiming(field));
            }
        }
        Ok(())
    }

    /// The value to write to `BTRx`. Assumes the timing is valid.
    pub fn btr_bits(&self) -> u32 {
        self.bwtr_bits()
            | ((self.clock_division as u32 - 1) << BTR_CLKDIV_POS)
            | ((self.data_latency as u32 - 2) << BTR_DATLAT_POS)
    }

    /// The value to write to `BWTRx`. This register has no clock division or data latency
    /// fields. Assumes the timing is valid.
    pub fn bwtr_bits(&self) -> u32 {
        self.address_setup as u32
            | ((self.address_hold as u32) << BTR_ADDHLD_POS)
            | ((self.data_setup as u32) << BTR_DATAST_POS)
            | ((self.bus_turnaround as u32) << BTR_BUSTURN_POS)
            | ((self.access_mode as u32) << BTR_ACCMOD_POS)
    }
}

/// Reduce DRY for accessing the numbered `BCRx`, `BTRx` and `BWTRx` registers.
#[cfg(fmc)]
macro_rules! sub_bank_reg {
    (read, $regs:expr, $bank:expr, $reg:ident) => {
        paste::paste! {
            match $bank {
                SubBank::Ne1 => $regs.[<$reg 1>]().read().bits(),
                SubBank::Ne2 => $regs.[<$reg 2>]().read().bits(),
                SubBank::Ne3 => $regs.[<$reg 3>]().read().bits(),
                SubBank::Ne4 => $regs.[<$reg 4>]().read().bits(),
            }
        }
    };
    (write, $regs:expr, $bank:expr, $reg:ident, $val:expr) => {
        paste::paste! {
            match $bank {
                SubBank::Ne1 => {
                    $regs.[<$reg 1>]().write(|w| unsafe { w.bits($val) });
                }
                SubBank::Ne2 => {
                    $regs.[<$reg 2>]().write(|w| unsafe { w.bits($val) });
                }
                SubBank::Ne3 => {
                    $regs.[<$reg 3>]().write(|w| unsafe { w.bits($val) });
                }
                SubBank::Ne4 => {
                    $regs.[<$reg 4>]().write(|w| unsafe { w.bits($val) });
                }
            }
        }
    };
}

/// Represents the FMC peripheral, configured for one NOR/SRAM sub-bank.
#[cfg(fmc)]
pub struct Fmc {
    pub regs: FMC,
    pub cfg: NorSramConfig,
}

#[cfg(fmc)]
impl Fmc {
    /// Enable and reset the FMC clock, then configure and enable a NOR/SRAM sub-bank.
    /// `write_timing` is only used if `cfg.extended_mode` is set.
    pub fn new(regs: FMC, cfg: NorSramConfig, timing: Timing, write_timing: Timing) -> Result<Self> {
        timing.validate()?;
        if cfg.extended_mode {
            write_timing.validate()?;
        }

        let rcc = unsafe { &(*RCC::ptr()) };
        FMC::en_reset(rcc);

        let bank = cfg.sub_bank;

        // Disable the sub-bank before changing its configuration.
        let bcr = sub_bank_reg!(read, regs, bank, bcr);
        sub_bank_reg!(write, regs, bank, bcr, bcr & !BCR_MBKEN);

        sub_bank_reg!(write, regs, bank, bcr, cfg.bcr_bits());
        sub_bank_reg!(write, regs, bank, btr, timing.btr_bits());

        // Continuous clock and its divider are taken from sub-bank 1's registers, regardless
        // of which sub-bank uses them.
        if bank != SubBank::Ne1 && cfg.continuous_clock == ContinuousClock::SyncAsync {
            regs.bcr1()
                .modify(|r, w| unsafe { w.bits(r.bits() | BCR_CCLKEN) });
            regs.btr1().modify(|r, w| unsafe {
                w.bits(
                    (r.bits() & !BTR_CLKDIV_MASK)
                        | ((timing.clock_division as u32 - 1) << BTR_CLKDIV_POS),
                )
            });
        }

        let bwtr = if cfg.extended_mode {
            write_timing.bwtr_bits()
        } else {
            BTR_RESET
        };
        sub_bank_reg!(write, regs, bank, bwtr, bwtr);

        // Enable the sub-bank.
        let bcr = sub_bank_reg!(read, regs, bank, bcr);
        sub_bank_reg!(write, regs, bank, bcr, bcr | BCR_MBKEN);

        #[cfg(feature = "h7")]
        regs.bcr1()
            .modify(|r, w| unsafe { w.bits(r.bits() | BCR1_FMCEN) });

        debug!(
            "FMC sub-bank {} configured. BCR: {:#x}, BTR: {:#x}",
            bank as u8,
            cfg.bcr_bits(),
            timing.btr_bits()
        );

        Ok(Self { regs, cfg })
    }

    /// The address memory offset 0 of the configured sub-bank is mapped to.
    pub fn base_addr(&self) -> u32 {
        self.cfg.sub_bank.base_addr()
    }

    /// Allow writes to the sub-bank. (Sets `BCRx.WREN`)
    pub fn enable_write(&mut self) {
        let bank = self.cfg.sub_bank;
        let bcr = sub_bank_reg!(read, self.regs, bank, bcr);
        sub_bank_reg!(write, self.regs, bank, bcr, bcr | BCR_WREN);
        self.cfg.write_enable = true;
    }

    /// Block writes to the sub-bank; the controller reports an AHB error for any
    /// write attempt. (Clears `BCRx.WREN`)
    pub fn disable_write(&mut self) {
        let bank = self.cfg.sub_bank;
        let bcr = sub_bank_reg!(read, self.regs, bank, bcr);
        sub_bank_reg!(write, self.regs, bank, bcr, bcr & !BCR_WREN);
        self.cfg.write_enable = false;
    }

    /// Disable the sub-bank, restore its registers to their reset values, and gate the FMC
    /// clock off. Returns the peripheral.
    pub fn free(self) -> FMC {
        let bank = self.cfg.sub_bank;

        let bcr = sub_bank_reg!(read, self.regs, bank, bcr);
        sub_bank_reg!(write, self.regs, bank, bcr, bcr & !BCR_MBKEN);

        let bcr_reset = match bank {
            SubBank::Ne1 => BCR1_RESET,
            _ => BCR_RESET,
        };
        sub_bank_reg!(write, self.regs, bank, bcr, bcr_reset);
        sub_bank_reg!(write, self.regs, bank, btr, BTR_RESET);
        sub_bank_reg!(write, self.regs, bank, bwtr, BTR_RESET);

        let rcc = unsafe { &(*RCC::ptr()) };
        FMC::disable(rcc);

        self.regs
    }
}
