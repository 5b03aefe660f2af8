//! Board support for the M29W256GL NOR flash on the STM324x9I-EVAL board. The chip sits on
//! FMC sub-bank 1 (`NE1`) with a 16-bit data bus, and its ready/busy output is wired to PD6.
//!
//! [`init`] configures the pins and the FMC, and returns a driver for the chip.

#[cfg(fmc)]
use crate::{
    Result,
    fmc::Fmc,
    gpio::{OutputSpeed, OutputType, Pin, PinMode, Port, Pull},
    nor::{M29w256gl, MemoryMappedBus, Nor},
    pac,
};
use crate::{
    fmc::{
        AccessMode, ContinuousClock, DataWidth, MemoryType, NorSramConfig, SubBank, Timing,
        WaitPolarity, WaitTiming,
    },
    nor::NorId,
};

/// Codes the board's chip returns from `Nor::read_id`.
pub const EXPECTED_ID: NorId = NorId {
    manufacturer_code: 0x0020,
    device_code_1: 0x227e,
    device_code_2: 0x2222,
    device_code_3: 0x2201,
};

/// The chip's ready/busy output. Also the FMC `NWAIT` line; it's read through the input
/// data register while in alternate function mode.
#[cfg(fmc)]
pub const READY_BUSY: (Port, u8) = (Port::D, 6);

/// Alternate function number of the FMC on ports D - G.
#[cfg(fmc)]
const AF_FMC: u8 = 12;

/// Data, address, and control lines, by port.
#[cfg(fmc)]
const FMC_PINS: [(Port, &[u8]); 4] = [
    (Port::D, &[0, 1, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]),
    (Port::E, &[2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]),
    (Port::F, &[0, 1, 2, 3, 4, 5, 12, 13, 14, 15]),
    (Port::G, &[0, 1, 2, 3, 4, 5]),
];

/// The board's flash driver: memory mapped on `NE1`, with ready/busy on PD6.
#[cfg(fmc)]
pub type BoardNor = Nor<M29w256gl, MemoryMappedBus, Pin>;

/// Bus timing for the M29W256GL at the board's HCLK, in HCLK cycles. Used for both reads and
/// writes.
pub fn timing() -> Timing {
    Timing {
        address_setup: 8,
        address_hold: 3,
        data_setup: 9,
        bus_turnaround: 0,
        clock_division: 2,
        data_latency: 2,
        access_mode: AccessMode::A,
    }
}

/// Asynchronous, non-multiplexed 16-bit NOR on `NE1`.
pub fn nor_sram_config() -> NorSramConfig {
    NorSramConfig {
        sub_bank: SubBank::Ne1,
        address_data_mux: false,
        memory_type: MemoryType::Nor,
        data_width: DataWidth::Bits16,
        burst_access: false,
        wait_polarity: WaitPolarity::ActiveLow,
        wrap_mode: false,
        wait_timing: WaitTiming::BeforeWaitState,
        write_enable: true,
        wait_signal: true,
        extended_mode: false,
        async_wait: true,
        write_burst: false,
        continuous_clock: ContinuousClock::SyncOnly,
    }
}

/// Set up the FMC pins on ports D, E, F, and G: Alternate function 12, push-pull, with pull-ups.
/// Enables the port clocks.
#[cfg(fmc)]
pub fn init_pins() {
    for (port, pins) in FMC_PINS {
        for &pin in pins {
            let mut p = Pin::new(port, pin, PinMode::Alt(AF_FMC));
            p.output_type(OutputType::PushPull);
            p.output_speed(OutputSpeed::VeryHigh);
            p.pull(Pull::Up);
        }
    }
}

/// Configure the pins and FMC for the board's NOR flash, and put the chip in read mode.
/// Returns the FMC, eg to disable writes or release it later, and the flash driver.
#[cfg(fmc)]
pub fn init(regs: pac::FMC) -> Result<(Fmc, BoardNor)> {
    init_pins();

    let fmc = Fmc::new(regs, nor_sram_config(), timing(), timing())?;

    // Safe: the FMC peripheral is a singleton we've taken ownership of, and `NE1` is mapped to
    // the chip from here on.
    let bus = unsafe { MemoryMappedBus::new(fmc.base_addr()) };

    let (port, pin) = READY_BUSY;
    // Already configured by `init_pins`.
    let ready_busy = Pin { port, pin };

    let mut nor = Nor::new(M29w256gl, bus, ready_busy);
    nor.return_to_read_mode();

    info!("NOR flash initialized at {:#x}", fmc.base_addr());

    Ok((fmc, nor))
}
