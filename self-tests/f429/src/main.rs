//! Brings up the NOR flash on the STM324x9I-EVAL board, checks its ID, then writes a pattern to
//! the last block and reads it back.

#![deny(warnings)]
#![no_std]
#![no_main]

use cortex_m_rt::entry; // The runtime

use hal::{
    board::{self, EXPECTED_ID},
    nor::{M29w256gl, NorChip},
    pac,
};

// Import the panic handler
use panic_probe as _;

/// The last block; it's erased and overwritten.
const OFFSET: u32 = M29w256gl::CAPACITY - M29w256gl::BLOCK_SIZE;

#[entry]
fn main() -> ! {
    rtt_target::rtt_init_defmt!();
    // Set up microcontroller peripherals
    let dp = pac::Peripherals::take().unwrap();

    // Runs from the reset clock (HSI, 16Mhz); the board timing has plenty of margin there.
    let (_fmc, mut nor) = board::init(dp.FMC).unwrap();

    let id = nor.read_id().unwrap();
    nor.return_to_read_mode();

    if id == EXPECTED_ID {
        defmt::println!("Found M29W256GL: {}", id);
    } else {
        defmt::println!("Unexpected NOR ID: {}", id);
    }

    nor.erase_block(OFFSET).unwrap();

    let mut pattern = [0_u16; 64];
    for (i, word) in pattern.iter_mut().enumerate() {
        *word = 0xa5a5 ^ i as u16;
    }
    nor.write(OFFSET, &pattern).unwrap();

    let mut readback = [0_u16; 64];
    nor.read(OFFSET, &mut readback).unwrap();

    if readback == pattern {
        defmt::println!("Read back {} half-words OK", readback.len());
    } else {
        defmt::println!("Readback mismatch: {}", readback);
    }

    loop {
        cortex_m::asm::wfi();
    }
}

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}
