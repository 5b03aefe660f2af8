//! Driver for parallel NOR flash attached to the STM32 Flexible Memory Controller (FMC),
//! with board support for the M29W256GL on the STM324x9I-EVAL board.
//!
//! The crate is split in two layers:
//!
//! - [`fmc`] and [`gpio`] configure the bus controller and its pins. These need an MCU
//!   feature (eg `f429`), which selects the PAC.
//! - [`nor`] drives the chip's command set over any [`nor::NorBus`]. It doesn't touch
//!   registers, so it builds (and is tested) without an MCU feature.
//!
//! [`board`] ties them together for the eval board:
//!
//! ```ignore
//! let dp = pac::Peripherals::take().unwrap();
//! let (_fmc, mut nor) = stm32_nor::board::init(dp.FMC)?;
//!
//! let id = nor.read_id()?;
//! nor.return_to_read_mode();
//!
//! nor.erase_block(0)?;
//! nor.write(0, &[0x1234, 0x5678])?;
//!
//! let mut buf = [0; 2];
//! nor.read(0, &mut buf)?;
//! ```

#![cfg_attr(not(test), no_std)]

// F4 PAC
#[cfg(feature = "f427")]
pub use stm32f4::stm32f427 as pac;

#[cfg(feature = "f429")]
pub use stm32f4::stm32f429 as pac;

#[cfg(feature = "f446")]
pub use stm32f4::stm32f446 as pac;

#[cfg(feature = "f469")]
pub use stm32f4::stm32f469 as pac;

// H7 PAC
#[cfg(feature = "h743")]
pub use stm32h7::stm32h743 as pac;

#[cfg(feature = "h743v")]
pub use stm32h7::stm32h743v as pac;

#[cfg(feature = "h747cm7")]
pub use stm32h7::stm32h747cm7 as pac;

#[cfg(feature = "h753")]
pub use stm32h7::stm32h753 as pac;

#[cfg(feature = "h753v")]
pub use stm32h7::stm32h753v as pac;

#[macro_use]
mod macros;

pub mod board;
pub mod error;
pub mod fmc;
pub mod nor;
mod util;

#[cfg(fmc)]
pub mod gpio;

pub use error::{Error, Result};
