//! This is an internal module that contains utility functionality used by other modules.

#[cfg(fmc)]
use crate::pac::{self, rcc::RegisterBlock};

/// Spin while a condition holds. If it's still true after `$max` iterations, return the
/// error from the enclosing function. There's no sleep or yield between checks.
///
/// Example: `bounded_loop!(pin_is_low()?, NorError::Timeout, timeout);`
macro_rules! bounded_loop {
    ($cond:expr, $err:expr, $max:expr) => {
        let mut i: u32 = 0;
        while $cond {
            i += 1;
            if i >= $max {
                return Err($err.into());
            }
        }
    };
}

pub(crate) use bounded_loop;

/// Enables and resets peripheral clocks on various RCC registers.
/// The first argument is a `ahb1`, `ahb3` etc to specify the reg block. The second is something like
/// `fmc`, and the third is a `pac::RCC`.
#[cfg(fmc)]
macro_rules! rcc_en_reset {
    (ahb1, $periph:expr, $rcc:expr) => {
        paste::paste! {
            $rcc.ahb1enr().modify(|_, w| w.[<$periph en>]().set_bit());
            $rcc.ahb1rstr().modify(|_, w| w.[<$periph rst>]().set_bit());
            $rcc.ahb1rstr().modify(|_, w| w.[<$periph rst>]().clear_bit());
        }
    };
    (ahb3, $periph:expr, $rcc:expr) => {
        paste::paste! {
            $rcc.ahb3enr().modify(|_, w| w.[<$periph en>]().set_bit());
            $rcc.ahb3rstr().modify(|_, w| w.[<$periph rst>]().set_bit());
            $rcc.ahb3rstr().modify(|_, w| w.[<$periph rst>]().clear_bit());
        }
    };
    (ahb4, $periph:expr, $rcc:expr) => {
        paste::paste! {
            $rcc.ahb4enr().modify(|_, w| w.[<$periph en>]().set_bit());
            $rcc.ahb4rstr().modify(|_, w| w.[<$periph rst>]().set_bit());
            $rcc.ahb4rstr().modify(|_, w| w.[<$periph rst>]().clear_bit());
        }
    };
}

#[cfg(fmc)]
pub(crate) use rcc_en_reset;

/// Used to enable, reset, and disable peripheral clocks, without the peripheral's
/// constructor needing to know which RCC register it lives on.
#[cfg(fmc)]
pub trait RccPeriph {
    fn en_reset(rcc: &RegisterBlock);

    /// Gate the peripheral clock off. Register contents are kept.
    fn disable(rcc: &RegisterBlock);
}

#[cfg(fmc)]
impl RccPeriph for pac::FMC {
    fn en_reset(rcc: &RegisterBlock) {
        rcc_en_reset!(ahb3, fmc, rcc);
    }

    fn disable(rcc: &RegisterBlock) {
        rcc.ahb3enr().modify(|_, w| w.fmcen().clear_bit());
    }
}
