//! This module provides functionality for General Purpose Input and Output (GPIO) pins:
//! enough to hand the FMC its data, address and control lines, and to read the flash
//! chip's ready/busy output. It includes an implementation of the `embedded-hal` input
//! pin trait.

use core::convert::Infallible;

use cfg_if::cfg_if;
use embedded_hal::digital::{ErrorType, InputPin};

use crate::{pac, util::rcc_en_reset};

type GpioRegs = pac::gpioa::RegisterBlock;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Values for `GPIOx_MODER`. Alternate function number is 0 - 15.
pub enum PinMode {
    Input,
    Output,
    Alt(u8),
    Analog,
}

impl PinMode {
    /// We use this function to find the value bits due to being unable to repr(u8) with
    /// the wrapped alternate function number.
    fn val(&self) -> u32 {
        match self {
            Self::Input => 0b00,
            Self::Output => 0b01,
            Self::Alt(_) => 0b10,
            Self::Analog => 0b11,
        }
    }
}

#[derive(Copy, Clone)]
#[repr(u8)]
/// Values for `GPIOx_OTYPER`.
pub enum OutputType {
    PushPull = 0,
    OpenDrain = 1,
}

#[derive(Copy, Clone)]
#[repr(u8)]
/// Values for `GPIOx_OSPEEDR`. This configures I/O output speed. See the datasheet
/// for your MCU for what speeds these are.
pub enum OutputSpeed {
    Low = 0b00,
    Medium = 0b01,
    High = 0b10,
    VeryHigh = 0b11,
}

#[derive(Copy, Clone)]
#[repr(u8)]
/// Values for `GPIOx_PUPDR`.
pub enum Pull {
    Floating = 0b00,
    Up = 0b01,
    Dn = 0b10,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// GPIO port letter. Limited to the ports every FMC-equipped variant has.
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Port {
    fn regs(&self) -> *const GpioRegs {
        match self {
            Self::A => pac::GPIOA::ptr(),
            Self::B => pac::GPIOB::ptr() as _,
            Self::C => pac::GPIOC::ptr() as _,
            Self::D => pac::GPIOD::ptr() as _,
            Self::E => pac::GPIOE::ptr() as _,
            Self::F => pac::GPIOF::ptr() as _,
            Self::G => pac::GPIOG::ptr() as _,
        }
    }
}

// Enable and reset the port's clock, if it's not already enabled. Resetting an enabled port
// would clear the config of pins already set up on it.
cfg_if! {
    if #[cfg(gpio_ahb4)] {
        macro_rules! enable_port {
            ($rcc:expr, $port:ident) => {
                paste::paste! {
                    if $rcc.ahb4enr().read().[<gpio $port en>]().bit_is_clear() {
                        rcc_en_reset!(ahb4, [<gpio $port>], $rcc);
                    }
                }
            };
        }
    } else {
        macro_rules! enable_port {
            ($rcc:expr, $port:ident) => {
                paste::paste! {
                    if $rcc.ahb1enr().read().[<gpio $port en>]().bit_is_clear() {
                        rcc_en_reset!(ahb1, [<gpio $port>], $rcc);
                    }
                }
            };
        }
    }
}

/// Represents a single GPIO pin. Register access is through the port's raw pointer, so
/// pins on the same port can be configured independently.
pub struct Pin {
    pub port: Port,
    /// 0 - 15.
    pub pin: u8,
}

impl Pin {
    /// Create a new pin, with a specific mode. Enables the port's RCC clock if required.
    pub fn new(port: Port, pin: u8, mode: PinMode) -> Self {
        assert!(pin <= 15, "Pin must be 0 - 15.");

        let rcc = unsafe { &(*pac::RCC::ptr()) };

        match port {
            Port::A => {
                enable_port!(rcc, a);
            }
            Port::B => {
                enable_port!(rcc, b);
            }
            Port::C => {
                enable_port!(rcc, c);
            }
            Port::D => {
                enable_port!(rcc, d);
            }
            Port::E => {
                enable_port!(rcc, e);
            }
            Port::F => {
                enable_port!(rcc, f);
            }
            Port::G => {
                enable_port!(rcc, g);
            }
        }

        let mut result = Self { port, pin };
        result.mode(mode);

        result
    }

    fn regs(&self) -> &GpioRegs {
        unsafe { &*self.port.regs() }
    }

    /// Set pin mode. For alternate function mode, also sets the function number.
    pub fn mode(&mut self, value: PinMode) {
        let shift = self.pin as u32 * 2;
        self.regs()
            .moder()
            .modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | (value.val() << shift)) });

        if let PinMode::Alt(alt) = value {
            self.alt_fn(alt);
        }
    }

    /// Set output type.
    pub fn output_type(&mut self, value: OutputType) {
        let shift = self.pin as u32;
        self.regs()
            .otyper()
            .modify(|r, w| unsafe { w.bits((r.bits() & !(1 << shift)) | ((value as u32) << shift)) });
    }

    /// Set output speed.
    pub fn output_speed(&mut self, value: OutputSpeed) {
        let shift = self.pin as u32 * 2;
        self.regs()
            .ospeedr()
            .modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | ((value as u32) << shift)) });
    }

    /// Set internal pull resistor: Pull up, pull down, or floating.
    pub fn pull(&mut self, value: Pull) {
        let shift = self.pin as u32 * 2;
        self.regs()
            .pupdr()
            .modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << shift)) | ((value as u32) << shift)) });
    }

    /// Set up a pin's alternate function. We set this up initially using `mode()`.
    fn alt_fn(&mut self, value: u8) {
        assert!(value <= 15, "Alt function must be 0 - 15.");

        let shift = (self.pin as u32 % 8) * 4;
        let val = (value as u32) << shift;
        let mask = !(0b1111 << shift);

        if self.pin < 8 {
            self.regs()
                .afrl()
                .modify(|r, w| unsafe { w.bits((r.bits() & mask) | val) });
        } else {
            self.regs()
                .afrh()
                .modify(|r, w| unsafe { w.bits((r.bits() & mask) | val) });
        }
    }

    /// Check if the pin's input voltage is high. Reads from the `IDR` register. This works
    /// in alternate function mode too.
    pub fn is_high(&self) -> bool {
        self.regs().idr().read().bits() & (1 << self.pin) != 0
    }

    /// Check if the pin's input voltage is low. Reads from the `IDR` register.
    pub fn is_low(&self) -> bool {
        !self.is_high()
    }
}

impl ErrorType for Pin {
    type Error = Infallible;
}

impl InputPin for Pin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_high(self))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(Pin::is_low(self))
    }
}
