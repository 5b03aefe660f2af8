//! Common error definitions.

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

use crate::{fmc::FmcError, nor::NorError};

macro_rules! impl_from_error {
    ($error:ident) => {
        impl From<$error> for Error {
            fn from(error: $error) -> Self {
                Self::$error(error)
            }
        }
    };
}

/// Alias for Result<T, Error>.
pub type Result<T> = core::result::Result<T, Error>;

/// Collection of all errors that can occur.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Errors reported by the flash chip, timeouts while polling it, or argument checks
    /// against its geometry.
    NorError(NorError),
    /// Memory controller configuration errors.
    FmcError(FmcError),
}

impl_from_error!(NorError);
impl_from_error!(FmcError);

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::NorError(NorError::NotAligned) => NorFlashErrorKind::NotAligned,
            Error::NorError(NorError::OutOfBounds) => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}
