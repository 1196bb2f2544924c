//! Palma error taxonomy and HID result codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error module number of the HID service
pub const HID_MODULE: u32 = 202;

/// 32-bit service result code: `module | description << 9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ResultCode(u32);

impl ResultCode {
    /// Result written into the operation record by every successful operation
    pub const PALMA_SUCCESS: ResultCode = ResultCode::new(HID_MODULE, 0);

    pub const fn new(module: u32, description: u32) -> Self {
        Self((module & 0x1FF) | ((description & 0x1FFF) << 9))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn module(self) -> u32 {
        self.0 & 0x1FF
    }

    pub const fn description(self) -> u32 {
        (self.0 >> 9) & 0x1FFF
    }

    pub const fn is_success(self) -> bool {
        self.description() == 0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04} ({:#010X})", 2000 + self.module(), self.description(), self.0)
    }
}

/// Errors returned synchronously by the Palma command surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum PalmaError {
    /// Handle unknown, stale, or not the active connection
    #[error("invalid palma connection handle")]
    InvalidHandle,

    /// Deferred command issued before the connection was initialized
    #[error("palma connection is not initialized")]
    NotInitialized,

    /// Slot cannot accept a palma peripheral
    #[error("npad cannot accept a palma peripheral")]
    NotPaired,

    /// Payload size or bounds mismatch
    #[error("invalid palma transfer parameters")]
    InvalidParameters,
}

impl PalmaError {
    pub fn result_code(self) -> ResultCode {
        let description = match self {
            Self::NotInitialized => 3301,
            Self::InvalidHandle => 3302,
            Self::NotPaired => 3303,
            Self::InvalidParameters => 3304,
        };
        ResultCode::new(HID_MODULE, description)
    }
}

impl From<PalmaError> for ResultCode {
    fn from(err: PalmaError) -> Self {
        err.result_code()
    }
}

pub type PalmaResult<T> = Result<T, PalmaError>;
