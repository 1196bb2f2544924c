//! Host-side driver stub for the palma companion peripheral.
//!
//! Guest commands are validated against the single active connection handle,
//! executed immediately, and their outcome is published through an operation
//! record plus a level-triggered completion event that the guest polls later.

pub mod domain;
pub mod infrastructure;
pub mod palma;
pub mod service;

pub use domain::error::{PalmaError, PalmaResult, ResultCode};
pub use palma::{HidController, PalmaController};
pub use service::{PalmaRequest, PalmaResponse, PalmaService, PalmaServiceHandle};
