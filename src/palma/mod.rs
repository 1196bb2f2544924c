//! Palma Module
//!
//! Host-side driver stub for the palma companion peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    PalmaController                       │
//! │   (command surface, lifecycle hooks, stored config)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌──────────────┐ ┌───────────────┐ ┌──────────────┐
//! │ HandleValid. │ │ OperationRec. │ │ KernelEvent  │
//! │              │ │               │ │ (shared,     │
//! │ - one active │ │ - last kind   │ │  level-      │
//! │   handle     │ │ - result      │ │  triggered)  │
//! │ - lifecycle  │ │ - payload     │ │              │
//! └──────────────┘ └───────────────┘ └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`handle`] - Connection handle validation and the connection state machine
//! - [`operation`] - The single operation record polled by the guest
//! - [`controller`] - The command surface tying the pieces together

pub mod controller;
pub mod handle;
pub mod operation;

pub use controller::{HidController, PalmaController, TransferMemory};
