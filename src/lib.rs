//! Cooperative-runtime firmware core for programmable construction-set hubs.
//!
//! This crate holds every board-independent piece of the stack (spec §1):
//! the task runtime (`rt`), port detection (`port`), the LUMP sensor
//! protocol (`lump`), fixed-point motion math and servo control (`motion`),
//! the BLE command/telemetry plane (`ble`), multi-slot persistent storage
//! (`storage`), and the HMI supervisor (`hmi`), tied together by
//! [`context::HubContext`]. Board-specific GPIO/SPI/DMA/radio drivers are
//! out of scope and are supplied through the [`hal`] traits by the firmware
//! binary (`src/main.rs`), built against `stm32-hal2`.
//!
//! Built `no_std` except under `cargo test`, where `std` is available for
//! host-side unit tests against the [`hal::fakes`] collaborators.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod config;
pub mod context;
pub mod error;
pub mod hal;
pub mod hmi;
pub mod lump;
pub mod motion;
pub mod port;
pub mod rt;
pub mod status;
pub mod storage;

pub use context::HubContext;
