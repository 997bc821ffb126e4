//! C3: LUMP sensor driver (spec §4.3). See [`protocol`] for the wire
//! format, [`iodev`] for the device/mode data model, and [`sync`] for the
//! sync state machine.

pub mod iodev;
pub mod protocol;
pub mod sync;

pub use iodev::{CapabilityFlags, ElementType, Iodev, ModeInfo};
pub use sync::{LumpDriver, SyncState};
