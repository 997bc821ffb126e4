//! Error kinds shared by every subsystem (spec §7). Modeled as one flat enum
//! rather than per-module error types, since every protothread in this
//! firmware ultimately reports into the same small vocabulary and callers
//! switch on it to decide retry/advance/abort, exactly as the upstream
//! `pbio_error_t` does.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum PbioError {
    /// Operation not ready; retry on next poll.
    Again,
    /// UART/SPI transfer exceeded its budget.
    TimedOut,
    /// Rejected at an API boundary.
    InvalidArgument,
    /// Operation is not permitted in the current state.
    InvalidOperation,
    /// Port has no attached device, or the device was reset.
    NoDevice,
    /// Resource is occupied by another operation.
    Busy,
    /// Unspecified hardware or protocol failure.
    Failed,
    /// General I/O failure distinct from a protocol-level [`PbioError::Failed`].
    Io,
    /// Operation was explicitly canceled (e.g. shutdown requested).
    Canceled,
}

pub type PbioResult<T> = Result<T, PbioError>;

impl PbioError {
    /// Whether a caller should simply retry on the next poll rather than
    /// treat this as a hard failure.
    pub const fn is_transient(self) -> bool {
        matches!(self, PbioError::Again)
    }
}
