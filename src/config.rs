//! Compile-time tuning constants, grouped the way the teacher groups them at
//! the top of `flight_ctrls::common` / `main.rs` rather than behind a config
//! crate: these are hub-wide constants baked into the firmware image, not
//! runtime-loaded settings (those live in [`crate::storage::StorageManager`]).

/// Number of user-program storage slots. Build-time constant per spec §4.7.
pub const NUM_SLOTS: usize = 5;

/// Bytes reserved for the app-writable free-form user data blob.
pub const USER_DATA_SIZE: usize = 64;

/// Bytes available for concatenated program data across all slots.
pub const PROGRAM_DATA_SIZE: usize = 24 * 1024;

/// Number of ports on the hub (A..F on city/technic hubs, or 1..4 on EV3-style).
pub const NUM_PORTS: usize = 6;

/// Max modes a LUMP iodev can expose (`LUMP_MAX_EXT_MODE + 1` upstream).
pub const MAX_MODES: usize = 24;

/// Max raw payload bytes for a single LUMP message (`LUMP_MAX_MSG_SIZE`).
pub const MAX_LUMP_PAYLOAD: usize = 32;

/// BLE MTU used to size the stdout ring buffer and notification chunking.
/// Conservative default; the real negotiated MTU can be smaller, in which
/// case the send pump just sends fewer bytes per notification.
pub const BLE_MTU: usize = 158;

/// Capacity of the stdout SPSC ring buffer, sized at >= 2x MTU per spec §4.6.
pub const STDOUT_RING_SIZE: usize = 2 * BLE_MTU;

/// Capacity of the stdin ring buffer fed by WRITE_STDIN commands.
pub const STDIN_RING_SIZE: usize = 512;

/// Nominal servo control loop rate, matching spec §4.5.
pub const SERVO_CONTROL_RATE_HZ: u32 = 1000;

/// Port detection poll period per spec §4.2.
pub const PORT_POLL_PERIOD_MS: u32 = 2;

/// Consecutive identical samples required to accept a port classification.
pub const PORT_DEBOUNCE_SAMPLES: u32 = 20;

/// Idle timeout before C8 requests shutdown, per spec §4.8 / §8 scenario 6.
pub const IDLE_TIMEOUT_MS: u32 = 3 * 60 * 1000;

/// Status reporter liveness guard period, per spec §4.6.
pub const STATUS_REPORT_LIVENESS_MS: u32 = 500;

/// Minimum duration of the shutdown animation before power-off, per spec §4.8.
pub const SHUTDOWN_ANIMATION_MIN_MS: u32 = 500;

/// Minimum duration of the boot animation before the hub accepts input,
/// per spec §4.8 "boot: run a bounded animation".
pub const BOOT_ANIMATION_MIN_MS: u32 = 300;

/// Debounce window for HMI button edges, per spec §4.8 "UI waiter: debounce
/// buttons".
pub const BUTTON_DEBOUNCE_MS: u32 = 30;
