//! C6: BLE command/telemetry plane (spec §4.6). Bridges a single GATT
//! connection to the command bus (decoded [`opcode::Command`]s) and the
//! status/stdout buses (`status_reporter`, `stdout`).

pub mod opcode;
pub mod ring;
pub mod status_reporter;
pub mod stdout;

pub use opcode::{Command, PybricksError, StatusReport};
pub use ring::ByteRing;
pub use status_reporter::StatusReporter;
pub use stdout::SendPump;

use bbqueue::Producer;

use crate::config::{STDIN_RING_SIZE, STDOUT_RING_SIZE};
use crate::hal::{BluetoothDriver, Instant};
use crate::status::SystemStatus;

/// Ties the opcode parser, the stdin/stdout rings, and the status reporter
/// together into the per-connection state machine (spec §4.6 "Connection
/// lifecycle"). Program start/stop and storage writes are not this
/// component's job: [`Self::handle_command`] returns the parsed [`Command`]
/// for the caller (HMI/storage) to act on, after validating framing and
/// busy-state here.
pub struct Controller {
    stdin: Producer<'static, STDIN_RING_SIZE>,
    stdout: SendPump<STDOUT_RING_SIZE>,
    reporter: StatusReporter,
    was_connected: bool,
    legacy_unconditional_reply: bool,
}

impl Controller {
    pub fn new(
        stdin: Producer<'static, STDIN_RING_SIZE>,
        stdout_consumer: bbqueue::Consumer<'static, STDOUT_RING_SIZE>,
    ) -> Self {
        Self {
            stdin,
            stdout: SendPump::new(stdout_consumer),
            reporter: StatusReporter::new(),
            was_connected: false,
            legacy_unconditional_reply: false,
        }
    }

    /// Some older hosts reply to every GATT write with an ATT write response
    /// even when the write was sent without-response (spec §9 open question
    /// 2). Neither behavior is modeled as more "correct" than the other, so
    /// both paths are kept and selected with this flag rather than guessing;
    /// it defaults to off (reply only when the write actually asked for one).
    pub fn set_legacy_unconditional_reply(&mut self, enabled: bool) {
        self.legacy_unconditional_reply = enabled;
    }

    /// Whether a GATT write response should be sent for a write that asked
    /// for one (`with_response`) or not. Mirrors both upstream behaviors:
    /// legacy hosts reply unconditionally, everything else replies only to
    /// writes that requested a response.
    pub fn should_reply_to_write(&self, with_response: bool) -> bool {
        self.legacy_unconditional_reply || with_response
    }

    /// One scheduler tick's worth of BLE bus work: tracks connect/disconnect
    /// transitions, pumps stdout, and returns a status report to send if one
    /// is due.
    pub fn tick(
        &mut self,
        bt: &mut impl BluetoothDriver,
        status: &mut SystemStatus,
        program_id: u8,
        slot: u8,
        now: Instant,
    ) -> Option<StatusReport> {
        let connected = bt.is_connected();
        if connected && !self.was_connected {
            self.reporter.reset();
        } else if !connected && self.was_connected {
            self.stdout.reset();
        }
        self.was_connected = connected;

        if !connected {
            return None;
        }

        self.stdout.pump(bt);
        self.reporter.poll(status, program_id, slot, now)
    }

    /// Validates and decodes one GATT write (spec §4.6 "Framing contract").
    /// `program_running` gates writes into program storage while a user
    /// program is running.
    pub fn handle_command(&mut self, frame: &[u8], program_running: bool) -> Result<Command, PybricksError> {
        let cmd = opcode::parse_command(frame)?;
        match &cmd {
            Command::WriteUserProgramMeta { .. } | Command::WriteUserRam { .. } if program_running => {
                return Err(PybricksError::Busy);
            }
            Command::WriteStdin { data } => {
                let _ = self.stdin.grant_exact(data.len()).map(|mut g| {
                    g.copy_from_slice(data);
                    g.commit(data.len());
                });
            }
            _ => {}
        }
        Ok(cmd)
    }
}
