//! Status reporter protothread (spec §4.6 "Status reporter"): watches
//! [`SystemStatus`]'s dirty flag and re-announces on a liveness guard even
//! when nothing changed, so a host that missed a notification resyncs
//! within one period.

use crate::config::STATUS_REPORT_LIVENESS_MS;
use crate::hal::Instant;
use crate::status::SystemStatus;

use super::opcode::StatusReport;

pub struct StatusReporter {
    last_sent: Option<Instant>,
}

impl StatusReporter {
    pub const fn new() -> Self {
        Self { last_sent: None }
    }

    /// Call every tick the link is up. Returns a report to queue for send
    /// when the status word changed since the last call, or the liveness
    /// guard period has elapsed.
    pub fn poll(
        &mut self,
        status: &mut SystemStatus,
        program_id: u8,
        slot: u8,
        now: Instant,
    ) -> Option<StatusReport> {
        let changed = status.take_dirty();
        let stale = self
            .last_sent
            .map(|t| now.saturating_since(t) >= STATUS_REPORT_LIVENESS_MS)
            .unwrap_or(true);
        if !changed && !stale {
            return None;
        }
        self.last_sent = Some(now);
        Some(StatusReport {
            flags: status.flags().bits(),
            program_id,
            slot,
        })
    }

    /// Link dropped; next link-up must send a fresh report regardless of
    /// liveness timing.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusFlags;

    #[test]
    fn change_triggers_immediate_report() {
        let mut status = SystemStatus::new();
        let mut reporter = StatusReporter::new();
        status.set(StatusFlags::USER_PROGRAM_RUNNING, true, Instant::from_millis(5));
        let r = reporter.poll(&mut status, 1, 2, Instant::from_millis(5)).unwrap();
        assert_eq!(r.flags, StatusFlags::USER_PROGRAM_RUNNING.bits());
    }

    #[test]
    fn liveness_guard_resends_without_change() {
        let mut status = SystemStatus::new();
        let mut reporter = StatusReporter::new();
        assert!(reporter.poll(&mut status, 0, 0, Instant::from_millis(0)).is_some());
        assert!(reporter.poll(&mut status, 0, 0, Instant::from_millis(100)).is_none());
        assert!(reporter
            .poll(&mut status, 0, 0, Instant::from_millis(600))
            .is_some());
    }
}
