//! Suspension primitives a process's own `poll` embeds in its state, rather
//! than methods the scheduler exposes, since the scheduler never looks
//! inside a process (spec §4.1, §5).

use crate::hal::{Clock, Instant};

/// A one-shot deadline: "don't consider me ready again until `now >= at`".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
}

impl Deadline {
    pub fn after_millis(now: Instant, delay_ms: u32) -> Self {
        Self {
            at: now.add_millis(delay_ms),
        }
    }

    /// `now >= self.at`, tolerant of millisecond-counter wraparound: elapsed
    /// time since the deadline is treated as non-negative as long as it's
    /// less than half the counter's range, which covers any realistic timer
    /// delay and avoids overflow artifacts at the wrap point.
    pub fn has_elapsed(&self, now: Instant) -> bool {
        now.saturating_since(self.at) < u32::MAX / 2
    }
}

/// Rearmable single-shot timer, the `await_timer` building block. A process
/// calls [`Timer::start`] before returning `Pending`, and checks
/// [`Timer::poll`] on its next dispatch; `poll` returns `true` at most once
/// per `start` (it disarms itself), matching a one-shot alarm rather than a
/// free-running periodic tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    deadline: Option<Deadline>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    pub fn start(&mut self, now: Instant, delay_ms: u32) {
        self.deadline = Some(Deadline::after_millis(now, delay_ms));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns `true` the first time `now` is past the armed deadline, then
    /// disarms. Returns `false` if not armed or not yet due.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(d) if d.has_elapsed(now) => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// A level-triggered condition a process re-checks on every dispatch until
/// it holds, the `await_condition` building block (spec §4.1). This does not
/// itself evaluate the predicate (keeping it free of a `dyn Fn` in a
/// `no_std`, no-alloc context); it only tracks whether the process is
/// currently waiting, so callers write:
/// ```ignore
/// if self.waiting.armed() {
///     if !predicate() { return Poll::Pending; }
///     self.waiting.clear();
/// }
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Condition {
    armed: bool,
}

impl Condition {
    pub const fn new() -> Self {
        Self { armed: false }
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn clear(&mut self) {
        self.armed = false;
    }

    pub fn armed(&self) -> bool {
        self.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::FakeClock;

    #[test]
    fn timer_fires_once_after_delay() {
        let clock = FakeClock(Instant::from_millis(0));
        let mut t = Timer::new();
        t.start(clock.now(), 100);
        assert!(!t.poll(Instant::from_millis(50)));
        assert!(t.poll(Instant::from_millis(100)));
        // Disarmed: further polls at/after the deadline report nothing, since
        // there's no armed deadline left to compare against.
        assert!(!t.poll(Instant::from_millis(200)));
    }

    #[test]
    fn timer_not_due_before_deadline() {
        let mut t = Timer::new();
        t.start(Instant::from_millis(1000), 50);
        assert!(t.is_armed());
        assert!(!t.poll(Instant::from_millis(1049)));
        assert!(t.is_armed());
    }

    #[test]
    fn condition_tracks_arm_state_only() {
        let mut c = Condition::new();
        assert!(!c.armed());
        c.arm();
        assert!(c.armed());
        c.clear();
        assert!(!c.armed());
    }
}
