//! C1: cooperative task runtime (spec §4.1, §5, §9 Design Notes).
//!
//! There is no preemption and no per-task stack. Every "process" in the
//! upstream sense is, here, a Rust value whose `poll` method is an explicit
//! state machine: it runs forward from wherever it last suspended and
//! returns [`Poll::Pending`] (nothing more to do until woken) or
//! [`Poll::Ready`] (finished this dispatch; does not mean terminated).
//! `await_timer`/`await_condition`/`await_event` are not methods on the
//! scheduler — they are how a process's own `poll` decides to return
//! `Pending` — so they live in [`timer`] as small reusable helpers that
//! concrete processes (C3's sync state machine, C8's supervisor, the BLE
//! status reporter) embed in their own state.
//!
//! IRQ handlers only ever call [`Scheduler::poll`] or [`Scheduler::post`];
//! per spec §5 they must never touch process state directly.

mod timer;

pub use timer::{Condition, Deadline, Timer};

use heapless::Deque;

/// Identifies a process within a [`Scheduler`]. Indices are assigned by the
/// firmware binary at startup and never reused, matching "created at
/// startup, never destroyed" (spec §3 Process).
pub type ProcessId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum EventKind {
    TimerExpired,
    Poll,
    Message,
    StatusChanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub struct Event {
    pub kind: EventKind,
    pub data: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum Target {
    One(ProcessId),
    Broadcast,
}

/// What [`Scheduler::run_one`] dispatched, so the caller's match-on-pid loop
/// knows why a process is being polled this round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub pid: ProcessId,
    pub event: Option<Event>,
}

const MAX_QUEUED_EVENTS: usize = 32;

struct QueuedEvent {
    target: Target,
    event: Event,
}

/// The event loop substrate. Generic over `N`, the number of statically
/// known processes.
pub struct Scheduler<const N: usize> {
    ready: [bool; N],
    queue: Deque<QueuedEvent, MAX_QUEUED_EVENTS>,
    /// For a broadcast event, which processes have not yet observed it. We
    /// re-post a broadcast as N individual deliveries at drain time so each
    /// process sees it exactly once, preserving "delivered to every
    /// subscribed process before the loop sleeps" (spec §5).
}

impl<const N: usize> Scheduler<N> {
    pub const fn new() -> Self {
        Self {
            ready: [false; N],
            queue: Deque::new(),
        }
    }

    /// Mark `pid` ready to run. IRQ-safe: only ever flips a flag.
    pub fn poll(&mut self, pid: ProcessId) {
        self.ready[pid] = true;
    }

    /// Start a process for the first time; equivalent to an initial poll.
    pub fn start(&mut self, pid: ProcessId) {
        self.poll(pid);
    }

    /// Enqueue an event. A broadcast is expanded into one unicast delivery
    /// per known process at post time, so each one observes it exactly once
    /// and in the same relative order as any other event already queued for
    /// it (spec §5: "broadcast events are delivered to every subscribed
    /// process before the loop sleeps"). Returns `Err(())` if the queue is
    /// full (treat like any other dropped-IRQ-data overrun).
    pub fn post(&mut self, target: Target, kind: EventKind, data: u32) -> Result<(), ()> {
        match target {
            Target::One(pid) => self.push(pid, Event { kind, data }),
            Target::Broadcast => {
                for pid in 0..N {
                    self.push(pid, Event { kind, data })?;
                }
                Ok(())
            }
        }
    }

    fn push(&mut self, pid: ProcessId, event: Event) -> Result<(), ()> {
        self.queue
            .push_back(QueuedEvent {
                target: Target::One(pid),
                event,
            })
            .map_err(|_| ())
    }

    /// Pops and returns the next thing to dispatch, preferring queued
    /// events (in FIFO order) over bare ready-flags, so a process with both
    /// a pending event and a poll request sees the event first.
    fn next_dispatch(&mut self) -> Option<Dispatch> {
        if let Some(qe) = self.queue.pop_front() {
            let Target::One(pid) = qe.target else {
                unreachable!("broadcasts are expanded to unicasts at post time")
            };
            return Some(Dispatch {
                pid,
                event: Some(qe.event),
            });
        }
        for pid in 0..N {
            if self.ready[pid] {
                self.ready[pid] = false;
                return Some(Dispatch { pid, event: None });
            }
        }
        None
    }

    /// Drains exactly one unit of work (one queued event or one ready
    /// process), calling `handler(pid, event)`. Returns `true` if more work
    /// remains after this call.
    pub fn run_one(&mut self, mut handler: impl FnMut(ProcessId, Option<Event>)) -> bool {
        match self.next_dispatch() {
            Some(d) => {
                handler(d.pid, d.event);
                self.has_work()
            }
            None => false,
        }
    }

    pub fn has_work(&self) -> bool {
        !self.queue.is_empty() || self.ready.iter().any(|r| *r)
    }

    /// Drains all pending work, then returns. The caller is expected to
    /// sleep (e.g. `wfi`) after this returns, until the next IRQ calls
    /// `poll`/`post` again.
    pub fn run_and_wait(&mut self, mut handler: impl FnMut(ProcessId, Option<Event>)) {
        while self.run_one(&mut handler) {}
    }
}

/// Counts outstanding asynchronous deinit/init work (spec §4.8 boot/shutdown:
/// "wait for `init_busy_count == 0`"), the same shape as upstream's
/// `pbio_busy_count_up`/`_down` used by the storage deinit process and
/// device init. Boot/shutdown gate on [`Self::is_idle`] rather than waiting
/// on a fixed number of processes, since which ones are outstanding varies
/// by board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusyCount(u32);

impl BusyCount {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn up(&mut self) {
        self.0 += 1;
    }

    pub fn down(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }

    pub fn is_idle(&self) -> bool {
        self.0 == 0
    }
}

impl Target {
    /// Broadcasting must expand into one unicast event per known process so
    /// each one observes it exactly once; `post_broadcast` does this
    /// directly rather than relying on `Scheduler`'s queue to fan out.
    pub fn all(n: usize) -> impl Iterator<Item = Target> {
        (0..n).map(Target::One)
    }
}

impl<const N: usize> Scheduler<N> {
    /// Posts a broadcast event to every process (spec §5: "broadcast events
    /// are delivered to every subscribed process before the loop sleeps").
    pub fn post_broadcast(&mut self, kind: EventKind, data: u32) -> Result<(), ()> {
        for target in Target::all(N) {
            self.post(target, kind, data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_dispatches_before_next_sleep() {
        // Testable property #5 (spec §8): a process that calls poll(p) is
        // dispatched at least once before the next run_and_wait returns to
        // the sleep path.
        let mut sched: Scheduler<3> = Scheduler::new();
        sched.poll(1);
        let mut dispatched = [false; 3];
        sched.run_and_wait(|pid, _| dispatched[pid] = true);
        assert!(dispatched[1]);
        assert!(!sched.has_work());
    }

    #[test]
    fn events_are_fifo_per_target() {
        let mut sched: Scheduler<2> = Scheduler::new();
        sched.post(Target::One(0), EventKind::Message, 1).unwrap();
        sched.post(Target::One(0), EventKind::Message, 2).unwrap();
        let mut seen = heapless::Vec::<u32, 4>::new();
        sched.run_and_wait(|_, ev| {
            if let Some(e) = ev {
                seen.push(e.data).ok();
            }
        });
        assert_eq!(seen.as_slice(), &[1, 2]);
    }

    #[test]
    fn broadcast_reaches_every_process_before_sleep() {
        let mut sched: Scheduler<4> = Scheduler::new();
        sched.post_broadcast(EventKind::StatusChanged, 7).unwrap();
        let mut got = [false; 4];
        sched.run_and_wait(|pid, ev| {
            if ev.is_some() {
                got[pid] = true;
            }
        });
        assert!(got.iter().all(|g| *g));
    }

    #[test]
    fn run_one_reports_remaining_work() {
        let mut sched: Scheduler<2> = Scheduler::new();
        sched.poll(0);
        sched.poll(1);
        let more = sched.run_one(|_, _| {});
        assert!(more);
        let more = sched.run_one(|_, _| {});
        assert!(!more);
    }
}
