//! Fixed-pool one-shot and periodic timers
//!
//! Timers are allocated from a bounded pool; a free entry is marked by
//! [`TimerKind::Unused`] rather than deallocated. Deadlines are
//! absolute monotonic instants. Handles carry a sequence number so a
//! cancel against a fired-and-reused entry is a no-op instead of
//! killing a stranger's timer.

use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// Size of the timer pool
pub const MAX_TIMERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Unused,
    OneShot,
    Periodic,
}

/// Who to call when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerOwner {
    pub slot: usize,
    pub token: u32,
}

/// Handle to a pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId {
    index: usize,
    seq: u32,
}

struct TimerEntry {
    kind: TimerKind,
    deadline: Instant,
    interval: Duration,
    owner: TimerOwner,
    seq: u32,
}

/// The timer pool
pub struct TimerTable {
    entries: Vec<TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        let now = Instant::now();
        let entries = (0..MAX_TIMERS)
            .map(|_| TimerEntry {
                kind: TimerKind::Unused,
                deadline: now,
                interval: Duration::ZERO,
                owner: TimerOwner { slot: 0, token: 0 },
                seq: 0,
            })
            .collect();
        Self { entries }
    }

    /// Arm a one-shot timer `ms` milliseconds from `now`
    pub fn add_oneshot(&mut self, now: Instant, ms: u64, owner: TimerOwner) -> Result<TimerId> {
        self.add(TimerKind::OneShot, now, ms, owner)
    }

    /// Arm a periodic timer with period `ms`, first firing `ms` from `now`
    pub fn add_periodic(&mut self, now: Instant, ms: u64, owner: TimerOwner) -> Result<TimerId> {
        self.add(TimerKind::Periodic, now, ms, owner)
    }

    fn add(
        &mut self,
        kind: TimerKind,
        now: Instant,
        ms: u64,
        owner: TimerOwner,
    ) -> Result<TimerId> {
        let interval = Duration::from_millis(ms);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.kind == TimerKind::Unused {
                entry.kind = kind;
                entry.deadline = now + interval;
                entry.interval = interval;
                entry.owner = owner;
                entry.seq = entry.seq.wrapping_add(1);
                return Ok(TimerId {
                    index,
                    seq: entry.seq,
                });
            }
        }
        Err(Error::PoolExhausted("timer"))
    }

    /// Cancel a timer; stale handles are ignored
    pub fn cancel(&mut self, id: TimerId) {
        let entry = &mut self.entries[id.index];
        if entry.seq == id.seq {
            entry.kind = TimerKind::Unused;
        }
    }

    /// Drop every timer owned by the given slot
    pub fn cancel_slot(&mut self, slot: usize) {
        for entry in &mut self.entries {
            if entry.kind != TimerKind::Unused && entry.owner.slot == slot {
                entry.kind = TimerKind::Unused;
            }
        }
    }

    /// Time until the soonest armed deadline, `None` with no timers
    ///
    /// An already-expired deadline yields a zero wait.
    pub fn next_wait(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .filter(|e| e.kind != TimerKind::Unused)
            .map(|e| e.deadline.saturating_duration_since(now))
            .min()
    }

    /// Collect owners of all expired timers
    ///
    /// One-shots are marked unused before their owner is reported, so
    /// the callback may re-arm freely. A periodic timer that ran late
    /// catches up with a single fire: the deadline advances by one
    /// interval and, if still in the past, snaps to `now + interval`.
    pub fn take_expired(&mut self, now: Instant, fired: &mut Vec<TimerOwner>) {
        for entry in &mut self.entries {
            if entry.kind == TimerKind::Unused || entry.deadline > now {
                continue;
            }
            match entry.kind {
                TimerKind::OneShot => {
                    entry.kind = TimerKind::Unused;
                }
                TimerKind::Periodic => {
                    entry.deadline += entry.interval;
                    if entry.deadline <= now {
                        entry.deadline = now + entry.interval;
                    }
                }
                TimerKind::Unused => unreachable!(),
            }
            fired.push(entry.owner);
        }
    }
}

impl Default for TimerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(token: u32) -> TimerOwner {
        TimerOwner { slot: 1, token }
    }

    #[test]
    fn test_oneshot_fires_once() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        timers.add_oneshot(t0, 100, owner(7)).unwrap();

        let mut fired = Vec::new();
        timers.take_expired(t0 + Duration::from_millis(50), &mut fired);
        assert!(fired.is_empty());

        timers.take_expired(t0 + Duration::from_millis(150), &mut fired);
        assert_eq!(fired, vec![owner(7)]);

        fired.clear();
        timers.take_expired(t0 + Duration::from_millis(500), &mut fired);
        assert!(fired.is_empty());
    }

    #[test]
    fn test_periodic_single_catch_up() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        timers.add_periodic(t0, 100, owner(1)).unwrap();

        // three intervals late: exactly one fire, then rearmed ahead
        let late = t0 + Duration::from_millis(350);
        let mut fired = Vec::new();
        timers.take_expired(late, &mut fired);
        assert_eq!(fired.len(), 1);

        fired.clear();
        timers.take_expired(late + Duration::from_millis(50), &mut fired);
        assert!(fired.is_empty());

        timers.take_expired(late + Duration::from_millis(110), &mut fired);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_cancel_and_stale_handle() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        let id = timers.add_oneshot(t0, 100, owner(1)).unwrap();
        timers.cancel(id);

        let mut fired = Vec::new();
        timers.take_expired(t0 + Duration::from_millis(200), &mut fired);
        assert!(fired.is_empty());

        // pool entry is reused with a fresh sequence; the stale handle
        // must not cancel the new timer
        let _id2 = timers.add_oneshot(t0, 100, owner(2)).unwrap();
        timers.cancel(id);
        timers.take_expired(t0 + Duration::from_millis(200), &mut fired);
        assert_eq!(fired, vec![owner(2)]);
    }

    #[test]
    fn test_next_wait() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        assert_eq!(timers.next_wait(t0), None);

        timers.add_oneshot(t0, 300, owner(1)).unwrap();
        timers.add_oneshot(t0, 100, owner(2)).unwrap();
        assert_eq!(timers.next_wait(t0), Some(Duration::from_millis(100)));

        // expired deadline reports a zero wait, not a panic
        assert_eq!(
            timers.next_wait(t0 + Duration::from_millis(150)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_pool_exhaustion() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        for i in 0..MAX_TIMERS {
            timers.add_oneshot(t0, 100, owner(i as u32)).unwrap();
        }
        assert!(timers.add_oneshot(t0, 100, owner(99)).is_err());
    }

    #[test]
    fn test_cancel_slot() {
        let t0 = Instant::now();
        let mut timers = TimerTable::new();
        timers.add_oneshot(t0, 10, TimerOwner { slot: 1, token: 0 }).unwrap();
        timers.add_oneshot(t0, 10, TimerOwner { slot: 2, token: 0 }).unwrap();
        timers.cancel_slot(1);

        let mut fired = Vec::new();
        timers.take_expired(t0 + Duration::from_millis(20), &mut fired);
        assert_eq!(fired, vec![TimerOwner { slot: 2, token: 0 }]);
    }
}
