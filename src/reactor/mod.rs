//! Single-threaded event reactor
//!
//! One poll(2) call is the only place the daemon blocks. Each
//! iteration computes a bounded wait from the timer pool, polls every
//! registered handle, then reports expired timers and ready handles as
//! [`Event`]s for the daemon to dispatch. Callbacks run to completion
//! and may freely add or remove registrations, including their own.

pub mod fdtab;
pub mod timer;

use crate::error::Result;
use fdtab::{FdOwner, FdTable, Interest};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};
use timer::{TimerOwner, TimerTable};

/// Upper bound on one poll wait
///
/// Keeps the loop responsive to the shutdown flag and to transports
/// that have no pollable handle, without busy-waiting when the daemon
/// is otherwise idle.
pub const MAX_POLL_WAIT: Duration = Duration::from_millis(500);

/// Readiness kind delivered with a handle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
}

/// One dispatchable occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Fd(FdOwner, Readiness),
    Timer(TimerOwner),
}

/// Handle registrations plus the timer pool
pub struct Reactor {
    pub fds: FdTable,
    pub timers: TimerTable,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            fds: FdTable::new(),
            timers: TimerTable::new(),
        }
    }

    /// Block until something is ready or the bounded wait elapses
    ///
    /// Expired timers are reported before handle events so a watchdog
    /// that races its own ack loses deterministically.
    pub fn wait(&mut self, events: &mut Vec<Event>) -> Result<()> {
        let now = Instant::now();
        let wait = self
            .timers
            .next_wait(now)
            .unwrap_or(MAX_POLL_WAIT)
            .min(MAX_POLL_WAIT);

        let owners: Vec<(i32, Interest, FdOwner)> = self.fds.iter().collect();
        let mut pollfds: Vec<PollFd> = owners
            .iter()
            .map(|&(fd, interest, _)| {
                let flags = match interest {
                    Interest::Read => PollFlags::POLLIN,
                    Interest::Write => PollFlags::POLLOUT,
                };
                // registered fds stay open for the duration of the call
                PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, flags)
            })
            .collect();

        let timeout = PollTimeout::from(wait.as_millis().min(u16::MAX as u128) as u16);
        match poll(&mut pollfds, timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(()),
            Err(e) => return Err(std::io::Error::from(e).into()),
        }

        let now = Instant::now();
        let mut fired = Vec::new();
        self.timers.take_expired(now, &mut fired);
        events.extend(fired.into_iter().map(Event::Timer));

        for (pollfd, &(_, interest, owner)) in pollfds.iter().zip(owners.iter()) {
            let revents = pollfd.revents().unwrap_or(PollFlags::empty());
            let ready = match interest {
                // errors and hangups surface through the read path
                Interest::Read => revents
                    .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR),
                Interest::Write => revents
                    .intersects(PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR),
            };
            if ready {
                let kind = match interest {
                    Interest::Read => Readiness::Readable,
                    Interest::Write => Readiness::Writable,
                };
                events.push(Event::Fd(owner, kind));
            }
        }
        Ok(())
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_timer_only_wait() {
        let mut reactor = Reactor::new();
        let now = Instant::now();
        reactor
            .timers
            .add_oneshot(now, 10, TimerOwner { slot: 0, token: 5 })
            .unwrap();

        let mut events = Vec::new();
        // two rounds bound the wait even if poll returns early
        for _ in 0..2 {
            reactor.wait(&mut events).unwrap();
            if !events.is_empty() {
                break;
            }
        }
        assert_eq!(
            events,
            vec![Event::Timer(TimerOwner { slot: 0, token: 5 })]
        );
    }

    #[test]
    fn test_fd_readable_event() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.write_all(b"x").unwrap();

        let mut reactor = Reactor::new();
        reactor
            .fds
            .add(server.as_raw_fd(), Interest::Read, FdOwner::Session(3))
            .unwrap();

        let mut events = Vec::new();
        reactor.wait(&mut events).unwrap();
        assert!(events
            .iter()
            .any(|e| *e == Event::Fd(FdOwner::Session(3), Readiness::Readable)));
    }
}
