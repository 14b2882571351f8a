//! Registration table for polled file handles
//!
//! Every externally observable handle the reactor drives lives here:
//! the serial link, the TCP listener, client sockets, and any handles
//! drivers register. Entries record the handle, the readiness interest,
//! and an owner tag the daemon uses to dispatch the event.

use crate::error::{Error, Result};
use std::os::fd::RawFd;

/// Size of the handle table
pub const MAX_FDS: usize = 64;

/// Readiness interest for a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Who gets the callback when a handle becomes ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdOwner {
    /// The FPGA serial link
    Link,
    /// The control-plane TCP listener
    Listener,
    /// A client session, by connection index
    Session(usize),
    /// A driver-registered handle
    Slot { slot: usize, token: u32 },
}

/// Handle to a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdId {
    index: usize,
    seq: u32,
}

#[derive(Clone, Copy)]
struct FdEntry {
    fd: RawFd, // -1 marks a free entry
    interest: Interest,
    owner: FdOwner,
    seq: u32,
}

/// The handle registration table
pub struct FdTable {
    entries: Vec<FdEntry>,
}

impl FdTable {
    pub fn new() -> Self {
        let entries = vec![
            FdEntry {
                fd: -1,
                interest: Interest::Read,
                owner: FdOwner::Link,
                seq: 0,
            };
            MAX_FDS
        ];
        Self { entries }
    }

    /// Register a handle
    pub fn add(&mut self, fd: RawFd, interest: Interest, owner: FdOwner) -> Result<FdId> {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.fd < 0 {
                entry.fd = fd;
                entry.interest = interest;
                entry.owner = owner;
                entry.seq = entry.seq.wrapping_add(1);
                return Ok(FdId {
                    index,
                    seq: entry.seq,
                });
            }
        }
        Err(Error::PoolExhausted("file handle"))
    }

    /// Unregister; stale handles are ignored
    pub fn remove(&mut self, id: FdId) {
        let entry = &mut self.entries[id.index];
        if entry.seq == id.seq {
            entry.fd = -1;
        }
    }

    /// Unregister every handle owned by the given slot
    pub fn remove_slot(&mut self, slot: usize) {
        for entry in &mut self.entries {
            if entry.fd >= 0 {
                if let FdOwner::Slot { slot: s, .. } = entry.owner {
                    if s == slot {
                        entry.fd = -1;
                    }
                }
            }
        }
    }

    /// Iterate over the active registrations
    pub fn iter(&self) -> impl Iterator<Item = (RawFd, Interest, FdOwner)> + '_ {
        self.entries
            .iter()
            .filter(|e| e.fd >= 0)
            .map(|e| (e.fd, e.interest, e.owner))
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
