//! Driver trait and the service context drivers call back into
//!
//! A driver is a value plugged into a slot. The daemon checks it out of
//! the slot for the duration of one callback and hands it a
//! [`Services`] context scoped to that slot; everything a driver may do
//! to the outside world goes through that context. Drivers never
//! block: an operation that must wait registers a timer or a handle
//! and resumes in a later callback.

use crate::core::slot::{broadcast_key, Resource, MAX_RESOURCES, NUM_CORES};
use crate::daemon::Daemon;
use crate::error::{Error, Result};
use crate::link::packet::Packet;
use crate::reactor::fdtab::{FdId, FdOwner, Interest};
use crate::reactor::timer::{TimerId, TimerOwner};
use crate::reactor::Readiness;
use std::os::fd::RawFd;
use std::time::Instant;

/// User-visible error for a transmit the link refused
pub const ERR_LINK_WRITE: &str = "ERROR 100 : cannot write to the FPGA link. Is the link overloaded?\n";
/// User-visible error for a write the board never acknowledged
pub const ERR_MISSING_ACK: &str = "ERROR 101 : missing ACK from the FPGA. Is the link overloaded?\n";

/// Watchdog interval for write acknowledgements
pub const ACK_TIMEOUT_MS: u64 = 100;

/// A peripheral driver
///
/// `initialize` is called once when the driver is loaded into a slot;
/// it must set the slot identity, register resources, and (for
/// FPGA-backed drivers) bind the slot's core. The remaining callbacks
/// are dispatched by the reactor. `on_get`/`on_set` return the text to
/// show the issuing client; an empty string means no output (used by
/// async reads and fire-and-forget writes).
pub trait Driver: Send {
    fn initialize(&mut self, ctx: &mut Services<'_>) -> Result<()>;

    /// A validated packet arrived for this slot's core
    fn on_packet(&mut self, ctx: &mut Services<'_>, pkt: &Packet) {
        let _ = (ctx, pkt);
    }

    /// `get` on one of this slot's resources
    fn on_get(&mut self, ctx: &mut Services<'_>, rsc: usize) -> Result<String> {
        let _ = (ctx, rsc);
        Ok("get not supported\n".to_string())
    }

    /// `set` on one of this slot's resources; `args` is the remainder
    /// of the command line
    fn on_set(&mut self, ctx: &mut Services<'_>, rsc: usize, args: &str) -> Result<String> {
        let _ = (ctx, rsc, args);
        Ok("set not supported\n".to_string())
    }

    /// A timer armed by this driver fired
    fn on_timer(&mut self, ctx: &mut Services<'_>, token: u32) {
        let _ = (ctx, token);
    }

    /// A handle registered by this driver became ready
    fn on_fd(&mut self, ctx: &mut Services<'_>, token: u32, readiness: Readiness) {
        let _ = (ctx, token, readiness);
    }
}

/// Driver-facing view of the daemon, scoped to one slot
pub struct Services<'a> {
    pub(crate) daemon: &'a mut Daemon,
    pub(crate) slot: usize,
    pub(crate) session: Option<usize>,
}

impl Services<'_> {
    /// Index of the slot this driver occupies
    pub fn slot_index(&self) -> usize {
        self.slot
    }

    /// Connection index of the client that issued the current
    /// `get`/`set`, if any
    pub fn session(&self) -> Option<usize> {
        self.session
    }

    // ------------------------------------------------------------------
    // Init-time registration
    // ------------------------------------------------------------------

    /// Set the slot's display name, description, and help text
    pub fn set_identity(&mut self, name: &str, desc: &str, help: &str) {
        let slot = &mut self.daemon.slots[self.slot];
        slot.name = name.to_string();
        slot.desc = desc.to_string();
        slot.help = help.to_string();
    }

    /// Register a resource; returns its index within the slot
    ///
    /// The resource set is fixed for the driver's lifetime, so this is
    /// only valid during `initialize`.
    pub fn add_resource(&mut self, name: &'static str, flags: u8) -> Result<usize> {
        let slot = &mut self.daemon.slots[self.slot];
        if slot.resources.len() >= MAX_RESOURCES {
            return Err(Error::PoolExhausted("resource"));
        }
        slot.resources.push(Resource::new(name, flags));
        Ok(slot.resources.len() - 1)
    }

    /// Claim the slot's assigned core for packet delivery
    ///
    /// Returns the core index. Packets arriving for that core are then
    /// dispatched to this driver's `on_packet`. A core already owned by
    /// another slot cannot be rebound; stealing it would cut the owner
    /// off from its acks and read responses.
    pub fn bind_core(&mut self) -> Result<usize> {
        let core = self.daemon.slots[self.slot]
            .core
            .ok_or_else(|| Error::Other(format!("slot {} has no core", self.slot)))?;
        let entry = &mut self.daemon.cores[core];
        if let Some(owner) = entry.slot {
            if owner != self.slot {
                return Err(Error::Other(format!(
                    "core {} is already owned by slot {}",
                    core, owner
                )));
            }
        }
        entry.slot = Some(self.slot);
        entry.has_handler = true;
        Ok(core)
    }

    /// Slot currently owning a core, if any
    pub fn core_owner(&self, core: usize) -> Option<usize> {
        self.daemon.cores.get(core)?.slot
    }

    // ------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------

    /// Transmit a packet to this slot's core
    pub fn send_packet(&mut self, pkt: &Packet) -> Result<()> {
        let core = self.daemon.slots[self.slot]
            .core
            .ok_or_else(|| Error::Other(format!("slot {} has no core", self.slot)))?;
        self.daemon.link.send_packet(core as u8, pkt)
    }

    // ------------------------------------------------------------------
    // Timers and handles
    // ------------------------------------------------------------------

    /// Arm a one-shot timer owned by this slot
    pub fn add_oneshot(&mut self, ms: u64, token: u32) -> Result<TimerId> {
        let owner = TimerOwner {
            slot: self.slot,
            token,
        };
        self.daemon
            .reactor
            .timers
            .add_oneshot(Instant::now(), ms, owner)
    }

    /// Arm a periodic timer owned by this slot
    pub fn add_periodic(&mut self, ms: u64, token: u32) -> Result<TimerId> {
        let owner = TimerOwner {
            slot: self.slot,
            token,
        };
        self.daemon
            .reactor
            .timers
            .add_periodic(Instant::now(), ms, owner)
    }

    /// Cancel a timer; stale handles are ignored
    pub fn del_timer(&mut self, id: TimerId) {
        self.daemon.reactor.timers.cancel(id);
    }

    /// Register an external handle owned by this slot
    pub fn add_fd(&mut self, fd: RawFd, interest: Interest, token: u32) -> Result<FdId> {
        let owner = FdOwner::Slot {
            slot: self.slot,
            token,
        };
        self.daemon.reactor.fds.add(fd, interest, owner)
    }

    /// Unregister a handle
    pub fn del_fd(&mut self, id: FdId) {
        self.daemon.reactor.fds.remove(id);
    }

    // ------------------------------------------------------------------
    // Client I/O
    // ------------------------------------------------------------------

    /// Targeted reply to one session (used to resume a locked read)
    pub fn send_ui(&mut self, session: usize, text: &str) {
        self.daemon.write_session(session, text.as_bytes());
    }

    /// Emit the prompt byte on one session
    pub fn prompt(&mut self, session: usize) {
        self.daemon.write_session(session, &[crate::ui::session::PROMPT]);
    }

    /// Pending-read lock on one of this slot's resources
    pub fn ui_lock(&self, rsc: usize) -> Option<usize> {
        self.daemon.slots[self.slot].resources[rsc].ui_lock
    }

    /// Set or clear the pending-read lock
    pub fn set_ui_lock(&mut self, rsc: usize, session: Option<usize>) {
        self.daemon.slots[self.slot].resources[rsc].ui_lock = session;
    }

    /// Whether anyone is subscribed to this resource's broadcasts
    ///
    /// Drivers check this before formatting a payload so unmonitored
    /// streams cost nothing.
    pub fn has_subscribers(&self, rsc: usize) -> bool {
        self.daemon.slots[self.slot].resources[rsc].bcast_key != 0
    }

    /// Fan a payload out to every subscribed session
    ///
    /// When no active session matches the key, the resource key is
    /// cleared so the next publish attempt skips the formatting work.
    pub fn broadcast(&mut self, rsc: usize, payload: &[u8]) {
        let key = self.daemon.slots[self.slot].resources[rsc].bcast_key;
        if key == 0 {
            return;
        }
        debug_assert_eq!(key, broadcast_key(self.slot, rsc));
        let delivered = self.daemon.fan_out(key, payload);
        if delivered == 0 {
            self.daemon.slots[self.slot].resources[rsc].bcast_key = 0;
        }
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Load a registry driver into a free slot bound to `core`
    ///
    /// Records the advertised driver ID on the core. Used by the
    /// enumerator while it walks the board's driver-ID table.
    pub fn load_driver_at_core(
        &mut self,
        core: usize,
        driver_id: u16,
        name: &str,
    ) -> Result<usize> {
        if core >= NUM_CORES {
            return Err(Error::Other(format!("core {} out of range", core)));
        }
        self.daemon.cores[core].driver_id = driver_id;
        self.daemon.load_driver(None, name, Some(core))
    }

    /// Record the driver ID the board advertised for a core
    pub fn set_core_driver_id(&mut self, core: usize, driver_id: u16) {
        if core < NUM_CORES {
            self.daemon.cores[core].driver_id = driver_id;
        }
    }

    /// The core table as advertised by the board
    pub fn core_driver_ids(&self) -> Vec<(usize, u16)> {
        self.daemon
            .cores
            .iter()
            .map(|c| (c.core_id, c.driver_id))
            .collect()
    }
}
