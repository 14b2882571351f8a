//! Slot, resource, and core tables
//!
//! All three tables are fixed-capacity arenas indexed by small
//! integers. Cross-references between them are indices, never
//! pointers; "free" is a sentinel state, not a deallocation.

use crate::core::driver::Driver;

/// Number of driver slots
pub const MAX_SLOTS: usize = 16;
/// Number of peripheral cores in the FPGA image
pub const NUM_CORES: usize = 16;
/// Max resources per slot
pub const MAX_RESOURCES: usize = 8;

// Resource access flags
pub const FLAG_READ: u8 = 0x01;
pub const FLAG_WRITE: u8 = 0x02;
pub const FLAG_BROADCAST: u8 = 0x04;

/// Broadcast subscription key for a (slot, resource) pair
///
/// Deterministic and nonzero by construction, so zero can serve as the
/// "no subscribers" sentinel everywhere a key is stored.
pub fn broadcast_key(slot: usize, resource: usize) -> u32 {
    (slot * MAX_RESOURCES + resource + 1) as u32
}

/// A named user-visible value on a slot
pub struct Resource {
    pub name: &'static str,
    pub flags: u8,
    /// Connection index of a pending hardware read, if any
    pub ui_lock: Option<usize>,
    /// Nonzero while at least one session was subscribed; cleared
    /// lazily by the first fan-out that finds no subscribers
    pub bcast_key: u32,
}

impl Resource {
    pub fn new(name: &'static str, flags: u8) -> Self {
        Self {
            name,
            flags,
            ui_lock: None,
            bcast_key: 0,
        }
    }

    pub fn readable(&self) -> bool {
        self.flags & FLAG_READ != 0
    }

    pub fn writable(&self) -> bool {
        self.flags & FLAG_WRITE != 0
    }

    pub fn broadcasts(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }
}

/// One driver slot
///
/// `driver` is `None` both when the slot is free and, transiently,
/// while the driver is checked out for a callback; `occupied`
/// distinguishes the two.
pub struct Slot {
    pub index: usize,
    pub occupied: bool,
    /// Registry name the driver was created from
    pub driver_name: String,
    /// Display name, description, and help text set by the driver
    pub name: String,
    pub desc: String,
    pub help: String,
    pub driver: Option<Box<dyn Driver>>,
    pub resources: Vec<Resource>,
    /// The FPGA core this slot talks to, if any
    pub core: Option<usize>,
}

impl Slot {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            occupied: false,
            driver_name: String::new(),
            name: String::new(),
            desc: String::new(),
            help: String::new(),
            driver: None,
            resources: Vec::new(),
            // each core gets a slot by default, even if unused
            core: (index < NUM_CORES).then_some(index),
        }
    }

    /// Reset to the free state
    pub fn clear(&mut self) {
        let index = self.index;
        *self = Slot::new(index);
    }

    /// Index of the named resource within this slot
    pub fn find_resource(&self, name: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.name == name)
    }
}

/// One FPGA peripheral core
#[derive(Debug, Clone, Copy)]
pub struct Core {
    pub core_id: usize,
    /// Driver ID the board advertised for this core (0 = unknown)
    pub driver_id: u16,
    /// Slot that owns this core, if any
    pub slot: Option<usize>,
    /// Whether the owning driver accepts packets
    pub has_handler: bool,
}

impl Core {
    pub fn new(core_id: usize) -> Self {
        Self {
            core_id,
            driver_id: 0,
            slot: None,
            has_handler: false,
        }
    }
}
