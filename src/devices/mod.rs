//! Peripheral driver implementations and the driver registry
//!
//! Drivers are statically compiled and created by name; the `loadso`
//! control verb and the enumerator's driver-ID table both resolve
//! through [`create_driver`]. To add a peripheral, implement
//! [`crate::core::Driver`] and register it here.

use crate::core::driver::Driver;

pub mod basys3;
pub mod bb4io;
pub mod enumerator;
pub mod out4;

pub use basys3::Basys3;
pub use bb4io::Bb4io;
pub use enumerator::Enumerator;
pub use out4::Out4;

// Driver IDs as advertised in the FPGA image's driver-ID table
pub const DRIVER_ID_NULL: u16 = 1;
pub const DRIVER_ID_OUT4: u16 = 24;
pub const DRIVER_ID_BB4IO: u16 = 42;
pub const DRIVER_ID_BASYS3: u16 = 47;

/// Instantiate a registry driver by name
pub fn create_driver(name: &str) -> Option<Box<dyn Driver>> {
    match name {
        "enumerator" => Some(Box::new(Enumerator::new())),
        "out4" => Some(Box::new(Out4::new())),
        "bb4io" => Some(Box::new(Bb4io::new())),
        "basys3" => Some(Box::new(Basys3::new())),
        _ => None,
    }
}

/// Registry name for an advertised driver ID
///
/// The null driver marks an unpopulated core and loads nothing.
pub fn driver_name_for_id(id: u16) -> Option<&'static str> {
    match id {
        DRIVER_ID_OUT4 => Some("out4"),
        DRIVER_ID_BB4IO => Some("bb4io"),
        DRIVER_ID_BASYS3 => Some("basys3"),
        _ => None,
    }
}
