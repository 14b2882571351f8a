//! Core abstractions: slots, resources, drivers, and packet routing

pub mod driver;
pub mod router;
pub mod slot;

pub use driver::{Driver, Services};
pub use slot::{Core, Resource, Slot};
