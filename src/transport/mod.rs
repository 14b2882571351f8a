//! Transport layer for the FPGA serial link

use crate::error::Result;
use std::os::fd::RawFd;

mod serial;
pub use serial::SerialTransport;

mod mock;
pub use mock::MockTransport;

/// Byte transport to the FPGA board
///
/// `read` returning `Ok(0)` means "no bytes right now, try again after
/// the next readiness notification"; end of stream and hard failures are
/// errors. `write` may accept fewer bytes than offered when the port
/// buffer is full.
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Raw file descriptor for readiness polling
    ///
    /// `None` means the transport has no pollable handle (mock); the
    /// reactor then pumps it on every iteration instead.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}
