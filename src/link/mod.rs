//! Framed binary link to the FPGA board
//!
//! Owns the serial transport, the frame decoder, and the transmit path.
//! At most one packet is in flight per caller: a transmit that would
//! block reports [`Error::LinkBusy`] and nothing is buffered — the
//! caller arms a timer and retries with its own state intact.

pub mod frame;
pub mod packet;

use crate::error::{Error, Result};
use crate::transport::Transport;
use frame::{encode_frame, Decoded, FrameDecoder};
use packet::{Packet, MAX_DATA_SIZE, TX_CMD_TAG, TX_CORE_TAG};
use std::os::fd::RawFd;

/// Read chunk size for the serial port
const READ_CHUNK: usize = 4096;

/// The serial link to the FPGA
pub struct FpgaLink {
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    port_name: String,
}

impl FpgaLink {
    pub fn new(transport: Box<dyn Transport>, port_name: &str) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            port_name: port_name.to_string(),
        }
    }

    /// Name of the underlying port, for log messages
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Pollable descriptor of the transport, if it has one
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.transport.raw_fd()
    }

    /// Transmit one packet to the given core
    ///
    /// Applies the sanity tags, frames, and writes in a single attempt.
    /// A partial write loses the frame and reports busy, matching the
    /// board protocol's expectation that the caller retries the whole
    /// packet later.
    pub fn send_packet(&mut self, core: u8, pkt: &Packet) -> Result<()> {
        // writes carry count data bytes; reads carry none (count is the
        // number of bytes requested from the peripheral)
        let count_ok = match pkt.op() {
            packet::CMD_OP_WRITE => pkt.data.len() == pkt.count as usize,
            packet::CMD_OP_READ => pkt.data.is_empty(),
            _ => true,
        };
        if pkt.data.len() > MAX_DATA_SIZE || !count_ok {
            return Err(Error::Other(format!(
                "malformed packet for core {}: count={} data={}",
                core,
                pkt.count,
                pkt.data.len()
            )));
        }

        let mut raw = Vec::with_capacity(4 + pkt.data.len());
        raw.push(pkt.cmd | TX_CMD_TAG);
        raw.push(core | TX_CORE_TAG);
        raw.push(pkt.reg);
        raw.push(pkt.count);
        raw.extend_from_slice(&pkt.data);

        let wire = encode_frame(&raw);
        log::trace!(">> {:02x?}", wire);

        let sent = self.transport.write(&wire)?;
        if sent != wire.len() {
            log::debug!(
                "short write to {} ({} of {} bytes)",
                self.port_name,
                sent,
                wire.len()
            );
            return Err(Error::LinkBusy);
        }
        Ok(())
    }

    /// Drain available serial bytes, returning any completed frames
    ///
    /// Short reads are normal; whatever fraction of a frame arrives is
    /// held in the decoder until the next call. Protocol violations are
    /// logged here and the partial frame dropped.
    pub fn pump(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        loop {
            let mut buf = [0u8; READ_CHUNK];
            let n = self.transport.read(&mut buf)?;
            if n == 0 {
                return Ok(frames);
            }
            for &b in &buf[..n] {
                match self.decoder.feed(b) {
                    Decoded::Pending => {}
                    Decoded::Frame(f) => {
                        log::trace!("<< {:02x?}", f);
                        frames.push(f);
                    }
                    Decoded::ProtocolError => {
                        log::warn!("framing protocol error on {}", self.port_name);
                    }
                }
            }
            if n < READ_CHUNK {
                return Ok(frames);
            }
        }
    }
}
