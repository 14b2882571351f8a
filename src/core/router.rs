//! Inbound packet validation
//!
//! Every frame the link layer delivers runs through [`check_frame`]
//! before any driver sees it: length, CRC, op-code, core range, and
//! the requested/returned/remaining accounting on read responses.
//! Anything that fails is logged by the caller and dropped; a frame
//! that passes becomes a [`Packet`] addressed to a core.

use crate::core::slot::NUM_CORES;
use crate::link::frame::crc16;
use crate::link::packet::{Packet, CMD_OP_MASK, CMD_OP_READ, CORE_MASK};

/// Why a frame was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than a 4-byte header plus 2-byte CRC
    Runt,
    /// CRC over the whole frame did not come out zero
    Crc,
    /// Neither a read response nor a write acknowledgement
    BadOp,
    /// Core index outside the core table
    BadCore,
    /// Read response whose count accounting is inconsistent
    BadCount,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FrameError::Runt => "runt frame",
            FrameError::Crc => "CRC mismatch",
            FrameError::BadOp => "invalid op code",
            FrameError::BadCore => "core out of range",
            FrameError::BadCount => "bad read count accounting",
        };
        f.write_str(text)
    }
}

/// Validate a decoded frame and produce a routed packet
///
/// `frame` is the un-stuffed frame: packet bytes followed by the CRC
/// trailer. The returned packet has the core sanity nibble masked off
/// and the CRC stripped; read-response data keeps its trailing
/// *remaining* byte (the count of requested bytes the board could not
/// supply).
pub fn check_frame(frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < 6 {
        return Err(FrameError::Runt);
    }
    if crc16(frame) != 0 {
        return Err(FrameError::Crc);
    }

    let cmd = frame[0];
    if cmd & CMD_OP_MASK == 0 {
        return Err(FrameError::BadOp);
    }

    let core = frame[1] & CORE_MASK;
    if core as usize >= NUM_CORES {
        return Err(FrameError::BadCore);
    }

    let count = frame[3];
    if cmd & CMD_OP_READ != 0 {
        // data layout: returned bytes, remaining byte, 2 CRC bytes
        let returned = frame.len() as i32 - 7;
        if returned < 0 {
            return Err(FrameError::BadCount);
        }
        let remaining = frame[frame.len() - 3] as i32;
        if remaining != count as i32 - returned {
            return Err(FrameError::BadCount);
        }
    }

    Ok(Packet {
        cmd,
        core,
        reg: frame[2],
        count,
        data: frame[4..frame.len() - 2].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::packet::{CMD_AUTO_MASK, CMD_OP_WRITE};

    /// Compose raw frame bytes with a correct CRC trailer
    fn framed(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        let crc = crc16(bytes);
        out.push((crc >> 8) as u8);
        out.push(crc as u8);
        out
    }

    #[test]
    fn test_runt_rejected() {
        assert_eq!(check_frame(&[0x08, 0x01, 0x00]), Err(FrameError::Runt));
    }

    #[test]
    fn test_crc_mismatch_rejected() {
        let mut frame = framed(&[CMD_OP_WRITE, 0x01, 0x00, 0x01, 0x0F]);
        *frame.last_mut().unwrap() ^= 0xFF;
        assert_eq!(check_frame(&frame), Err(FrameError::Crc));
    }

    #[test]
    fn test_nop_op_rejected() {
        let frame = framed(&[0x00, 0x01, 0x00, 0x01, 0x0F]);
        assert_eq!(check_frame(&frame), Err(FrameError::BadOp));
    }

    #[test]
    fn test_write_ack_routes() {
        let frame = framed(&[CMD_OP_WRITE, 0xE3, 0x00, 0x01, 0x0F]);
        let pkt = check_frame(&frame).unwrap();
        assert_eq!(pkt.core, 3); // sanity nibble masked off
        assert_eq!(pkt.reg, 0);
        assert_eq!(pkt.count, 1);
        assert_eq!(pkt.data, vec![0x0F]);
        assert!(pkt.is_write_ack());
    }

    #[test]
    fn test_complete_read_response_routes() {
        // 3 requested, 3 returned, remaining 0
        let frame = framed(&[0x04, 0x02, 0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x00]);
        let pkt = check_frame(&frame).unwrap();
        assert!(pkt.is_read_response());
        assert_eq!(pkt.data, vec![0xAA, 0xBB, 0xCC, 0x00]);
    }

    #[test]
    fn test_short_read_response_accounting() {
        // 3 requested, 2 returned, remaining 1
        let frame = framed(&[0x04, 0x02, 0x00, 0x03, 0xAA, 0xBB, 0x01]);
        assert!(check_frame(&frame).is_ok());

        // remaining byte disagrees with the arithmetic
        let frame = framed(&[0x04, 0x02, 0x00, 0x03, 0xAA, 0xBB, 0x02]);
        assert_eq!(check_frame(&frame), Err(FrameError::BadCount));
    }

    #[test]
    fn test_auto_send_read_accounting_applies() {
        let frame = framed(&[CMD_AUTO_MASK | 0x04, 0x02, 0x00, 0x01, 0x03, 0x00]);
        let pkt = check_frame(&frame).unwrap();
        assert!(pkt.is_auto_send());
        assert_eq!(pkt.data[0], 0x03);
    }
}
