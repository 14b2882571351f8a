//! Register-transfer packets carried inside wire frames
//!
//! Packet layout: `cmd | core | reg | count | data...` followed on the
//! wire by a 2-byte big-endian CRC (added and checked by the framing
//! layer's callers).
//!
//! `cmd` bit layout:
//! - bit 7: auto-send (1 = unsolicited data from the board, 0 = read
//!   response)
//! - bits 3-2: operation (nop / read / write / write-then-read)
//! - bit 1: auto-increment the register on multi-byte transfers
//! - bit 0: legacy, always 0
//!
//! On transmit the high nibble of `cmd` is forced to `0xF` and the high
//! nibble of `core` to `0xE` as sanity tags the board checks; the
//! router masks the core tag back off on receive.

/// Max bytes in one packet (4-byte header + data), excluding the CRC
pub const MAX_PACKET_SIZE: usize = 514;
/// Max data bytes in one packet
pub const MAX_DATA_SIZE: usize = 510;

// cmd bit 7: unsolicited data from the board
pub const CMD_AUTO_MASK: u8 = 0x80;

// cmd bits 3-2: operation
pub const CMD_OP_MASK: u8 = 0x0C;
pub const CMD_OP_READ: u8 = 0x04;
pub const CMD_OP_WRITE: u8 = 0x08;
pub const CMD_OP_WRRD: u8 = 0x0C;

// cmd bit 1: register auto-increment
pub const CMD_AUTOINC: u8 = 0x02;

// Sanity tags forced into the high nibbles on transmit
pub const TX_CMD_TAG: u8 = 0xF0;
pub const TX_CORE_TAG: u8 = 0xE0;
/// Mask selecting the core index from the addressed byte
pub const CORE_MASK: u8 = 0x0F;

/// A decoded register-transfer packet
///
/// For read responses and auto-send packets `data` carries the payload
/// exactly as received: `count` returned bytes followed by the
/// *remaining* byte the board appends when it could not supply the full
/// requested count (zero on a complete response).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: u8,
    pub core: u8,
    pub reg: u8,
    pub count: u8,
    pub data: Vec<u8>,
}

impl Packet {
    /// Build a register read request
    ///
    /// The core index is filled in by the link layer from the sending
    /// slot's bound core.
    pub fn read_request(reg: u8, count: u8) -> Self {
        Self {
            cmd: CMD_OP_READ | CMD_AUTOINC,
            core: 0,
            reg,
            count,
            data: Vec::new(),
        }
    }

    /// Build a register write
    pub fn write(reg: u8, data: &[u8]) -> Self {
        debug_assert!(data.len() <= MAX_DATA_SIZE);
        Self {
            cmd: CMD_OP_WRITE | CMD_AUTOINC,
            core: 0,
            reg,
            count: data.len() as u8,
            data: data.to_vec(),
        }
    }

    /// Operation bits of the command byte
    pub fn op(&self) -> u8 {
        self.cmd & CMD_OP_MASK
    }

    /// Unsolicited data pushed by the board
    pub fn is_auto_send(&self) -> bool {
        self.cmd & CMD_AUTO_MASK != 0
    }

    /// Solicited reply to a read request
    pub fn is_read_response(&self) -> bool {
        !self.is_auto_send() && self.op() & CMD_OP_READ != 0
    }

    /// Acknowledgement of a write
    pub fn is_write_ack(&self) -> bool {
        !self.is_auto_send() && self.op() == CMD_OP_WRITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_shape() {
        let pkt = Packet::read_request(2, 3);
        assert_eq!(pkt.op(), CMD_OP_READ);
        assert_eq!(pkt.cmd & CMD_AUTOINC, CMD_AUTOINC);
        assert_eq!(pkt.reg, 2);
        assert_eq!(pkt.count, 3);
        assert!(pkt.data.is_empty());
    }

    #[test]
    fn test_write_shape() {
        let pkt = Packet::write(0, &[0x0F]);
        assert_eq!(pkt.op(), CMD_OP_WRITE);
        assert_eq!(pkt.count, 1);
        assert_eq!(pkt.data, vec![0x0F]);
    }

    #[test]
    fn test_packet_kind_predicates() {
        let ack = Packet {
            cmd: CMD_OP_WRITE,
            core: 1,
            reg: 0,
            count: 1,
            data: vec![0x0F],
        };
        assert!(ack.is_write_ack());
        assert!(!ack.is_read_response());
        assert!(!ack.is_auto_send());

        let auto = Packet {
            cmd: CMD_AUTO_MASK | CMD_OP_READ,
            core: 2,
            reg: 0,
            count: 1,
            data: vec![0x03, 0x00],
        };
        assert!(auto.is_auto_send());
        assert!(!auto.is_write_ack());
        assert!(!auto.is_read_response());
    }
}
