//! TCP dialout framing.
//!
//! Every packet is preceded by a 12-byte header:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ MsgType  │ MsgEncap │ HdrVer   │ MsgFlags │ MsgLen   │
//! │ 2 bytes  │ 2 bytes  │ 2 bytes  │ 2 bytes  │ 4 bytes  │
//! └──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! All integers are big endian. `MsgLen` bytes of GPB payload follow.

use crate::domain::{MdtError, MdtResult};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DialoutHeader {
    pub msg_type: u16,
    pub msg_encap: u16,
    pub msg_hdr_version: u16,
    pub msg_flags: u16,
    pub msg_len: u32,
}

impl DialoutHeader {
    /// Header for a payload of `len` bytes with every other field zero.
    pub fn for_payload(len: u32) -> Self {
        Self {
            msg_len: len,
            ..Default::default()
        }
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            msg_type: u16::from_be_bytes([buf[0], buf[1]]),
            msg_encap: u16::from_be_bytes([buf[2], buf[3]]),
            msg_hdr_version: u16::from_be_bytes([buf[4], buf[5]]),
            msg_flags: u16::from_be_bytes([buf[6], buf[7]]),
            msg_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_encap.to_be_bytes());
        buf[4..6].copy_from_slice(&self.msg_hdr_version.to_be_bytes());
        buf[6..8].copy_from_slice(&self.msg_flags.to_be_bytes());
        buf[8..12].copy_from_slice(&self.msg_len.to_be_bytes());
        buf
    }

    /// Reject oversized payloads and any non-zero flags.
    pub fn validate(&self, max_msg_len: u32) -> MdtResult<()> {
        if self.msg_len > max_msg_len {
            return Err(MdtError::PayloadTooLong {
                len: self.msg_len,
                max: max_msg_len,
            });
        }

        if self.msg_flags != 0 {
            return Err(MdtError::InvalidFlags(self.msg_flags));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_TCP_MAX_MSG_LEN;

    #[test]
    fn test_decode_big_endian_layout() {
        let bytes = [0, 1, 0, 2, 0, 3, 0, 0, 0, 0, 0x01, 0x00];
        let header = DialoutHeader::decode(&bytes);
        assert_eq!(header.msg_type, 1);
        assert_eq!(header.msg_encap, 2);
        assert_eq!(header.msg_hdr_version, 3);
        assert_eq!(header.msg_flags, 0);
        assert_eq!(header.msg_len, 256);
    }

    #[test]
    fn test_encode_matches_decode() {
        let header = DialoutHeader {
            msg_type: 1,
            msg_encap: 1,
            msg_hdr_version: 1,
            msg_flags: 0,
            msg_len: 70_000,
        };
        assert_eq!(DialoutHeader::decode(&header.encode()), header);
        assert_eq!(&header.encode()[8..], &70_000u32.to_be_bytes());
    }

    #[test]
    fn test_validate_accepts_payload_at_limit() {
        let header = DialoutHeader::for_payload(DEFAULT_TCP_MAX_MSG_LEN);
        assert!(header.validate(DEFAULT_TCP_MAX_MSG_LEN).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let header = DialoutHeader::for_payload(DEFAULT_TCP_MAX_MSG_LEN + 1);
        assert!(matches!(
            header.validate(DEFAULT_TCP_MAX_MSG_LEN),
            Err(MdtError::PayloadTooLong { len, max })
                if len == DEFAULT_TCP_MAX_MSG_LEN + 1 && max == DEFAULT_TCP_MAX_MSG_LEN
        ));
    }

    #[test]
    fn test_validate_rejects_flags() {
        let header = DialoutHeader {
            msg_flags: 0x0001,
            msg_len: 10,
            ..Default::default()
        };
        assert!(matches!(header.validate(1024), Err(MdtError::InvalidFlags(1))));
    }
}
