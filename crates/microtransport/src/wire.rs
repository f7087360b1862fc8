//! # Packet header
//!
//! Fixed 8-byte base header, big-endian, with an optional 6-byte fragment
//! extension present iff [`Flags::FRAG`] is set.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    version    |     flags     |          channel_id           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            seq_no             |        payload_length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       frag_id (if FRAG)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        frag_offset (if FRAG)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::HeaderError;

/// Current (and only) protocol version.
pub const VERSION: u8 = 0x01;

/// Size of the base header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the fragment extension in bytes.
pub const FRAG_HEADER_SIZE: usize = 6;

/// Flag bits. Unknown bits beyond these five are reserved: preserved on
/// decode, never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const SYN: u8 = 0x01;
    pub const ACK: u8 = 0x02;
    pub const FIN: u8 = 0x04;
    pub const RST: u8 = 0x08;
    pub const FRAG: u8 = 0x10;

    #[inline]
    pub fn new(bits: u8) -> Self {
        Flags(bits)
    }

    #[inline]
    pub fn is_syn(self) -> bool {
        self.0 & Self::SYN != 0
    }

    #[inline]
    pub fn is_ack(self) -> bool {
        self.0 & Self::ACK != 0
    }

    #[inline]
    pub fn is_fin(self) -> bool {
        self.0 & Self::FIN != 0
    }

    #[inline]
    pub fn is_rst(self) -> bool {
        self.0 & Self::RST != 0
    }

    #[inline]
    pub fn is_frag(self) -> bool {
        self.0 & Self::FRAG != 0
    }

    #[inline]
    pub fn syn_ack() -> Self {
        Flags(Self::SYN | Self::ACK)
    }

    #[inline]
    pub fn fin_ack() -> Self {
        Flags(Self::FIN | Self::ACK)
    }

    /// SYN and FIN together is malformed — the header can't be a connection
    /// request and a teardown at once.
    #[inline]
    pub fn is_malformed(self) -> bool {
        self.is_syn() && self.is_fin()
    }
}

/// Fragment extension fields, present only when [`Flags::FRAG`] is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    pub frag_id: u32,
    pub frag_offset: u16,
}

/// A decoded (or to-be-encoded) packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub flags: Flags,
    pub channel_id: u16,
    pub seq_no: u16,
    pub payload_length: u16,
    pub fragment: Option<FragmentInfo>,
}

impl PacketHeader {
    /// Construct a header with no fragment extension.
    pub fn new(flags: Flags, channel_id: u16, seq_no: u16, payload_length: u16) -> Self {
        PacketHeader {
            version: VERSION,
            flags,
            channel_id,
            seq_no,
            payload_length,
            fragment: None,
        }
    }

    /// Construct a fragmented header; sets [`Flags::FRAG`] automatically.
    pub fn new_fragment(
        mut flags: Flags,
        channel_id: u16,
        seq_no: u16,
        payload_length: u16,
        frag_id: u32,
        frag_offset: u16,
    ) -> Self {
        flags.0 |= Flags::FRAG;
        PacketHeader {
            version: VERSION,
            flags,
            channel_id,
            seq_no,
            payload_length,
            fragment: Some(FragmentInfo {
                frag_id,
                frag_offset,
            }),
        }
    }

    /// Encoded size of this header, including the fragment extension if present.
    pub fn encoded_len(&self) -> usize {
        if self.fragment.is_some() {
            HEADER_SIZE + FRAG_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Bytes, HeaderError> {
        if self.flags.is_frag() != self.fragment.is_some() {
            return Err(HeaderError::MissingFragmentFields);
        }
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags.0);
        buf.put_u16(self.channel_id);
        buf.put_u16(self.seq_no);
        buf.put_u16(self.payload_length);
        if let Some(frag) = self.fragment {
            buf.put_u32(frag.frag_id);
            buf.put_u16(frag.frag_offset);
        }
        Ok(buf.freeze())
    }

    /// Decode a header from the front of `buf`, advancing it past the
    /// consumed bytes. The payload itself is left in `buf` for the caller.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, HeaderError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(HeaderError::Truncated {
                needed: HEADER_SIZE,
                have: buf.remaining(),
            });
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let flags = Flags(buf.get_u8());
        if flags.is_malformed() {
            return Err(HeaderError::MalformedFlags(flags.0));
        }
        let channel_id = buf.get_u16();
        let seq_no = buf.get_u16();
        let payload_length = buf.get_u16();

        let fragment = if flags.is_frag() {
            if buf.remaining() < FRAG_HEADER_SIZE {
                return Err(HeaderError::Truncated {
                    needed: FRAG_HEADER_SIZE,
                    have: buf.remaining(),
                });
            }
            let frag_id = buf.get_u32();
            let frag_offset = buf.get_u16();
            Some(FragmentInfo {
                frag_id,
                frag_offset,
            })
        } else {
            None
        };

        Ok(PacketHeader {
            version,
            flags,
            channel_id,
            seq_no,
            payload_length,
            fragment,
        })
    }
}
