//! RTP packet model (RFC 3550)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Fixed header size in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// Header extension (profile-defined, RFC 3550 §5.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub profile: u16,
    /// Extension body, a whole number of 32-bit words
    pub data: Bytes,
}

/// Parsed RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub extension: Option<RtpExtension>,
    /// Payload with any padding removed
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a version 2 packet with no CSRCs or extension
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            extension: None,
            payload,
        }
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_extension(mut self, profile: u16, data: impl Into<Bytes>) -> Self {
        self.extension = Some(RtpExtension {
            profile,
            data: data.into(),
        });
        self
    }

    /// Parse a datagram. Rejects short buffers and any version other than 2.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < RTP_HEADER_SIZE {
            return Err(PacketError::TooShort(buf.len()));
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }
        let padding = (b0 & 0b0010_0000) != 0;
        let has_extension = (b0 & 0b0001_0000) != 0;
        let csrc_count = (b0 & 0b0000_1111) as usize;

        let marker = (b1 & 0b1000_0000) != 0;
        let payload_type = b1 & 0b0111_1111;

        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if buf.len() < offset {
            return Err(PacketError::Truncated("CSRC list"));
        }
        let csrcs = buf[RTP_HEADER_SIZE..offset]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let extension = if has_extension {
            if buf.len() < offset + 4 {
                return Err(PacketError::Truncated("extension header"));
            }
            let profile = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            let start = offset + 4;
            let end = start + words * 4;
            if buf.len() < end {
                return Err(PacketError::Truncated("extension body"));
            }
            offset = end;
            Some(RtpExtension {
                profile,
                data: Bytes::copy_from_slice(&buf[start..end]),
            })
        } else {
            None
        };

        let mut payload_end = buf.len();
        if padding {
            let pad_len = buf[payload_end - 1] as usize;
            if pad_len == 0 || pad_len > payload_end - offset {
                return Err(PacketError::BadPadding(pad_len));
            }
            payload_end -= pad_len;
        }

        Ok(Self {
            version,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrcs,
            extension,
            payload: Bytes::copy_from_slice(&buf[offset..payload_end]),
        })
    }

    /// Serialize to wire format. Never emits padding.
    pub fn to_bytes(&self) -> Bytes {
        let csrc_count = self.csrcs.len().min(15);
        let ext_len = self
            .extension
            .as_ref()
            .map(|e| 4 + e.data.len().div_ceil(4) * 4)
            .unwrap_or(0);
        let mut buf =
            BytesMut::with_capacity(RTP_HEADER_SIZE + csrc_count * 4 + ext_len + self.payload.len());

        let mut b0 = (self.version & 0b11) << 6;
        if self.extension.is_some() {
            b0 |= 0b0001_0000;
        }
        b0 |= csrc_count as u8;

        let mut b1 = self.payload_type & 0b0111_1111;
        if self.marker {
            b1 |= 0b1000_0000;
        }

        buf.put_u8(b0);
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in self.csrcs.iter().take(csrc_count) {
            buf.put_u32(*csrc);
        }

        if let Some(ext) = &self.extension {
            let words = ext.data.len().div_ceil(4);
            buf.put_u16(ext.profile);
            buf.put_u16(words as u16);
            buf.put_slice(&ext.data);
            buf.put_bytes(0, words * 4 - ext.data.len());
        }

        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Signed distance from `last` to `next` in 16-bit sequence space.
///
/// `1` is in order, `> 1` skips `delta - 1` packets, `<= 0` is a duplicate or
/// a late arrival.
pub fn sequence_delta(last: u16, next: u16) -> i16 {
    next.wrapping_sub(last) as i16
}
