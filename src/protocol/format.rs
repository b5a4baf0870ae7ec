//! Input format variants
//!
//! Both formats carry L24/48000 audio. They differ in which payload types
//! they use and in Livewire+'s channel-mapping header extension.

use serde::{Deserialize, Serialize};

use crate::constants::L24_BYTES;
use crate::error::PacketError;
use crate::protocol::rtp::RtpPacket;

/// Header extension profile of the Livewire+ channel map ("LW")
pub const LIVEWIRE_EXT_PROFILE: u16 = 0x4C57;

/// Payload types used by Livewire+ standard and surround streams
pub const LIVEWIRE_PAYLOAD_TYPES: [u8; 2] = [96, 97];

/// AES67 negotiates L24 in the dynamic payload type range
pub const AES67_PAYLOAD_TYPES: std::ops::RangeInclusive<u8> = 96..=127;

/// Input stream format, selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Livewire,
    Aes67,
}

impl InputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            InputFormat::Livewire => "livewire",
            InputFormat::Aes67 => "aes67",
        }
    }

    /// Check the format-specific header fields and payload framing.
    ///
    /// Livewire+ packets must carry the channel-mapping extension, whose first
    /// byte is the channel count. AES67 ignores any extension.
    pub fn validate(&self, packet: &RtpPacket, channels: u16) -> Result<(), PacketError> {
        match self {
            InputFormat::Livewire => {
                if !LIVEWIRE_PAYLOAD_TYPES.contains(&packet.payload_type) {
                    return Err(PacketError::UnknownPayloadType(packet.payload_type, self.name()));
                }
                let ext = packet
                    .extension
                    .as_ref()
                    .filter(|e| e.profile == LIVEWIRE_EXT_PROFILE)
                    .ok_or(PacketError::MissingChannelExtension)?;
                let found = ext.data.first().copied().unwrap_or(0) as u16;
                if found != channels {
                    return Err(PacketError::ChannelMismatch {
                        expected: channels,
                        found,
                    });
                }
            }
            InputFormat::Aes67 => {
                if !AES67_PAYLOAD_TYPES.contains(&packet.payload_type) {
                    return Err(PacketError::UnknownPayloadType(packet.payload_type, self.name()));
                }
            }
        }

        let frame_bytes = L24_BYTES * channels as usize;
        if packet.payload.is_empty() || packet.payload.len() % frame_bytes != 0 {
            return Err(PacketError::MisalignedPayload {
                len: packet.payload.len(),
                channels,
            });
        }
        Ok(())
    }
}

/// Livewire+ channel-mapping extension body for `channels` channels
pub fn livewire_channel_map(channels: u16) -> [u8; 4] {
    [channels as u8, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(pt: u8, payload_len: usize) -> RtpPacket {
        RtpPacket::new(pt, 1, 0, 7, Bytes::from(vec![0u8; payload_len]))
    }

    #[test]
    fn test_aes67_accepts_dynamic_l24() {
        assert!(InputFormat::Aes67.validate(&packet(96, 48 * 6), 2).is_ok());
        assert!(InputFormat::Aes67.validate(&packet(127, 6), 2).is_ok());
    }

    #[test]
    fn test_aes67_rejects_static_payload_type() {
        assert_eq!(
            InputFormat::Aes67.validate(&packet(0, 6), 2),
            Err(PacketError::UnknownPayloadType(0, "aes67"))
        );
    }

    #[test]
    fn test_rejects_partial_sample_frame() {
        assert_eq!(
            InputFormat::Aes67.validate(&packet(96, 7), 2),
            Err(PacketError::MisalignedPayload { len: 7, channels: 2 })
        );
        assert!(InputFormat::Aes67.validate(&packet(96, 0), 2).is_err());
    }

    #[test]
    fn test_livewire_requires_channel_map() {
        let bare = packet(97, 12);
        assert_eq!(
            InputFormat::Livewire.validate(&bare, 2),
            Err(PacketError::MissingChannelExtension)
        );

        let mapped = packet(97, 12).with_extension(LIVEWIRE_EXT_PROFILE, livewire_channel_map(2).to_vec());
        assert!(InputFormat::Livewire.validate(&mapped, 2).is_ok());

        let mono = packet(97, 12).with_extension(LIVEWIRE_EXT_PROFILE, livewire_channel_map(1).to_vec());
        assert_eq!(
            InputFormat::Livewire.validate(&mono, 2),
            Err(PacketError::ChannelMismatch { expected: 2, found: 1 })
        );
    }

    #[test]
    fn test_livewire_rejects_other_payload_types() {
        let pkt = packet(110, 12).with_extension(LIVEWIRE_EXT_PROFILE, livewire_channel_map(2).to_vec());
        assert!(matches!(
            InputFormat::Livewire.validate(&pkt, 2),
            Err(PacketError::UnknownPayloadType(110, _))
        ));
    }

    #[test]
    fn test_format_names_match_config() {
        let parsed: InputFormat = serde_json::from_str("\"aes67\"").unwrap();
        assert_eq!(parsed, InputFormat::Aes67);
        let parsed: InputFormat = serde_json::from_str("\"livewire\"").unwrap();
        assert_eq!(parsed, InputFormat::Livewire);
    }
}
