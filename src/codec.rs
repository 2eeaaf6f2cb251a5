//! Codec identity mapping between RTP payload types and hub codec IDs
//!
//! The hub speaks its own compact codec IDs; RTP speaks payload types. This
//! module is the single place where the two are translated, together with the
//! H.264 profile-level-id resolution used when building outbound video tracks.

use std::sync::OnceLock;

use regex::Regex;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_PCMA, MIME_TYPE_PCMU};

use crate::error::{Error, Result};

/// Audio codecs the bridge accepts from browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// G.711 A-law (static payload type 8)
    Pcma,
    /// G.711 mu-law (static payload type 0)
    Pcmu,
}

impl AudioCodec {
    /// Sample rate of both G.711 variants
    pub const SAMPLE_RATE: u32 = 8000;
    /// Sample size in bits as declared to the hub
    pub const SAMPLE_SIZE: u8 = 16;
    /// Channel count as declared to the hub
    pub const CHANNELS: u8 = 1;

    /// Resolve a codec from an RTP payload type, if supported
    pub fn from_payload_type(pt: u8) -> Option<Self> {
        match pt {
            8 => Some(AudioCodec::Pcma),
            0 => Some(AudioCodec::Pcmu),
            _ => None,
        }
    }

    /// Static RTP payload type of this codec
    pub fn payload_type(self) -> u8 {
        match self {
            AudioCodec::Pcma => 8,
            AudioCodec::Pcmu => 0,
        }
    }

    /// Hub codec ID of this codec
    pub fn hub_id(self) -> u8 {
        match self {
            AudioCodec::Pcma => 7,
            AudioCodec::Pcmu => 8,
        }
    }

    /// Resolve a codec from a hub codec ID, if supported
    pub fn from_hub_id(id: u8) -> Option<Self> {
        match id {
            7 => Some(AudioCodec::Pcma),
            8 => Some(AudioCodec::Pcmu),
            _ => None,
        }
    }

    /// MIME type as used by the media engine
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioCodec::Pcma => MIME_TYPE_PCMA,
            AudioCodec::Pcmu => MIME_TYPE_PCMU,
        }
    }

    /// Short lowercase name used in hub track descriptors
    pub fn name(self) -> &'static str {
        match self {
            AudioCodec::Pcma => "pcma",
            AudioCodec::Pcmu => "pcmu",
        }
    }

    /// Legacy audio extra-data byte expected by hub consumers:
    /// codec ID in the high nibble, sample-size flag in bit 1.
    pub fn extra_data(self) -> [u8; 1] {
        [(self.hub_id() << 4) | (1 << 1)]
    }
}

/// Video codecs the bridge accepts from browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264/AVC
    H264,
}

impl VideoCodec {
    /// Hub codec ID of this codec
    pub fn hub_id(self) -> u8 {
        match self {
            VideoCodec::H264 => 7,
        }
    }

    /// Resolve a codec from a hub codec ID, if supported
    pub fn from_hub_id(id: u8) -> Option<Self> {
        match id {
            7 => Some(VideoCodec::H264),
            _ => None,
        }
    }

    /// MIME type as used by the media engine
    pub fn mime_type(self) -> &'static str {
        match self {
            VideoCodec::H264 => MIME_TYPE_H264,
        }
    }

    /// Short lowercase name used in hub track descriptors
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
        }
    }
}

fn profile_level_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches the constrained-baseline/baseline/main family advertised by
    // browsers; kept permissive on purpose.
    RE.get_or_init(|| Regex::new(r"profile-level-id=(4.+f)").expect("static pattern"))
}

/// Resolve the H.264 profile-level-id to advertise on an outbound track.
///
/// Prefers the profile of the stream's own SPS when the offer already lists
/// it, falls back to the first plausible profile in the offer, and fails the
/// negotiation when neither is available. Never silently defaults.
///
/// # Arguments
///
/// * `offer_sdp` - The remote offer SDP text
/// * `sps` - The stream's sequence parameter set NAL (may be empty)
pub fn resolve_h264_profile(offer_sdp: &str, sps: &[u8]) -> Result<String> {
    if sps.len() >= 4 {
        let pli = hex::encode(&sps[1..4]);
        if offer_sdp.contains(&pli) {
            return Ok(pli);
        }
    }
    if let Some(caps) = profile_level_id_regex().captures(offer_sdp) {
        if let Some(m) = caps.get(1) {
            return Ok(m.as_str().to_string());
        }
    }
    Err(Error::CodecError(
        "no usable profile-level-id in offer".to_string(),
    ))
}

/// Build the fmtp line for an outbound H.264 track
pub fn h264_fmtp_line(profile_level_id: &str) -> String {
    format!("level-asymmetry-allowed=1;packetization-mode=1;profile-level-id={profile_level_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_payload_type_mapping_is_bijective() {
        for codec in [AudioCodec::Pcma, AudioCodec::Pcmu] {
            assert_eq!(AudioCodec::from_payload_type(codec.payload_type()), Some(codec));
            assert_eq!(AudioCodec::from_hub_id(codec.hub_id()), Some(codec));
        }
        assert_eq!(AudioCodec::from_payload_type(111), None);
        assert_eq!(AudioCodec::from_hub_id(0), None);
    }

    #[test]
    fn test_hub_ids() {
        assert_eq!(AudioCodec::Pcma.hub_id(), 7);
        assert_eq!(AudioCodec::Pcmu.hub_id(), 8);
        assert_eq!(VideoCodec::H264.hub_id(), 7);
        assert_eq!(VideoCodec::from_hub_id(7), Some(VideoCodec::H264));
    }

    #[test]
    fn test_audio_extra_data_byte() {
        assert_eq!(AudioCodec::Pcma.extra_data(), [0x72]);
        assert_eq!(AudioCodec::Pcmu.extra_data(), [0x82]);
    }

    #[test]
    fn test_profile_from_sps_when_offer_lists_it() {
        // SPS for constrained baseline 3.1: 67 42 e0 1f ...
        let sps = [0x67, 0x42, 0xe0, 0x1f, 0x8c];
        let offer = "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n";
        assert_eq!(resolve_h264_profile(offer, &sps).unwrap(), "42e01f");
    }

    #[test]
    fn test_profile_falls_back_to_offer_when_sps_absent_from_offer() {
        let sps = [0x67, 0x64, 0x00, 0x32, 0xac];
        let offer = "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n";
        assert_eq!(resolve_h264_profile(offer, &sps).unwrap(), "42001f");
    }

    #[test]
    fn test_profile_resolution_fails_without_candidates() {
        let offer = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 8 0\r\n";
        let err = resolve_h264_profile(offer, &[]).unwrap_err();
        assert!(err.is_negotiation_error());
    }

    #[test]
    fn test_fmtp_line() {
        assert_eq!(
            h264_fmtp_line("42e01f"),
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
        );
    }

    #[test]
    fn test_audio_sink_parameters() {
        assert_eq!(AudioCodec::SAMPLE_RATE, 8000);
        assert_eq!(AudioCodec::SAMPLE_SIZE, 16);
        assert_eq!(AudioCodec::CHANNELS, 1);
    }
}
