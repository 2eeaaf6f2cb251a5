//! Media hub interface
//!
//! The bridge does not own stream distribution; it talks to a hub through the
//! traits here. One [`Publication`] or [`Subscription`] binds a peer session
//! to exactly one stream path. Packets are timestamped in milliseconds on the
//! hub's own clock.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{AudioCodec, VideoCodec};
use crate::error::Result;

pub mod memory;

pub use memory::{MemoryHub, MemorySource};

/// Millisecond timestamp on the hub clock
pub type TimestampMs = u32;

/// One parsed video access unit from the hub
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// True when the access unit starts with an IDR
    pub keyframe: bool,
    /// NAL units without start codes or length prefixes
    pub nalus: Vec<Bytes>,
}

/// One audio frame from the hub
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Raw codec payload
    pub data: Bytes,
}

/// Descriptor of a published video track
#[derive(Debug, Clone)]
pub struct VideoTrackInfo {
    pub codec: VideoCodec,
    /// Parameter set NALs (SPS/PPS) captured at publish time
    pub parameter_sets: Vec<Bytes>,
}

/// Descriptor of a published audio track
#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    pub codec: AudioCodec,
}

/// Ingest sink for raw inbound media units
pub trait MediaSink: Send + Sync {
    /// Hand one unit to the hub. Must not block.
    fn push(&self, data: Bytes);
}

/// Producer half of a stream, held by a publishing session
#[async_trait]
pub trait Publication: Send + Sync {
    /// Stream path this publication feeds
    fn stream_path(&self) -> &str;

    /// Configure the audio track for `codec` (8 kHz, 16-bit, mono) and
    /// return its ingest sink.
    fn audio_sink(&self, codec: AudioCodec) -> Arc<dyn MediaSink>;

    /// Configure the video track for `codec` and return its ingest sink.
    fn video_sink(&self, codec: VideoCodec) -> Arc<dyn MediaSink>;

    /// Cancelled when the stream ends for any reason
    fn done(&self) -> CancellationToken;

    /// Tear the stream down. Idempotent.
    async fn close(&self);
}

impl std::fmt::Debug for dyn Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publication")
            .field("stream_path", &self.stream_path())
            .finish()
    }
}

/// Consumer half of a stream, held by a subscribing session
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Stream path this subscription reads
    fn stream_path(&self) -> &str;

    /// Wait (bounded by the hub's own timeout) for a video track whose codec
    /// name is in `accepted`. `None` when no such track appears in time.
    async fn wait_video_track(&self, accepted: &[&str]) -> Option<VideoTrackInfo>;

    /// Wait (bounded by the hub's own timeout) for an audio track whose codec
    /// name is in `accepted`.
    async fn wait_audio_track(&self, accepted: &[&str]) -> Option<AudioTrackInfo>;

    /// Open a channel of timestamped video packets for this subscriber.
    async fn video_packets(&self) -> mpsc::Receiver<(TimestampMs, VideoPacket)>;

    /// Open a channel of timestamped audio packets for this subscriber.
    async fn audio_packets(&self) -> mpsc::Receiver<(TimestampMs, AudioPacket)>;

    /// Cancelled when the stream ends for any reason
    fn done(&self) -> CancellationToken;

    /// Release the subscription. Idempotent.
    async fn close(&self);
}

impl std::fmt::Debug for dyn Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream_path", &self.stream_path())
            .finish()
    }
}

/// The hub itself
#[async_trait]
pub trait StreamHub: Send + Sync {
    /// Register a new stream. Fails on empty or already-taken paths.
    async fn publish(&self, stream_path: &str) -> Result<Arc<dyn Publication>>;

    /// Attach to an existing stream. Fails when the path is unknown.
    async fn subscribe(&self, stream_path: &str) -> Result<Arc<dyn Subscription>>;
}
