//! Outbound sample writers (hub → local track)
//!
//! Hub timestamps are converted to per-sample durations: the first sample of
//! a track gets the kind's default duration, later samples get the delta to
//! the previous timestamp. A non-increasing timestamp (clock wrap, restart)
//! falls back to the default instead of going negative.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::bus::{AudioPacket, TimestampMs, VideoPacket};
use crate::error::{Error, Result};

/// Default duration for the first video sample and for wrapped timestamps
pub const DEFAULT_VIDEO_FRAME_MS: u32 = 40;
/// Default duration for the first audio sample and for wrapped timestamps
pub const DEFAULT_AUDIO_FRAME_MS: u32 = 0;

/// Destination for timed media samples.
///
/// Implemented by [`TrackSampleSink`] over a real local track; tests plug in
/// a recorder.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write(&self, data: Bytes, duration: Duration) -> Result<()>;
}

/// [`SampleSink`] over a `TrackLocalStaticSample`
pub struct TrackSampleSink {
    track: Arc<TrackLocalStaticSample>,
}

impl TrackSampleSink {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl SampleSink for TrackSampleSink {
    async fn write(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::MediaTrackError(format!("sample write failed: {e}")))
    }
}

/// Duration of the current sample from consecutive hub timestamps
fn frame_duration_ms(last: &mut Option<TimestampMs>, ts: TimestampMs, default_ms: u32) -> u32 {
    let duration = match *last {
        Some(prev) if ts > prev => ts - prev,
        _ => default_ms,
    };
    *last = Some(ts);
    duration
}

/// Writes hub video packets to a sample sink
pub struct VideoSampleWriter {
    sink: Arc<dyn SampleSink>,
    parameter_sets: Vec<Bytes>,
    last_timestamp: Option<TimestampMs>,
}

impl VideoSampleWriter {
    /// # Arguments
    ///
    /// * `sink` - Destination track
    /// * `parameter_sets` - SPS/PPS NALs re-emitted ahead of every keyframe
    pub fn new(sink: Arc<dyn SampleSink>, parameter_sets: Vec<Bytes>) -> Self {
        Self {
            sink,
            parameter_sets,
            last_timestamp: None,
        }
    }

    pub async fn write(&mut self, ts: TimestampMs, packet: &VideoPacket) -> Result<()> {
        let duration_ms =
            frame_duration_ms(&mut self.last_timestamp, ts, DEFAULT_VIDEO_FRAME_MS);
        if packet.keyframe {
            // Decoders joining mid-stream need the parameter sets first.
            for nalu in &self.parameter_sets {
                self.sink.write(nalu.clone(), Duration::ZERO).await?;
            }
        }
        let duration = Duration::from_millis(u64::from(duration_ms));
        for nalu in &packet.nalus {
            self.sink.write(nalu.clone(), duration).await?;
        }
        Ok(())
    }
}

/// Writes hub audio packets to a sample sink
pub struct AudioSampleWriter {
    sink: Arc<dyn SampleSink>,
    last_timestamp: Option<TimestampMs>,
}

impl AudioSampleWriter {
    pub fn new(sink: Arc<dyn SampleSink>) -> Self {
        Self {
            sink,
            last_timestamp: None,
        }
    }

    pub async fn write(&mut self, ts: TimestampMs, packet: &AudioPacket) -> Result<()> {
        let duration_ms =
            frame_duration_ms(&mut self.last_timestamp, ts, DEFAULT_AUDIO_FRAME_MS);
        self.sink
            .write(
                packet.data.clone(),
                Duration::from_millis(u64::from(duration_ms)),
            )
            .await
    }
}

/// Drain a video packet channel into a writer until the channel closes, the
/// token cancels, or the track rejects a write.
pub async fn run_video_writer(
    mut writer: VideoSampleWriter,
    mut packets: mpsc::Receiver<(TimestampMs, VideoPacket)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("video writer cancelled");
                return;
            }
            next = packets.recv() => match next {
                Some((ts, packet)) => {
                    if let Err(e) = writer.write(ts, &packet).await {
                        warn!(error = %e, "video writer stopped");
                        return;
                    }
                }
                None => {
                    debug!("video packet channel closed");
                    return;
                }
            }
        }
    }
}

/// Audio counterpart of [`run_video_writer`]
pub async fn run_audio_writer(
    mut writer: AudioSampleWriter,
    mut packets: mpsc::Receiver<(TimestampMs, AudioPacket)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("audio writer cancelled");
                return;
            }
            next = packets.recv() => match next {
                Some((ts, packet)) => {
                    if let Err(e) = writer.write(ts, &packet).await {
                        warn!(error = %e, "audio writer stopped");
                        return;
                    }
                }
                None => {
                    debug!("audio packet channel closed");
                    return;
                }
            }
        }
    }
}
