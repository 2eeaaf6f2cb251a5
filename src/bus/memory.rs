//! In-memory reference hub
//!
//! Backs the demo server and the integration tests. Streams live in a shared
//! map; each stream fans timestamped packets out to per-subscriber bounded
//! channels and keeps whatever a publisher ingests so tests can assert on it.
//! Slow subscribers lose packets rather than stalling the producer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{AudioCodec, VideoCodec};
use crate::error::{Error, Result};

use super::{
    AudioPacket, AudioTrackInfo, MediaSink, Publication, StreamHub, Subscription, TimestampMs,
    VideoPacket, VideoTrackInfo,
};

const FANOUT_CAPACITY: usize = 64;
const DEFAULT_TRACK_WAIT: Duration = Duration::from_secs(5);

struct StreamCore {
    path: String,
    done: CancellationToken,
    video_info: watch::Sender<Option<VideoTrackInfo>>,
    audio_info: watch::Sender<Option<AudioTrackInfo>>,
    video_subs: Mutex<Vec<mpsc::Sender<(TimestampMs, VideoPacket)>>>,
    audio_subs: Mutex<Vec<mpsc::Sender<(TimestampMs, AudioPacket)>>>,
    video_ingest: Mutex<Vec<Bytes>>,
    audio_ingest: Mutex<Vec<Bytes>>,
    subscribers: AtomicUsize,
}

impl StreamCore {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            done: CancellationToken::new(),
            video_info: watch::Sender::new(None),
            audio_info: watch::Sender::new(None),
            video_subs: Mutex::new(Vec::new()),
            audio_subs: Mutex::new(Vec::new()),
            video_ingest: Mutex::new(Vec::new()),
            audio_ingest: Mutex::new(Vec::new()),
            subscribers: AtomicUsize::new(0),
        }
    }

    fn push_video(&self, ts: TimestampMs, packet: VideoPacket) {
        if let Ok(mut subs) = self.video_subs.lock() {
            subs.retain(|tx| match tx.try_send((ts, packet.clone())) {
                Ok(()) => true,
                // Slow subscriber: drop this packet, keep the channel.
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    fn push_audio(&self, ts: TimestampMs, packet: AudioPacket) {
        if let Ok(mut subs) = self.audio_subs.lock() {
            subs.retain(|tx| match tx.try_send((ts, packet.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }
}

struct HubInner {
    track_wait: Duration,
    streams: RwLock<HashMap<String, Arc<StreamCore>>>,
}

/// In-memory [`StreamHub`] implementation
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_track_wait(DEFAULT_TRACK_WAIT)
    }

    /// Bound on how long subscribers wait for a track descriptor
    pub fn with_track_wait(track_wait: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                track_wait,
                streams: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Producer-side handle for an existing stream (tests and demo feeds)
    pub async fn source(&self, stream_path: &str) -> Option<MemorySource> {
        let streams = self.inner.streams.read().await;
        streams
            .get(stream_path)
            .map(|core| MemorySource { core: core.clone() })
    }

    /// Number of live subscriptions on a stream
    pub async fn subscriber_count(&self, stream_path: &str) -> usize {
        let streams = self.inner.streams.read().await;
        streams
            .get(stream_path)
            .map(|core| core.subscribers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamHub for MemoryHub {
    async fn publish(&self, stream_path: &str) -> Result<Arc<dyn Publication>> {
        if stream_path.is_empty() {
            return Err(Error::HubError("empty stream path".to_string()));
        }
        let mut streams = self.inner.streams.write().await;
        if streams.contains_key(stream_path) {
            return Err(Error::HubError(format!(
                "stream already published: {stream_path}"
            )));
        }
        let core = Arc::new(StreamCore::new(stream_path));
        streams.insert(stream_path.to_string(), core.clone());
        info!(stream_path, "stream published");
        Ok(Arc::new(MemoryPublication {
            hub: self.inner.clone(),
            core,
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(&self, stream_path: &str) -> Result<Arc<dyn Subscription>> {
        let streams = self.inner.streams.read().await;
        let core = streams
            .get(stream_path)
            .cloned()
            .ok_or_else(|| Error::HubError(format!("stream not found: {stream_path}")))?;
        core.subscribers.fetch_add(1, Ordering::SeqCst);
        debug!(stream_path, "subscription attached");
        Ok(Arc::new(MemorySubscription {
            track_wait: self.inner.track_wait,
            core,
            released: AtomicBool::new(false),
        }))
    }
}

/// Producer handle returned by [`MemoryHub::source`]
pub struct MemorySource {
    core: Arc<StreamCore>,
}

impl MemorySource {
    pub fn announce_video(&self, info: VideoTrackInfo) {
        // send_replace: the descriptor must stick even with no receivers yet.
        let _ = self.core.video_info.send_replace(Some(info));
    }

    pub fn announce_audio(&self, info: AudioTrackInfo) {
        let _ = self.core.audio_info.send_replace(Some(info));
    }

    pub fn push_video(&self, ts: TimestampMs, packet: VideoPacket) {
        self.core.push_video(ts, packet);
    }

    pub fn push_audio(&self, ts: TimestampMs, packet: AudioPacket) {
        self.core.push_audio(ts, packet);
    }

    /// Everything pushed through the stream's video ingest sink so far
    pub fn ingested_video(&self) -> Vec<Bytes> {
        self.core
            .video_ingest
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Everything pushed through the stream's audio ingest sink so far
    pub fn ingested_audio(&self) -> Vec<Bytes> {
        self.core
            .audio_ingest
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Announced audio track descriptor, if any
    pub fn audio_track(&self) -> Option<AudioTrackInfo> {
        self.core.audio_info.borrow().clone()
    }

    /// Signal end of stream without removing it
    pub fn finish(&self) {
        self.core.done.cancel();
    }
}

enum SinkKind {
    Audio,
    Video,
}

struct IngestSink {
    core: Arc<StreamCore>,
    kind: SinkKind,
}

impl MediaSink for IngestSink {
    fn push(&self, data: Bytes) {
        let store = match self.kind {
            SinkKind::Audio => &self.core.audio_ingest,
            SinkKind::Video => &self.core.video_ingest,
        };
        if let Ok(mut chunks) = store.lock() {
            chunks.push(data);
        }
    }
}

struct MemoryPublication {
    hub: Arc<HubInner>,
    core: Arc<StreamCore>,
    closed: AtomicBool,
}

#[async_trait]
impl Publication for MemoryPublication {
    fn stream_path(&self) -> &str {
        &self.core.path
    }

    fn audio_sink(&self, codec: AudioCodec) -> Arc<dyn MediaSink> {
        let _ = self.core.audio_info.send_replace(Some(AudioTrackInfo { codec }));
        debug!(
            stream_path = %self.core.path,
            codec = codec.name(),
            sample_rate = AudioCodec::SAMPLE_RATE,
            extra = ?codec.extra_data(),
            "audio ingest configured"
        );
        Arc::new(IngestSink {
            core: self.core.clone(),
            kind: SinkKind::Audio,
        })
    }

    fn video_sink(&self, codec: VideoCodec) -> Arc<dyn MediaSink> {
        let _ = self.core.video_info.send_replace(Some(VideoTrackInfo {
            codec,
            parameter_sets: Vec::new(),
        }));
        debug!(stream_path = %self.core.path, codec = codec.name(), "video ingest configured");
        Arc::new(IngestSink {
            core: self.core.clone(),
            kind: SinkKind::Video,
        })
    }

    fn done(&self) -> CancellationToken {
        self.core.done.clone()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.done.cancel();
        if let Ok(mut subs) = self.core.video_subs.lock() {
            subs.clear();
        }
        if let Ok(mut subs) = self.core.audio_subs.lock() {
            subs.clear();
        }
        let mut streams = self.hub.streams.write().await;
        streams.remove(&self.core.path);
        info!(stream_path = %self.core.path, "stream unpublished");
    }
}

struct MemorySubscription {
    track_wait: Duration,
    core: Arc<StreamCore>,
    released: AtomicBool,
}

impl MemorySubscription {
    async fn wait_info<T: Clone>(
        &self,
        sender: &watch::Sender<Option<T>>,
    ) -> Option<T> {
        let mut rx = sender.subscribe();
        let waited = tokio::time::timeout(self.track_wait, rx.wait_for(|v| v.is_some())).await;
        match waited {
            Ok(Ok(guard)) => (*guard).clone(),
            _ => None,
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn stream_path(&self) -> &str {
        &self.core.path
    }

    async fn wait_video_track(&self, accepted: &[&str]) -> Option<VideoTrackInfo> {
        let info = self.wait_info(&self.core.video_info).await?;
        accepted.contains(&info.codec.name()).then_some(info)
    }

    async fn wait_audio_track(&self, accepted: &[&str]) -> Option<AudioTrackInfo> {
        let info = self.wait_info(&self.core.audio_info).await?;
        accepted.contains(&info.codec.name()).then_some(info)
    }

    async fn video_packets(&self) -> mpsc::Receiver<(TimestampMs, VideoPacket)> {
        let (tx, rx) = mpsc::channel(FANOUT_CAPACITY);
        if let Ok(mut subs) = self.core.video_subs.lock() {
            subs.push(tx);
        }
        rx
    }

    async fn audio_packets(&self) -> mpsc::Receiver<(TimestampMs, AudioPacket)> {
        let (tx, rx) = mpsc::channel(FANOUT_CAPACITY);
        if let Ok(mut subs) = self.core.audio_subs.lock() {
            subs.push(tx);
        }
        rx
    }

    fn done(&self) -> CancellationToken {
        self.core.done.clone()
    }

    async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.subscribers.fetch_sub(1, Ordering::SeqCst);
        debug!(stream_path = %self.core.path, "subscription released");
    }
}
