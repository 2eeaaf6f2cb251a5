//! Media track adapters between peer connection tracks and the hub
//!
//! Outbound (subscribe direction): hub packets become samples written to
//! local tracks. Inbound (publish direction): remote track payloads are
//! pumped into hub ingest sinks.

pub mod inbound;
pub mod outbound;

pub use inbound::{pump_remote_track, READ_BUFFER_SIZE};
pub use outbound::{
    run_audio_writer, run_video_writer, AudioSampleWriter, SampleSink, TrackSampleSink,
    VideoSampleWriter, DEFAULT_VIDEO_FRAME_MS,
};
