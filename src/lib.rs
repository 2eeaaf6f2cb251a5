//! WebRTC bridge for the StreamHub media bus
//!
//! This crate connects browser peers to an internal publish/subscribe hub of
//! timestamped media packets. One peer connection publishes into, or
//! subscribes out of, exactly one stream path.
//!
//! # Features
//!
//! - **Publish**: browser sends H.264/G.711 media; the bridge pumps raw RTP
//!   into hub ingest sinks and keeps keyframes coming with periodic PLI
//! - **Subscribe**: hub packets are rewritten as timed samples onto local
//!   tracks, with parameter sets re-emitted ahead of every keyframe
//! - **Signaling**: two HTTP endpoints carrying SDP offer/answer JSON
//! - **Strict lifecycle**: an explicit session state machine; every media
//!   task is cancelled and joined on close
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  Browser peers (WHIP-style offer/answer over HTTP)    │
//! │  ↓ /api/webrtc/publish      ↓ /api/webrtc/play        │
//! │  BridgeState (axum router)                            │
//! │  ├─ Session (peer connection + state machine)         │
//! │  │   ├─ inbound pumps  (TrackRemote → MediaSink)      │
//! │  │   ├─ outbound writers (hub packets → local track)  │
//! │  │   └─ recovery loops (PLI timer, RTCP feedback)     │
//! │  └─ Rendezvous (parked sessions by stream path)       │
//! │     ↓                                                 │
//! │  StreamHub (trait; MemoryHub for demo/tests)          │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use streamhub_webrtc::BridgeConfig;
//!
//! let config = BridgeConfig {
//!     ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.pli_interval_ms, 2000);
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod media;
pub mod recovery;
pub mod rendezvous;
pub mod session;

// Re-exports for public API
pub use api::{router, BridgeState};
pub use bus::{MemoryHub, MemorySource, StreamHub};
pub use codec::{AudioCodec, VideoCodec};
pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use rendezvous::Rendezvous;
pub use session::{Session, SessionRole, SessionState};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
