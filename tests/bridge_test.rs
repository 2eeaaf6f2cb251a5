//! End-to-end negotiation tests against the in-memory hub
//!
//! These drive the signaling flows directly (no HTTP layer) with real peer
//! connections on the offering side, so SDP handling and hub bookkeeping are
//! exercised together.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_test::assert_ok;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header as RtpHeader;
use webrtc::rtp::packet::Packet as RtpPacket;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

use streamhub_webrtc::api::{publish_session, subscribe_session};
use streamhub_webrtc::bus::{AudioTrackInfo, VideoTrackInfo};
use streamhub_webrtc::{AudioCodec, BridgeConfig, BridgeState, MemoryHub, StreamHub, VideoCodec};

/// Offer from a throwaway client-side peer connection
async fn make_offer(audio: bool, video: bool) -> RTCSessionDescription {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .expect("default codecs");
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .expect("peer connection");
    if video {
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .expect("video transceiver");
    }
    if audio {
        pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
            .await
            .expect("audio transceiver");
    }
    pc.create_offer(None).await.expect("offer")
}

/// Host-candidate-only config so ICE gathering finishes without a network
fn local_config() -> BridgeConfig {
    BridgeConfig {
        ice_servers: Vec::new(),
        ..Default::default()
    }
}

fn bridge(hub: &MemoryHub) -> Arc<BridgeState> {
    Arc::new(BridgeState::new(local_config(), Arc::new(hub.clone())).expect("bridge state"))
}

/// Client-side peer connection carrying one RTP track toward the bridge
async fn sender_peer(track: Arc<TrackLocalStaticRTP>) -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .expect("default codecs");
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .expect("peer connection"),
    );
    pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .expect("add track");
    pc
}

/// Offer with the full candidate set, so the bridge can reach back without
/// trickle signaling.
async fn gathered_offer(pc: &RTCPeerConnection) -> RTCSessionDescription {
    let offer = pc.create_offer(None).await.expect("offer");
    let mut gather = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.expect("local offer");
    tokio::time::timeout(Duration::from_secs(10), gather.recv())
        .await
        .expect("offer gathering");
    pc.local_description().await.expect("gathered offer")
}

fn on_connected(pc: &RTCPeerConnection) -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    pc.on_peer_connection_state_change(Box::new(move |peer_state| {
        let tx = tx.clone();
        Box::pin(async move {
            if peer_state == RTCPeerConnectionState::Connected {
                let _ = tx.try_send(());
            }
        })
    }));
    rx
}

fn rtp_packet(sequence_number: u16, timestamp: u32, payload: Bytes) -> RtpPacket {
    RtpPacket {
        header: RtpHeader {
            version: 2,
            sequence_number,
            timestamp,
            ..Default::default()
        },
        payload,
    }
}

#[tokio::test]
async fn test_play_missing_stream_fails_without_side_effects() {
    let hub = MemoryHub::with_track_wait(Duration::from_millis(100));
    let state = bridge(&hub);

    let offer = make_offer(true, true).await;
    let err = subscribe_session(&state, "live/missing", offer)
        .await
        .unwrap_err();

    assert!(err.is_hub_error());
    assert!(state.sessions().is_empty());
    assert_eq!(hub.subscriber_count("live/missing").await, 0);
}

#[tokio::test]
async fn test_play_audio_only_stream_answers_audio_only() {
    let hub = MemoryHub::with_track_wait(Duration::from_millis(100));
    let _publication = hub.publish("live/radio").await.unwrap();
    let source = hub.source("live/radio").await.unwrap();
    source.announce_audio(AudioTrackInfo {
        codec: AudioCodec::Pcma,
    });

    let state = bridge(&hub);
    let offer = make_offer(true, false).await;
    let answer = subscribe_session(&state, "live/radio", offer)
        .await
        .unwrap();

    assert!(answer.sdp.contains("m=audio"));
    assert!(!answer.sdp.contains("m=video"));
    assert_eq!(hub.subscriber_count("live/radio").await, 1);

    // The negotiated session is parked for out-of-band teardown.
    let session = state.sessions().take("live/radio").unwrap();
    assert!(state.sessions().take("live/radio").is_none());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_play_without_compatible_tracks_releases_subscription() {
    let hub = MemoryHub::with_track_wait(Duration::from_millis(100));
    let _publication = hub.publish("live/silent").await.unwrap();

    let state = bridge(&hub);
    let offer = make_offer(true, true).await;
    let err = subscribe_session(&state, "live/silent", offer)
        .await
        .unwrap_err();

    assert!(!err.is_hub_error());
    assert!(state.sessions().is_empty());
    assert_eq!(hub.subscriber_count("live/silent").await, 0);
}

#[tokio::test]
async fn test_play_h264_stream_negotiates_video() {
    let hub = MemoryHub::with_track_wait(Duration::from_millis(100));
    let _publication = hub.publish("live/cam").await.unwrap();
    let source = hub.source("live/cam").await.unwrap();
    // Constrained baseline 3.1 SPS; browsers advertise 42e01f by default.
    source.announce_video(VideoTrackInfo {
        codec: VideoCodec::H264,
        parameter_sets: vec![
            Bytes::from_static(&[0x67, 0x42, 0xe0, 0x1f, 0x8c, 0x8d, 0x40]),
            Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80]),
        ],
    });

    let state = bridge(&hub);
    let offer = make_offer(false, true).await;
    let answer = subscribe_session(&state, "live/cam", offer).await.unwrap();

    assert!(answer.sdp.contains("m=video"));
    assert!(answer.sdp.contains("H264"));
    // The SPS encodes constrained baseline 3.1 and the browser offer carries
    // it, so the local video fmtp must pin that exact profile.
    assert!(answer.sdp.contains("profile-level-id=42e01f"));

    let session = state.sessions().take("live/cam").unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_registers_stream_and_answers_both_kinds() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let offer = make_offer(true, true).await;
    let answer = tokio_test::assert_ok!(publish_session(&state, "live/studio", offer).await);

    assert!(answer.sdp.contains("m=audio"));
    assert!(answer.sdp.contains("m=video"));
    assert!(hub.source("live/studio").await.is_some());

    let session = state.sessions().take("live/studio").unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_duplicate_path_is_hub_rejection() {
    let hub = MemoryHub::new();
    let _existing = hub.publish("live/studio").await.unwrap();

    let state = bridge(&hub);
    let offer = make_offer(true, true).await;
    let err = publish_session(&state, "live/studio", offer)
        .await
        .unwrap_err();

    assert!(err.is_hub_error());
    assert!(state.sessions().is_empty());
}

#[tokio::test]
async fn test_publish_empty_path_is_hub_rejection() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let offer = make_offer(true, false).await;
    let err = publish_session(&state, "", offer).await.unwrap_err();
    assert!(err.is_hub_error());
}

#[tokio::test]
async fn test_parked_session_close_is_idempotent() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let offer = make_offer(true, true).await;
    publish_session(&state, "live/loop", offer).await.unwrap();

    let session = state.sessions().take("live/loop").unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(
        session.state().await,
        streamhub_webrtc::SessionState::Closed
    );
}

#[tokio::test]
async fn test_answer_is_returned_with_gathered_candidates() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let offer = make_offer(true, true).await;
    let answer = publish_session(&state, "live/gather", offer).await.unwrap();

    // The answer never ships with a partial candidate set; by the time it is
    // returned, gathering has finished and the SDP carries the candidates.
    assert!(answer.sdp.contains("a=candidate"));

    let session = state.sessions().take("live/gather").unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_pcmu_packets_reach_hub_ingest() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_string(),
            clock_rate: 8000,
            channels: 1,
            ..Default::default()
        },
        "audio".to_string(),
        "sender".to_string(),
    ));
    let pc = sender_peer(Arc::clone(&track)).await;
    let mut connected = on_connected(&pc);

    let offer = gathered_offer(&pc).await;
    let answer = publish_session(&state, "live/mic", offer).await.unwrap();
    pc.set_remote_description(answer).await.expect("remote answer");
    tokio::time::timeout(Duration::from_secs(10), connected.recv())
        .await
        .expect("publisher connected");

    let source = hub.source("live/mic").await.unwrap();
    let payload = Bytes::from(vec![0xffu8; 160]);
    let mut ingested = Vec::new();
    for seq in 0..200u16 {
        let packet = rtp_packet(seq, u32::from(seq) * 160, payload.clone());
        let _ = track.write_rtp(&packet).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        ingested = source.ingested_audio();
        if !ingested.is_empty() {
            break;
        }
    }

    // One wire packet, one ingest chunk: 12-byte RTP header plus the payload.
    assert!(!ingested.is_empty());
    assert!(ingested.iter().all(|chunk| chunk.len() == 12 + payload.len()));
    // PT 0 selected the PCMU ingest sink.
    assert_eq!(source.audio_track().unwrap().codec, AudioCodec::Pcmu);

    let session = state.sessions().take("live/mic").unwrap();
    session.close().await.unwrap();
    pc.close().await.expect("sender close");
}

#[tokio::test]
async fn test_publish_ignores_unsupported_audio_payload() {
    let hub = MemoryHub::new();
    let state = bridge(&hub);

    let track = Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_string(),
        "sender".to_string(),
    ));
    let pc = sender_peer(Arc::clone(&track)).await;
    let mut connected = on_connected(&pc);

    let offer = gathered_offer(&pc).await;
    let answer = publish_session(&state, "live/opus", offer).await.unwrap();
    pc.set_remote_description(answer).await.expect("remote answer");
    tokio::time::timeout(Duration::from_secs(10), connected.recv())
        .await
        .expect("publisher connected");

    let source = hub.source("live/opus").await.unwrap();
    for seq in 0..10u16 {
        let packet = rtp_packet(seq, u32::from(seq) * 960, Bytes::from(vec![0u8; 100]));
        let _ = track.write_rtp(&packet).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Opus has no hub mapping, so the track is ignored and no audio ingest
    // sink is ever configured.
    assert!(source.ingested_audio().is_empty());
    assert!(source.audio_track().is_none());

    let session = state.sessions().take("live/opus").unwrap();
    session.close().await.unwrap();
    pc.close().await.expect("sender close");
}
