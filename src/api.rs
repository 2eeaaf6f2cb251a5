//! HTTP signaling entry points
//!
//! `POST /api/webrtc/play?streamPath=…` and
//! `POST /api/webrtc/publish?streamPath=…` carry an SDP offer as a JSON body
//! and return the answer once ICE gathering has finished. Play failures come
//! back as `{"errmsg": "…"}`; publish failures as `bad name` when the hub
//! refused the path, otherwise as the raw error text. The wire shapes are
//! fixed by existing clients.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use webrtc::api::API;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::bus::{Publication, StreamHub, Subscription};
use crate::codec::{self, AudioCodec, VideoCodec};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::media::{
    pump_remote_track, run_audio_writer, run_video_writer, AudioSampleWriter, TrackSampleSink,
    VideoSampleWriter,
};
use crate::recovery::{run_pli_loop, run_rtcp_feedback_loop, PeerKeyframeRequester};
use crate::rendezvous::Rendezvous;
use crate::session::{build_api, Session, SessionRole, SessionState};

const VIDEO_CLOCK_RATE: u32 = 90000;

/// Shared state behind the signaling endpoints
pub struct BridgeState {
    config: BridgeConfig,
    api: API,
    hub: Arc<dyn StreamHub>,
    sessions: Rendezvous<Arc<Session>>,
}

impl BridgeState {
    pub fn new(config: BridgeConfig, hub: Arc<dyn StreamHub>) -> Result<Self> {
        config.validate()?;
        let api = build_api(&config)?;
        Ok(Self {
            config,
            api,
            hub,
            sessions: Rendezvous::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Negotiated sessions parked by stream path; `take` hands ownership to
    /// whoever tears the session down out of band.
    pub fn sessions(&self) -> &Rendezvous<Arc<Session>> {
        &self.sessions
    }
}

/// Build the signaling router
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/api/webrtc/play", post(play))
        .route("/api/webrtc/publish", post(publish))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "streamPath")]
    pub stream_path: String,
}

async fn play(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<StreamQuery>,
    Json(offer): Json<RTCSessionDescription>,
) -> Response {
    match subscribe_session(&state, &query.stream_path, offer).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            warn!(stream_path = %query.stream_path, error = %e, "play request failed");
            Json(serde_json::json!({ "errmsg": e.to_string() })).into_response()
        }
    }
}

async fn publish(
    State(state): State<Arc<BridgeState>>,
    Query(query): Query<StreamQuery>,
    Json(offer): Json<RTCSessionDescription>,
) -> Response {
    match publish_session(&state, &query.stream_path, offer).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) if e.is_hub_error() => {
            warn!(stream_path = %query.stream_path, error = %e, "publish rejected by hub");
            "bad name".into_response()
        }
        Err(e) => {
            warn!(stream_path = %query.stream_path, error = %e, "publish request failed");
            e.to_string().into_response()
        }
    }
}

/// Subscribe flow: hub subscription first, then a session whose local tracks
/// mirror whatever compatible tracks the stream announces in time. Partial
/// availability keeps the session; only zero usable tracks aborts.
pub async fn subscribe_session(
    state: &Arc<BridgeState>,
    stream_path: &str,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let subscription = state.hub.subscribe(stream_path).await?;

    let session =
        match Session::new(&state.api, SessionRole::Subscriber, stream_path, &state.config).await {
            Ok(s) => s,
            Err(e) => {
                subscription.close().await;
                return Err(e);
            }
        };

    match negotiate_subscriber(&session, &subscription, offer).await {
        Ok(answer) => {
            state.sessions.put(stream_path.to_string(), Arc::clone(&session));
            info!(stream_path, session_id = %session.id(), "subscriber negotiated");
            Ok(answer)
        }
        Err(e) => {
            subscription.close().await;
            let _ = session.close().await;
            Err(e)
        }
    }
}

async fn negotiate_subscriber(
    session: &Arc<Session>,
    subscription: &Arc<dyn Subscription>,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let offer_sdp = offer.sdp.clone();
    session.set_remote_offer(offer).await?;

    let video = subscription
        .wait_video_track(&[VideoCodec::H264.name()])
        .await;
    let audio = subscription
        .wait_audio_track(&[AudioCodec::Pcma.name(), AudioCodec::Pcmu.name()])
        .await;
    if video.is_none() && audio.is_none() {
        return Err(Error::MediaTrackError(format!(
            "stream {} offers no compatible tracks",
            session.stream_path()
        )));
    }

    let mut video_writer = None;
    if let Some(info) = video {
        let sps = info
            .parameter_sets
            .first()
            .map(|b| b.as_ref())
            .unwrap_or_default();
        let profile = codec::resolve_h264_profile(&offer_sdp, sps)?;
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: info.codec.mime_type().to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                sdp_fmtp_line: codec::h264_fmtp_line(&profile),
                ..Default::default()
            },
            "video".to_string(),
            "streamhub".to_string(),
        ));
        let sender = session
            .peer_connection()
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("video track rejected: {e}")))?;
        session.spawn(run_rtcp_feedback_loop(sender, session.cancel_token()));
        video_writer = Some(VideoSampleWriter::new(
            Arc::new(TrackSampleSink::new(track)),
            info.parameter_sets,
        ));
    }

    let mut audio_writer = None;
    if let Some(info) = audio {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: info.codec.mime_type().to_string(),
                clock_rate: AudioCodec::SAMPLE_RATE,
                ..Default::default()
            },
            "audio".to_string(),
            "streamhub".to_string(),
        ));
        session
            .peer_connection()
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("audio track rejected: {e}")))?;
        audio_writer = Some(AudioSampleWriter::new(Arc::new(TrackSampleSink::new(track))));
    }

    let answer = session.create_answer().await?;
    attach_subscriber_state_handler(session, Arc::clone(subscription), video_writer, audio_writer);
    Ok(answer)
}

/// Start the outbound writers once, on the first Connected event; release
/// the subscription and close the session on loss of connectivity.
fn attach_subscriber_state_handler(
    session: &Arc<Session>,
    subscription: Arc<dyn Subscription>,
    video_writer: Option<VideoSampleWriter>,
    audio_writer: Option<AudioSampleWriter>,
) {
    // Weak: the peer connection owns this closure, the session owns the
    // peer connection.
    let weak = Arc::downgrade(session);
    let writers = Arc::new(Mutex::new(Some((video_writer, audio_writer))));

    session
        .peer_connection()
        .on_peer_connection_state_change(Box::new(move |peer_state| {
            let weak = weak.clone();
            let subscription = Arc::clone(&subscription);
            let writers = Arc::clone(&writers);
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                let Some(next) = SessionState::from_peer_state(peer_state) else {
                    return;
                };
                match next {
                    SessionState::Connected => {
                        if session.transition(SessionState::Connected).await.is_err() {
                            return;
                        }
                        let taken = writers.lock().ok().and_then(|mut slot| slot.take());
                        if let Some((video, audio)) = taken {
                            if let Some(writer) = video {
                                let packets = subscription.video_packets().await;
                                session.spawn(run_video_writer(
                                    writer,
                                    packets,
                                    session.cancel_token(),
                                ));
                            }
                            if let Some(writer) = audio {
                                let packets = subscription.audio_packets().await;
                                session.spawn(run_audio_writer(
                                    writer,
                                    packets,
                                    session.cancel_token(),
                                ));
                            }
                        }
                    }
                    SessionState::Disconnected | SessionState::Failed => {
                        let _ = session.transition(next).await;
                        // Teardown off the event task: close joins the
                        // session's own tracked tasks.
                        tokio::spawn(async move {
                            subscription.close().await;
                            if let Err(e) = session.close().await {
                                warn!(error = %e, "subscriber teardown failed");
                            }
                        });
                    }
                    _ => {}
                }
            })
        }));
}

/// Publish flow: transceivers are added eagerly so the answer accepts both
/// kinds, the hub registers the path, and per-track pumps start as remote
/// tracks arrive.
pub async fn publish_session(
    state: &Arc<BridgeState>,
    stream_path: &str,
    offer: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let session =
        Session::new(&state.api, SessionRole::Publisher, stream_path, &state.config).await?;

    if let Err(e) = session.add_recv_transceivers().await {
        let _ = session.close().await;
        return Err(e);
    }

    let publication = match state.hub.publish(stream_path).await {
        Ok(p) => p,
        Err(e) => {
            let _ = session.close().await;
            return Err(e);
        }
    };

    attach_publisher_track_handler(
        &session,
        Arc::clone(&publication),
        Duration::from_millis(state.config.pli_interval_ms),
    );
    attach_publisher_state_handler(&session, Arc::clone(&publication));

    let answer = async {
        session.set_remote_offer(offer).await?;
        session.create_answer().await
    }
    .await;

    match answer {
        Ok(answer) => {
            state.sessions.put(stream_path.to_string(), Arc::clone(&session));
            info!(stream_path, session_id = %session.id(), "publisher negotiated");
            Ok(answer)
        }
        Err(e) => {
            publication.close().await;
            let _ = session.close().await;
            Err(e)
        }
    }
}

fn attach_publisher_track_handler(
    session: &Arc<Session>,
    publication: Arc<dyn Publication>,
    pli_interval: Duration,
) {
    let weak = Arc::downgrade(session);
    session
        .peer_connection()
        .on_track(Box::new(move |track, _receiver, _transceiver| {
            let weak = weak.clone();
            let publication = Arc::clone(&publication);
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                if track.kind() == RTPCodecType::Audio {
                    let pt = track.payload_type();
                    let Some(codec) = AudioCodec::from_payload_type(pt) else {
                        warn!(
                            stream_path = %session.stream_path(),
                            payload_type = pt,
                            "unsupported audio payload type, track ignored"
                        );
                        return;
                    };
                    info!(
                        stream_path = %session.stream_path(),
                        codec = codec.name(),
                        "inbound audio track"
                    );
                    let sink = publication.audio_sink(codec);
                    session.spawn(pump_remote_track(track, sink, session.cancel_token()));
                } else {
                    let ssrc = track.ssrc();
                    info!(stream_path = %session.stream_path(), ssrc, "inbound video track");
                    let requester = Arc::new(PeerKeyframeRequester::new(Arc::clone(
                        session.peer_connection(),
                    )));
                    session.spawn(run_pli_loop(
                        requester,
                        ssrc,
                        pli_interval,
                        publication.done(),
                        session.cancel_token(),
                    ));
                    let sink = publication.video_sink(VideoCodec::H264);
                    session.spawn(pump_remote_track(track, sink, session.cancel_token()));
                }
            })
        }));
}

fn attach_publisher_state_handler(session: &Arc<Session>, publication: Arc<dyn Publication>) {
    let weak = Arc::downgrade(session);
    session
        .peer_connection()
        .on_peer_connection_state_change(Box::new(move |peer_state| {
            let weak = weak.clone();
            let publication = Arc::clone(&publication);
            Box::pin(async move {
                let Some(session) = weak.upgrade() else { return };
                let Some(next) = SessionState::from_peer_state(peer_state) else {
                    return;
                };
                match next {
                    SessionState::Connected => {
                        let _ = session.transition(SessionState::Connected).await;
                    }
                    SessionState::Disconnected | SessionState::Failed => {
                        let _ = session.transition(next).await;
                        tokio::spawn(async move {
                            publication.close().await;
                            if let Err(e) = session.close().await {
                                warn!(error = %e, "publisher teardown failed");
                            }
                        });
                    }
                    _ => {}
                }
            })
        }));
}
