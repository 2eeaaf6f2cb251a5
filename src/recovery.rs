//! Loss recovery
//!
//! Inbound video: the bridge cannot see downstream hub consumers join, so it
//! asks the publishing peer for keyframes on a fixed interval (PLI). Outbound
//! video: RTCP feedback from the subscribing peer is drained and logged; the
//! hub's own keyframe cadence is what the subscriber actually gets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use crate::error::{Error, Result};

/// Seam between the PLI timer loop and the peer connection
#[async_trait]
pub trait KeyframeRequester: Send + Sync {
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()>;
}

/// [`KeyframeRequester`] writing RTCP PLI on a peer connection
pub struct PeerKeyframeRequester {
    pc: Arc<RTCPeerConnection>,
}

impl PeerKeyframeRequester {
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self { pc }
    }
}

#[async_trait]
impl KeyframeRequester for PeerKeyframeRequester {
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
            .map(|_| ())
            .map_err(|e| Error::PeerConnectionError(format!("PLI write failed: {e}")))
    }
}

/// Request a keyframe every `interval` until the stream's done token or the
/// owning session's cancel token fires, or a request fails. The first
/// request happens one full interval in.
pub async fn run_pli_loop(
    requester: Arc<dyn KeyframeRequester>,
    media_ssrc: u32,
    interval: Duration,
    done: CancellationToken,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        tokio::select! {
            _ = done.cancelled() => {
                debug!(media_ssrc, "PLI loop stopped");
                return;
            }
            _ = cancel.cancelled() => {
                debug!(media_ssrc, "PLI loop cancelled with session");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = requester.request_keyframe(media_ssrc).await {
                    warn!(media_ssrc, error = %e, "PLI loop stopped on write error");
                    return;
                }
            }
        }
    }
}

/// Drain RTCP feedback on an outbound video sender, logging received PLI.
/// Exits on the first read error or when the token cancels.
pub async fn run_rtcp_feedback_loop(sender: Arc<RTCRtpSender>, cancel: CancellationToken) {
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("RTCP feedback loop cancelled");
                return;
            }
            read = sender.read(&mut buf) => match read {
                Ok((packets, _attrs)) => {
                    for packet in &packets {
                        if let Some(pli) = packet
                            .as_any()
                            .downcast_ref::<PictureLossIndication>()
                        {
                            info!(media_ssrc = pli.media_ssrc, "subscriber requested keyframe");
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "RTCP feedback loop ended");
                    return;
                }
            }
        }
    }
}
