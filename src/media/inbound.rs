//! Inbound pump loops (remote track → hub ingest)

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use crate::bus::MediaSink;

/// Read unit for remote track payloads; packets above this are dropped by
/// the reader as oversized.
pub const READ_BUFFER_SIZE: usize = 1460;

/// Copy remote track packets into a hub ingest sink until the track errors
/// out (peer gone) or the token cancels. The hub receives whole RTP packets;
/// depacketization is its concern.
pub async fn pump_remote_track(
    track: Arc<TrackRemote>,
    sink: Arc<dyn MediaSink>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(ssrc = track.ssrc(), "inbound pump cancelled");
                return;
            }
            read = track.read(&mut buf) => match read {
                Ok((packet, _attrs)) => match packet.marshal() {
                    Ok(raw) => sink.push(raw),
                    Err(e) => {
                        debug!(ssrc = track.ssrc(), error = %e, "dropping unmarshalable packet");
                    }
                },
                Err(e) => {
                    debug!(ssrc = track.ssrc(), error = %e, "remote track ended");
                    return;
                }
            }
        }
    }
}
