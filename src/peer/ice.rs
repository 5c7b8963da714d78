use crate::peer::connection::get_user_ice_servers;
use crate::peer::types::{IceCandidate, IceServerConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

/// Remote candidates received before the remote description, kept in receipt order.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    items: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.items.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Empties the queue, oldest first.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.items.drain(..).collect()
    }

    /// Moves every candidate of `other` behind ours.
    pub fn append(&mut self, other: &mut CandidateQueue) {
        self.items.append(&mut other.items);
    }
}

/// Checks a user-supplied ICE server list.
pub fn validate_ice_servers(servers: &[IceServerConfig]) -> Result<(), String> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(format!("ICE server `{}` has an empty URL", server.id));
        }
        if server.r#type != "stun" && server.r#type != "turn" {
            return Err(format!(
                "ICE server `{}` has unknown type `{}`",
                server.id, server.r#type
            ));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(format!(
                "TURN server `{}` requires username and credential",
                server.id
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
    summary
}

/// Checks one STUN/TURN server: gathers candidates against it alone and
/// reports whether a srflx (STUN) or relay (TURN) candidate showed up.
pub async fn check_ice_server(config: &IceServerConfig, wait: Duration) -> bool {
    if let Err(e) = validate_ice_servers(std::slice::from_ref(config)) {
        warn!("ICE server check skipped: {e}");
        return false;
    }

    let rtc_config = RTCConfiguration {
        ice_servers: get_user_ice_servers(std::slice::from_ref(config)),
        ..Default::default()
    };
    let api = APIBuilder::new().build();
    match api.new_peer_connection(rtc_config).await {
        Ok(pc) => {
            let pc = Arc::new(pc);
            let found = trial_gathering(&pc, &config.r#type, wait).await;
            let _ = pc.close().await;
            found
        }
        Err(e) => {
            warn!("Failed to create trial peer connection: {e}");
            false
        }
    }
}

async fn trial_gathering(pc: &Arc<RTCPeerConnection>, server_type: &str, wait: Duration) -> bool {
    let wanted = if server_type == "turn" {
        "typ relay"
    } else {
        "typ srflx"
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
    let on_candidate = tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Some(c) = candidate {
            if let Ok(json) = c.to_json() {
                debug!("trial candidate: {}", json.candidate);
                if json.candidate.contains(wanted) {
                    let _ = on_candidate.send(true);
                }
            }
        }
        Box::pin(async {})
    }));
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        if state == RTCIceGathererState::Complete {
            let _ = tx.send(false);
        }
        Box::pin(async {})
    }));

    // a data channel is enough to start gathering
    if let Err(e) = pc.create_data_channel("ice-check", None).await {
        warn!("Failed to create trial data channel: {e}");
        return false;
    }
    match pc.create_offer(None).await {
        Ok(offer) => {
            if let Err(e) = pc.set_local_description(offer).await {
                warn!("Failed to set trial local description: {e}");
                return false;
            }
        }
        Err(e) => {
            warn!("Failed to create trial offer: {e}");
            return false;
        }
    }

    match timeout(wait, rx.recv()).await {
        Ok(Some(found)) => found,
        Ok(None) => false,
        Err(_) => {
            debug!("ICE server check timed out after {:?}", wait);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(n: u32, typ: &str) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000{n} typ {typ}"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn queue_drains_in_receipt_order() {
        let mut q = CandidateQueue::default();
        q.push(cand(1, "host"));
        q.push(cand(2, "srflx"));
        q.push(cand(3, "relay"));
        let drained = q.drain();
        assert_eq!(drained, vec![cand(1, "host"), cand(2, "srflx"), cand(3, "relay")]);
        assert!(q.is_empty());
    }

    #[test]
    fn summary_counts_candidate_types() {
        let summary =
            analyze_candidates(&[cand(1, "host"), cand(2, "host"), cand(3, "srflx")]);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 0
            }
        );
    }

    #[test]
    fn unknown_server_type_is_invalid() {
        let bad = IceServerConfig {
            id: "x".into(),
            r#type: "quic".into(),
            url: "example.org".into(),
            username: None,
            credential: None,
        };
        assert!(validate_ice_servers(&[bad]).is_err());
    }
}
