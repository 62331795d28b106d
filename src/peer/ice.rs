use crate::peer::connection::get_user_ice_servers;
use crate::peer::state::ICE_PROBE_TIMEOUT;
use crate::peer::transport::PeerTransport;
use crate::peer::types::{IceCandidate, IceServerConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    items: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!("Remote description not set yet, queuing candidate");
        self.items.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Применяет все отложенные кандидаты после установки remote description
    pub async fn apply(&mut self, transport: &dyn PeerTransport) -> usize {
        let mut applied = 0;
        for candidate in self.items.drain(..) {
            debug!("Applying pending candidate: {}", candidate.candidate);
            match transport.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply pending candidate: {}", e),
            }
        }
        applied
    }
}

/// Проверяет, что STUN/TURN сервер отвечает: собираем кандидатов только с
/// ним и ждём srflx (для STUN) или relay (для TURN).
pub async fn check_ice_server_availability(config: IceServerConfig) -> bool {
    info!("Checking ICE server {} ({})", config.id, config.url);

    let rtc_config = RTCConfiguration {
        ice_servers: get_user_ice_servers(std::slice::from_ref(&config)),
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    match api.new_peer_connection(rtc_config).await {
        Ok(peer_connection) => check_via_ice_gathering(Arc::new(peer_connection), &config.r#type).await,
        Err(e) => {
            warn!("Failed to create peer connection: {}", e);
            false
        }
    }
}

fn matches_server_type(candidate: &str, server_type: &str) -> bool {
    match server_type {
        "turn" => candidate.contains("typ relay"),
        _ => candidate.contains("typ srflx"),
    }
}

async fn check_via_ice_gathering(peer_connection: Arc<RTCPeerConnection>, server_type: &str) -> bool {
    let (state_tx, mut state_rx) = mpsc::channel(10);
    peer_connection.on_ice_gathering_state_change(Box::new(move |state| {
        let tx = state_tx.clone();
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async move {
            let _ = tx.send(state).await;
        })
    }));

    let (candidate_tx, mut candidate_rx) = mpsc::channel(10);
    let server_type_owned = server_type.to_string();
    peer_connection.on_ice_candidate(Box::new(move |candidate| {
        let tx = candidate_tx.clone();
        let server_type = server_type_owned.clone();
        Box::pin(async move {
            let Some(c) = candidate else {
                return;
            };
            if let Ok(json) = c.to_json() {
                if matches_server_type(&json.candidate, &server_type) {
                    let _ = tx.send(true).await;
                }
            }
        })
    }));

    // data channel нужен, чтобы offer вообще запустил сбор
    if let Err(e) = peer_connection.create_data_channel("probe", None).await {
        warn!("Failed to create data channel: {}", e);
        return false;
    }
    match peer_connection.create_offer(None).await {
        Ok(offer) => {
            if let Err(e) = peer_connection.set_local_description(offer).await {
                warn!("Failed to set local description: {}", e);
                return false;
            }
        }
        Err(e) => {
            warn!("Failed to create offer: {}", e);
            return false;
        }
    }

    let result = tokio::select! {
        result = timeout(ICE_PROBE_TIMEOUT, candidate_rx.recv()) => {
            matches!(result, Ok(Some(true)))
        }
        _ = async {
            while let Some(state) = state_rx.recv().await {
                if state == RTCIceGathererState::Complete {
                    break;
                }
            }
        } => {
            debug!("ICE gathering completed without a matching candidate");
            false
        }
    };

    let _ = peer_connection.close().await;
    info!("ICE server probe result: {}", result);
    result
}
