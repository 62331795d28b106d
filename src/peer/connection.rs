use crate::error::MediaError;
use crate::logger::dump_selected_pair;
use crate::peer::media::LocalTrack;
use crate::peer::transport::{
    OnIceCandidateFn, OnStateChangeFn, OnTrackFn, PeerTransport, TransportFactory,
};
use crate::peer::types::{
    IceCandidate, IceServerConfig, RemoteTrack, SdpType, SessionDescription, TrackKind,
    TransportState,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// ServerConfig → RTCIceServer
pub fn get_user_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Проверка списка серверов перед использованием
pub fn validate_ice_servers(servers: &[IceServerConfig]) -> Result<(), String> {
    for server in servers {
        if server.url.is_empty() {
            return Err("Server URL cannot be empty".into());
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(format!(
                "TURN server {} requires username and credential",
                server.id
            ));
        }
    }
    Ok(())
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, MediaError> {
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(MediaError::Transport(format!(
            "unsupported description type {other:?}"
        ))),
    }
}

fn candidate_from_rtc(cand: &RTCIceCandidate) -> Option<IceCandidate> {
    match cand.to_json() {
        Ok(init) => Some(IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }),
        Err(e) => {
            warn!("Failed to serialize local candidate: {}", e);
            None
        }
    }
}

/// Транспорт на webrtc-rs
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl RtcTransport {
    pub async fn new(servers: &[IceServerConfig]) -> Result<Self, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);
        debug!("Peer connection created with {} ICE servers", servers.len());
        Ok(Self { pc })
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError> {
        let source = track.source().ok_or_else(|| {
            MediaError::Transport(format!("track {} has no media source", track.id()))
        })?;
        let sender = self
            .pc
            .add_track(source as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP надо вычитывать, иначе интерсепторы встанут
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc(desc).ok()
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    fn on_ice_candidate(&self, f: OnIceCandidateFn) {
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                match cand {
                    Some(c) => {
                        if let Some(candidate) = candidate_from_rtc(&c) {
                            f(Some(candidate));
                        }
                    }
                    // cand == None означает конец сбора
                    None => f(None),
                }
                Box::pin(async {})
            }));
    }

    fn on_track(&self, f: OnTrackFn) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!("Remote {:?} track arrived: {}", kind, track.id());
                f(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                });
                Box::pin(async {})
            },
        ));
    }

    fn on_state_change(&self, f: OnStateChangeFn) {
        let pc_stats = Arc::downgrade(&self.pc);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {:?}", st);
                let state = match st {
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => TransportState::Connecting,
                };
                if matches!(
                    state,
                    TransportState::Disconnected | TransportState::Failed
                ) {
                    if let Some(pc) = pc_stats.upgrade() {
                        tokio::spawn(async move {
                            dump_selected_pair(&pc, "BEFORE-FAIL").await;
                        });
                    }
                }
                f(state);
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Фабрика webrtc-rs транспортов
#[derive(Debug, Default, Clone)]
pub struct RtcTransportFactory;

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, MediaError> {
        validate_ice_servers(ice_servers).map_err(MediaError::Transport)?;
        Ok(Arc::new(RtcTransport::new(ice_servers).await?))
    }
}
