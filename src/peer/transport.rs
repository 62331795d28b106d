use crate::error::MediaError;
use crate::peer::media::LocalTrack;
use crate::peer::types::{
    IceCandidate, IceServerConfig, RemoteTrack, SessionDescription, TransportState,
};
use async_trait::async_trait;
use std::sync::Arc;

/// `None` означает конец сбора кандидатов
pub type OnIceCandidateFn = Box<dyn Fn(Option<IceCandidate>) + Send + Sync>;
pub type OnTrackFn = Box<dyn Fn(RemoteTrack) + Send + Sync>;
pub type OnStateChangeFn = Box<dyn Fn(TransportState) + Send + Sync>;

/// Узкий интерфейс peer connection, чтобы координатор можно было гонять
/// на тестовом двойнике без сети и устройств.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError>;
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    /// Текущее локальное описание, уже с собранными кандидатами
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    fn on_ice_candidate(&self, f: OnIceCandidateFn);
    fn on_track(&self, f: OnTrackFn);
    fn on_state_change(&self, f: OnStateChangeFn);
    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, MediaError>;
}
