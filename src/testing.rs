use crate::error::MediaError;
use crate::peer::media::{LocalStream, LocalTrack, MediaDevices};
use crate::peer::transport::{
    OnIceCandidateFn, OnStateChangeFn, OnTrackFn, PeerTransport, TransportFactory,
};
use crate::peer::types::{
    IceCandidate, IceServerConfig, RemoteTrack, SdpType, SessionDescription, TrackKind,
    TransportState,
};
use crate::shell::{SessionShell, ShellEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Детерминированный транспорт: на set_local отдаёт один host-кандидат,
/// на set_remote сразу «получает» удалённый трек.
pub struct FakeTransport {
    origin: String,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    remote_sets: AtomicUsize,
    offers_created: AtomicUsize,
    answers_created: AtomicUsize,
    tracks: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
    close_fails: AtomicBool,
    on_candidate: Mutex<Option<OnIceCandidateFn>>,
    on_track: Mutex<Option<OnTrackFn>>,
    on_state: Mutex<Option<OnStateChangeFn>>,
}

impl FakeTransport {
    pub fn new(origin: &str) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.to_string(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            remote_sets: AtomicUsize::new(0),
            offers_created: AtomicUsize::new(0),
            answers_created: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_fails: AtomicBool::new(false),
            on_candidate: Mutex::new(None),
            on_track: Mutex::new(None),
            on_state: Mutex::new(None),
        })
    }

    pub fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn answers_created(&self) -> usize {
        self.answers_created.load(Ordering::SeqCst)
    }

    pub fn remote_sets(&self) -> usize {
        self.remote_sets.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn attached_tracks(&self) -> Vec<String> {
        self.tracks.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `close()` отработает, но вернёт ошибку
    pub fn fail_close(&self, fail: bool) {
        self.close_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fire_state(&self, state: TransportState) {
        if let Some(f) = self.on_state.lock().as_ref() {
            f(state);
        }
    }

    fn host_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host ufrag {}", self.origin),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    fn sdp(&self, kind: &str) -> String {
        format!("v=0\r\n{}\r\ns={kind}\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n", self.origin)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), MediaError> {
        self.tracks.lock().push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(self.sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        match self.remote.lock().as_ref() {
            Some(remote) if remote.sdp_type == SdpType::Offer => {}
            _ => return Err(MediaError::Transport("no remote offer".into())),
        }
        self.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(self.sdp("answer")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        *self.local.lock() = Some(desc);
        let candidate = self.host_candidate();
        if let Some(f) = self.on_candidate.lock().as_ref() {
            f(Some(candidate));
            f(None);
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        *self.remote.lock() = Some(desc);
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = self.on_track.lock().as_ref() {
            f(RemoteTrack {
                id: format!("remote-audio-{}", self.origin.len()),
                stream_id: "remote".into(),
                kind: TrackKind::Audio,
            });
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        if self.remote.lock().is_none() {
            return Err(MediaError::Transport("remote description not set".into()));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn on_ice_candidate(&self, f: OnIceCandidateFn) {
        *self.on_candidate.lock() = Some(f);
    }

    fn on_track(&self, f: OnTrackFn) {
        *self.on_track.lock() = Some(f);
    }

    fn on_state_change(&self, f: OnStateChangeFn) {
        *self.on_state.lock() = Some(f);
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("close failed".into()));
        }
        Ok(())
    }
}

/// Фабрика, запоминающая выданные транспорты
pub struct FakeFactory {
    origin: String,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn new(origin: &str) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.to_string(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, MediaError> {
        let transport = FakeTransport::new(&self.origin);
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub deny: bool,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, _audio: bool, _video: bool) -> Result<LocalStream, MediaError> {
        if self.deny {
            return Err(MediaError::Capture("permission denied".into()));
        }
        Ok(LocalStream::new(vec![
            LocalTrack::new(TrackKind::Audio),
            LocalTrack::new(TrackKind::Video),
        ]))
    }
}

#[derive(Default)]
pub struct RecordingShell {
    events: Mutex<Vec<ShellEvent>>,
}

impl RecordingShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ShellEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl SessionShell for RecordingShell {
    fn emit(&self, event: ShellEvent) {
        self.events.lock().push(event);
    }
}
