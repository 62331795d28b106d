use crate::config::SessionConfig;
use crate::error::MediaError;
use crate::logger::dump_candidate;
use crate::peer::ice::PendingCandidates;
use crate::peer::media::{LocalStream, MediaDevices};
use crate::peer::state::{ConnectionState, NegotiationEvent};
use crate::peer::transport::{PeerTransport, TransportFactory};
use crate::peer::types::{
    IceCandidate, IceServerConfig, RemoteStream, RemoteTrack, SdpType, SessionDescription,
    TrackKind, TransportState,
};
use crate::session::Role;
use crate::shell::{SessionShell, ShellEvent};
use crate::signaling::{
    channel_name, PubSub, SignalMessage, SignalingChannel, EVENT_ANSWER, EVENT_ICE_CANDIDATE,
    EVENT_OFFER,
};
use crate::utils::sdp_session_id;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Кто звонит и куда
#[derive(Debug, Clone)]
pub struct CallParams {
    pub session_id: String,
    pub identity: String,
    pub role: Role,
    /// Токен подписки для private/presence канала
    pub channel_auth: Option<String>,
}

/// Внешние возможности, которые координатор получает снаружи
#[derive(Clone)]
pub struct CallDeps {
    pub pubsub: Arc<dyn PubSub>,
    pub devices: Arc<dyn MediaDevices>,
    pub transports: Arc<dyn TransportFactory>,
    pub shell: Arc<dyn SessionShell>,
}

/// Канал, транспорт и таймеры сводятся в одну очередь одной задачи
enum CoordinatorEvent {
    Initiate,
    ResendOffer,
    WatchdogFired,
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(RemoteTrack),
    Transport(TransportState),
    Signal(SignalMessage),
}

#[derive(Default)]
struct Negotiation {
    pending: PendingCandidates,
    /// Ключ offer, на который менти уже ответил
    answered_offer: Option<String>,
    transport_problem: bool,
}

struct CallInner {
    session_id: String,
    identity: String,
    role: Role,
    local_stream: LocalStream,
    transport: Arc<dyn PeerTransport>,
    signaling: SignalingChannel,
    shell: Arc<dyn SessionShell>,
    state: watch::Sender<ConnectionState>,
    remote: Mutex<RemoteStream>,
    muted: AtomicBool,
    video_off: AtomicBool,
    ended: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Живой звонок. Offer инициирует только ментор, поэтому glare невозможен.
/// Drop без `end_call` всё равно освобождает захват.
pub struct CallHandle {
    inner: Arc<CallInner>,
}

/// Запуск звонка: захват → транспорт → треки → обработчики → offer (ментор)
pub async fn start_call(
    config: &SessionConfig,
    params: CallParams,
    deps: CallDeps,
) -> Result<CallHandle, MediaError> {
    let CallDeps {
        pubsub,
        devices,
        transports,
        shell,
    } = deps;
    let CallParams {
        session_id,
        identity,
        role,
        channel_auth,
    } = params;

    // 1. локальный захват, без повторов
    let local_stream = match devices.get_user_media(true, true).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(%session_id, "local capture failed: {}", e);
            shell.emit(ShellEvent::CaptureFailed(e.to_string()));
            return Err(e);
        }
    };

    // 2-3. транспорт и треки
    let transport =
        match open_transport(transports.as_ref(), &config.ice_servers, &local_stream).await {
            Ok(transport) => transport,
            Err(e) => {
                local_stream.stop_all();
                error!(%session_id, "peer transport setup failed: {}", e);
                shell.emit(ShellEvent::NegotiationError(e.to_string()));
                return Err(e);
            }
        };

    let name = channel_name(config.channel_visibility, &session_id);
    let channel = match pubsub.subscribe(&name, channel_auth.as_deref()).await {
        Ok(channel) => channel,
        Err(e) => {
            local_stream.stop_all();
            if let Err(close_err) = transport.close().await {
                warn!("transport close failed: {}", close_err);
            }
            error!(%session_id, channel = %name, "signaling subscribe failed: {}", e);
            shell.emit(ShellEvent::NegotiationError(e.to_string()));
            return Err(e.into());
        }
    };
    let signaling = SignalingChannel::new(channel, identity.clone(), config.compress_descriptions);

    let (state, _) = watch::channel(ConnectionState::Idle);
    let inner = Arc::new(CallInner {
        session_id,
        identity,
        role,
        local_stream,
        transport: transport.clone(),
        signaling: signaling.clone(),
        shell,
        state,
        remote: Mutex::new(RemoteStream::default()),
        muted: AtomicBool::new(false),
        video_off: AtomicBool::new(false),
        ended: AtomicBool::new(false),
        tasks: Mutex::new(Vec::new()),
    });

    let (tx, rx) = mpsc::unbounded_channel();

    // 4. удалённые треки
    {
        let tx = tx.clone();
        transport.on_track(Box::new(move |track| {
            let _ = tx.send(CoordinatorEvent::RemoteTrack(track));
        }));
    }
    // 5. локальные кандидаты
    {
        let tx = tx.clone();
        transport.on_ice_candidate(Box::new(move |candidate| {
            let _ = tx.send(CoordinatorEvent::LocalCandidate(candidate));
        }));
    }
    {
        let tx = tx.clone();
        transport.on_state_change(Box::new(move |state| {
            let _ = tx.send(CoordinatorEvent::Transport(state));
        }));
    }
    // 6, 8, 9. входящие кандидаты, offer, answer (собственное эхо уже отброшено)
    for event in [EVENT_ICE_CANDIDATE, EVENT_OFFER, EVENT_ANSWER] {
        let tx = tx.clone();
        signaling.on(event, move |msg| {
            let _ = tx.send(CoordinatorEvent::Signal(msg));
        });
    }

    inner.advance(NegotiationEvent::Started);

    // 7. offer инициирует только ментор
    if role == Role::Mentor {
        let _ = tx.send(CoordinatorEvent::Initiate);
    }

    let mut tasks = vec![tokio::spawn(run(inner.clone(), rx))];
    if let Some(timeout) = config.negotiation_timeout {
        tasks.push(tokio::spawn(watchdog(tx.clone(), timeout)));
    }
    if role == Role::Mentor && config.offer_resend_limit > 0 {
        tasks.push(tokio::spawn(resend_offers(
            tx.clone(),
            inner.state.subscribe(),
            config.offer_resend_interval,
            config.offer_resend_limit,
        )));
    }
    inner.tasks.lock().extend(tasks);

    info!(session_id = %inner.session_id, ?role, channel = %name, "call started");
    Ok(CallHandle { inner })
}

async fn open_transport(
    transports: &dyn TransportFactory,
    ice_servers: &[IceServerConfig],
    local_stream: &LocalStream,
) -> Result<Arc<dyn PeerTransport>, MediaError> {
    let transport = transports.create(ice_servers).await?;
    for track in local_stream.tracks() {
        if let Err(e) = transport.add_track(track).await {
            let _ = transport.close().await;
            return Err(e);
        }
    }
    Ok(transport)
}

async fn run(inner: Arc<CallInner>, mut rx: mpsc::UnboundedReceiver<CoordinatorEvent>) {
    let mut negotiation = Negotiation::default();
    while let Some(event) = rx.recv().await {
        if inner.is_ended() {
            break;
        }
        if let Err(e) = inner.handle(&mut negotiation, event).await {
            error!(session_id = %inner.session_id, "negotiation step failed: {}", e);
            inner.shell.emit(ShellEvent::NegotiationError(e.to_string()));
        }
    }
    debug!(session_id = %inner.session_id, "coordinator loop stopped");
}

async fn watchdog(tx: mpsc::UnboundedSender<CoordinatorEvent>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let _ = tx.send(CoordinatorEvent::WatchdogFired);
}

/// Менти мог подписаться уже после первого offer: канал ничего не хранит
async fn resend_offers(
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
    state: watch::Receiver<ConnectionState>,
    interval: Duration,
    limit: u32,
) {
    for _ in 0..limit {
        tokio::time::sleep(interval).await;
        if *state.borrow() != ConnectionState::Negotiating {
            break;
        }
        if tx.send(CoordinatorEvent::ResendOffer).is_err() {
            break;
        }
    }
}

/// offer одного и того же peer connection узнаём по sess-id из `o=`
fn offer_key(desc: &SessionDescription) -> String {
    sdp_session_id(&desc.sdp)
        .map(str::to_string)
        .unwrap_or_else(|| desc.sdp.clone())
}

impl CallInner {
    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn advance(&self, event: NegotiationEvent) -> bool {
        let role = self.role;
        let changed = self.state.send_if_modified(|state| {
            let next = state.next(role, event);
            if next == *state {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            let state = self.current();
            info!(session_id = %self.session_id, %state, "connection state changed");
            self.shell.emit(ShellEvent::StateChanged(state));
        }
        changed
    }

    fn offer_message(&self, desc: SessionDescription) -> SignalMessage {
        SignalMessage::Offer {
            session_description: desc,
            sender_identity: self.identity.clone(),
        }
    }

    async fn handle(
        &self,
        negotiation: &mut Negotiation,
        event: CoordinatorEvent,
    ) -> Result<(), MediaError> {
        match event {
            CoordinatorEvent::Initiate => {
                let offer = self.transport.create_offer().await?;
                self.transport.set_local_description(offer.clone()).await?;
                self.signaling.send(&self.offer_message(offer))?;
                info!(session_id = %self.session_id, "offer broadcast");
            }
            CoordinatorEvent::ResendOffer => {
                if self.current() != ConnectionState::Negotiating {
                    return Ok(());
                }
                if let Some(offer) = self.transport.local_description().await {
                    if offer.sdp_type == SdpType::Offer {
                        debug!(session_id = %self.session_id, "re-broadcasting offer");
                        self.signaling.send(&self.offer_message(offer))?;
                    }
                }
            }
            CoordinatorEvent::WatchdogFired => {
                if self.current() == ConnectionState::Negotiating {
                    warn!(session_id = %self.session_id, "negotiation still pending");
                    self.shell.emit(ShellEvent::NegotiationStalled);
                }
            }
            CoordinatorEvent::LocalCandidate(Some(candidate)) => {
                dump_candidate("LOCAL", &candidate);
                self.signaling.send(&SignalMessage::IceCandidate {
                    candidate,
                    sender_identity: self.identity.clone(),
                })?;
            }
            CoordinatorEvent::LocalCandidate(None) => {
                debug!("ICE candidate gathering completed");
            }
            CoordinatorEvent::RemoteTrack(track) => {
                let snapshot = {
                    let mut remote = self.remote.lock();
                    remote.add(track);
                    remote.clone()
                };
                self.shell.emit(ShellEvent::RemoteStreamUpdated(snapshot));
                self.advance(NegotiationEvent::RemoteTrackArrived);
            }
            CoordinatorEvent::Transport(state) => match state {
                TransportState::Disconnected | TransportState::Failed => {
                    if !negotiation.transport_problem {
                        negotiation.transport_problem = true;
                        warn!(session_id = %self.session_id, ?state, "peer transport problem");
                        self.shell.emit(ShellEvent::ConnectionProblem);
                    }
                }
                TransportState::Connected => {
                    if negotiation.transport_problem {
                        negotiation.transport_problem = false;
                        info!(session_id = %self.session_id, "peer transport recovered");
                        self.shell.emit(ShellEvent::ConnectionRecovered);
                    }
                }
                TransportState::Connecting | TransportState::Closed => {}
            },
            CoordinatorEvent::Signal(msg) => self.on_signal(negotiation, msg).await?,
        }
        Ok(())
    }

    async fn on_signal(
        &self,
        negotiation: &mut Negotiation,
        msg: SignalMessage,
    ) -> Result<(), MediaError> {
        match msg {
            SignalMessage::IceCandidate { candidate, .. } => {
                dump_candidate("REMOTE", &candidate);
                if self.transport.has_remote_description().await {
                    self.transport.add_ice_candidate(candidate).await?;
                } else {
                    negotiation.pending.push(candidate);
                }
            }
            SignalMessage::Offer {
                session_description,
                sender_identity,
            } => {
                if self.role == Role::Mentor {
                    warn!(from = %sender_identity, "mentor ignores incoming offer");
                    return Ok(());
                }
                let key = offer_key(&session_description);
                if negotiation.answered_offer.as_deref() == Some(key.as_str()) {
                    // повтор того же offer: отдаём текущий answer ещё раз
                    if let Some(answer) = self.transport.local_description().await {
                        if answer.sdp_type == SdpType::Answer {
                            debug!("repeating answer for a re-broadcast offer");
                            self.signaling.send(&SignalMessage::Answer {
                                session_description: answer,
                                sender_identity: self.identity.clone(),
                            })?;
                        }
                    }
                    return Ok(());
                }

                self.transport
                    .set_remote_description(session_description)
                    .await?;
                negotiation.pending.apply(self.transport.as_ref()).await;
                let answer = self.transport.create_answer().await?;
                self.transport.set_local_description(answer.clone()).await?;
                self.signaling.send(&SignalMessage::Answer {
                    session_description: answer,
                    sender_identity: self.identity.clone(),
                })?;
                negotiation.answered_offer = Some(key);
                info!(session_id = %self.session_id, from = %sender_identity, "offer answered");
            }
            SignalMessage::Answer {
                session_description,
                sender_identity,
            } => {
                if self.role == Role::Mentee {
                    debug!(from = %sender_identity, "mentee ignores answers");
                    return Ok(());
                }
                if self.current() != ConnectionState::Negotiating {
                    debug!(from = %sender_identity, "duplicate answer ignored");
                    return Ok(());
                }
                self.transport
                    .set_remote_description(session_description)
                    .await?;
                negotiation.pending.apply(self.transport.as_ref()).await;
                self.advance(NegotiationEvent::AnswerApplied);
            }
            SignalMessage::ChatMessage(_) => {}
        }
        Ok(())
    }

    /// Синхронная часть teardown; `false`, если уже выполнялась
    fn begin_teardown(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.signaling.unsubscribe();
        self.local_stream.stop_all();
        self.advance(NegotiationEvent::TornDown);
        info!(session_id = %self.session_id, "call torn down");
        true
    }
}

impl CallHandle {
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Ждёт `Connected` (true) или завершения звонка (false)
    pub async fn wait_connected(&self) -> bool {
        let mut rx = self.watch_state();
        let connected = rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Ended))
            .await
            .map(|state| state.is_connected())
            .unwrap_or(false);
        connected
    }

    pub fn remote_stream(&self) -> RemoteStream {
        self.inner.remote.lock().clone()
    }

    pub fn local_stream(&self) -> &LocalStream {
        &self.inner.local_stream
    }

    /// Канал сессии, общий с чатом
    pub fn signaling(&self) -> SignalingChannel {
        self.inner.signaling.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    pub fn is_video_off(&self) -> bool {
        self.inner.video_off.load(Ordering::SeqCst)
    }

    /// Переключает аудио треки; согласование не трогает
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.inner.muted.fetch_xor(true, Ordering::SeqCst);
        self.inner
            .local_stream
            .set_kind_enabled(TrackKind::Audio, !muted);
        self.emit_local_media();
        muted
    }

    /// Переключает видео треки; согласование не трогает
    pub fn toggle_video(&self) -> bool {
        let video_off = !self.inner.video_off.fetch_xor(true, Ordering::SeqCst);
        self.inner
            .local_stream
            .set_kind_enabled(TrackKind::Video, !video_off);
        self.emit_local_media();
        video_off
    }

    fn emit_local_media(&self) {
        self.inner.shell.emit(ShellEvent::LocalMediaToggled {
            muted: self.is_muted(),
            video_off: self.is_video_off(),
        });
    }

    /// Завершает звонок. Другой стороне ничего не отправляется.
    pub async fn end_call(&self) -> Result<(), MediaError> {
        if !self.inner.begin_teardown() {
            return Ok(());
        }
        let closed = self.inner.transport.close().await;
        if let Err(e) = &closed {
            warn!(session_id = %self.inner.session_id, "transport close failed: {}", e);
        }
        self.inner.shell.emit(ShellEvent::CallEnded);
        closed
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if !self.inner.begin_teardown() {
            return;
        }
        let transport = self.inner.transport.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = transport.close().await {
                    warn!("transport close failed: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{ChannelVisibility, LocalHub};
    use crate::testing::{FakeDevices, FakeFactory, FakeTransport, RecordingShell};
    use tokio::time::timeout;

    const SESSION: &str = "xyz";
    const MENTOR: &str = "a@example.com";
    const MENTEE: &str = "b@example.com";

    fn config() -> SessionConfig {
        SessionConfig {
            channel_visibility: ChannelVisibility::Public,
            negotiation_timeout: None,
            offer_resend_limit: 0,
            ..SessionConfig::default()
        }
    }

    struct Party {
        handle: CallHandle,
        transport: Arc<FakeTransport>,
        shell: Arc<RecordingShell>,
    }

    async fn join(hub: &LocalHub, config: &SessionConfig, identity: &str, role: Role) -> Party {
        let shell = RecordingShell::new();
        let factory = FakeFactory::new(&format!("o=- {} 1 IN IP4 0.0.0.0", identity.len() * 1000 + role as usize));
        let handle = start_call(
            config,
            CallParams {
                session_id: SESSION.into(),
                identity: identity.into(),
                role,
                channel_auth: None,
            },
            CallDeps {
                pubsub: Arc::new(hub.connect()),
                devices: Arc::new(FakeDevices::default()),
                transports: factory.clone(),
                shell: shell.clone(),
            },
        )
        .await
        .expect("call starts");
        let transport = factory.last().expect("transport created");
        Party {
            handle,
            transport,
            shell,
        }
    }

    /// Посторонний участник канала, через которого тесты подкидывают сообщения
    async fn injector(hub: &LocalHub, identity: &str) -> SignalingChannel {
        let raw = hub
            .connect()
            .subscribe(&channel_name(ChannelVisibility::Public, SESSION), None)
            .await
            .unwrap();
        SignalingChannel::new(raw, identity, false)
    }

    async fn connected(handle: &CallHandle) -> bool {
        timeout(Duration::from_secs(2), handle.wait_connected())
            .await
            .unwrap_or(false)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn offer(sdp_id: &str, from: &str) -> SignalMessage {
        SignalMessage::Offer {
            session_description: SessionDescription::offer(format!(
                "v=0\r\no=- {sdp_id} 1 IN IP4 0.0.0.0\r\n"
            )),
            sender_identity: from.into(),
        }
    }

    fn answer(from: &str) -> SignalMessage {
        SignalMessage::Answer {
            session_description: SessionDescription::answer("v=0\r\no=- 77 1 IN IP4 0.0.0.0\r\n"),
            sender_identity: from.into(),
        }
    }

    #[tokio::test]
    async fn mentor_and_mentee_connect() {
        let hub = LocalHub::new();
        let config = config();
        let mentee = join(&hub, &config, MENTEE, Role::Mentee).await;
        let mentor = join(&hub, &config, MENTOR, Role::Mentor).await;

        assert!(connected(&mentor.handle).await);
        assert!(connected(&mentee.handle).await);

        assert_eq!(mentor.transport.offers_created(), 1);
        assert_eq!(mentee.transport.offers_created(), 0);
        assert_eq!(mentee.transport.answers_created(), 1);
        assert_eq!(
            mentor.transport.remote().map(|d| d.sdp_type),
            Some(SdpType::Answer)
        );
        assert_eq!(mentor.transport.attached_tracks().len(), 2);

        settle().await;
        // каждая сторона применила host-кандидат другой
        assert!(!mentor.transport.applied_candidates().is_empty());
        assert!(!mentee.transport.applied_candidates().is_empty());
        assert_eq!(
            mentor
                .shell
                .count(|e| *e == ShellEvent::StateChanged(ConnectionState::Connected)),
            1
        );
        assert!(mentee.handle.remote_stream().tracks.len() == 1);
    }

    #[tokio::test]
    async fn late_mentee_gets_a_re_broadcast_offer() {
        let hub = LocalHub::new();
        let config = SessionConfig {
            offer_resend_interval: Duration::from_millis(20),
            offer_resend_limit: 50,
            ..config()
        };
        let mentor = join(&hub, &config, MENTOR, Role::Mentor).await;
        settle().await;
        let mentee = join(&hub, &config, MENTEE, Role::Mentee).await;

        assert!(connected(&mentor.handle).await);
        assert!(connected(&mentee.handle).await);
        settle().await;
        assert_eq!(mentor.transport.offers_created(), 1);
        // повторы одного offer не порождают новых answer
        assert_eq!(mentee.transport.answers_created(), 1);
        assert_eq!(mentor.transport.remote_sets(), 1);
    }

    #[tokio::test]
    async fn own_echo_never_moves_state() {
        let hub = LocalHub::new();
        let mentor = join(&hub, &config(), MENTOR, Role::Mentor).await;
        let forged = injector(&hub, MENTOR).await;

        forged.send(&answer(MENTOR)).unwrap();
        forged
            .send(&SignalMessage::IceCandidate {
                candidate: IceCandidate {
                    candidate: "candidate:9 1 udp 1 10.9.9.9 9 typ host".into(),
                    sdp_mid: None,
                    sdp_mline_index: Some(0),
                },
                sender_identity: MENTOR.into(),
            })
            .unwrap();
        settle().await;

        assert_eq!(mentor.handle.state(), ConnectionState::Negotiating);
        assert_eq!(mentor.transport.remote_sets(), 0);
        assert!(mentor.transport.applied_candidates().is_empty());
    }

    #[tokio::test]
    async fn mentor_connects_exactly_once() {
        let hub = LocalHub::new();
        let mentor = join(&hub, &config(), MENTOR, Role::Mentor).await;
        let peer = injector(&hub, MENTEE).await;

        peer.send(&answer(MENTEE)).unwrap();
        assert!(connected(&mentor.handle).await);
        peer.send(&answer(MENTEE)).unwrap();
        settle().await;

        assert_eq!(mentor.transport.remote_sets(), 1);
        assert_eq!(
            mentor
                .shell
                .count(|e| *e == ShellEvent::StateChanged(ConnectionState::Connected)),
            1
        );
        // offer от кого-то ещё ментор не принимает
        peer.send(&offer("555", MENTEE)).unwrap();
        settle().await;
        assert_eq!(mentor.transport.answers_created(), 0);
    }

    #[tokio::test]
    async fn mentee_never_offers() {
        let hub = LocalHub::new();
        let mentee = join(&hub, &config(), MENTEE, Role::Mentee).await;
        let peer = injector(&hub, MENTOR).await;

        peer.send(&answer(MENTOR)).unwrap();
        settle().await;
        assert_eq!(mentee.handle.state(), ConnectionState::Negotiating);
        assert_eq!(mentee.transport.remote_sets(), 0);

        peer.send(&offer("123", MENTOR)).unwrap();
        assert!(connected(&mentee.handle).await);
        assert_eq!(mentee.transport.offers_created(), 0);
        assert_eq!(mentee.transport.answers_created(), 1);
    }

    #[tokio::test]
    async fn early_candidates_wait_for_the_offer() {
        let hub = LocalHub::new();
        let mentee = join(&hub, &config(), MENTEE, Role::Mentee).await;
        let peer = injector(&hub, MENTOR).await;
        let early = IceCandidate {
            candidate: "candidate:5 1 udp 1 10.0.0.5 5 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };

        peer.send(&SignalMessage::IceCandidate {
            candidate: early.clone(),
            sender_identity: MENTOR.into(),
        })
        .unwrap();
        settle().await;
        assert!(mentee.transport.applied_candidates().is_empty());

        peer.send(&offer("123", MENTOR)).unwrap();
        assert!(connected(&mentee.handle).await);
        assert_eq!(mentee.transport.applied_candidates(), vec![early]);
    }

    #[tokio::test]
    async fn toggles_do_not_touch_negotiation() {
        let hub = LocalHub::new();
        let mentor = join(&hub, &config(), MENTOR, Role::Mentor).await;
        settle().await;
        let before = mentor.handle.state();

        assert!(mentor.handle.toggle_mute());
        assert!(mentor.handle.toggle_video());
        let audio_enabled: Vec<_> = mentor
            .handle
            .local_stream()
            .tracks()
            .iter()
            .map(|t| (t.kind(), t.is_enabled()))
            .collect();
        assert_eq!(
            audio_enabled,
            vec![(TrackKind::Audio, false), (TrackKind::Video, false)]
        );
        assert!(!mentor.handle.toggle_mute());
        assert!(mentor.handle.local_stream().tracks()[0].is_enabled());
        settle().await;

        assert_eq!(mentor.handle.state(), before);
        assert_eq!(mentor.transport.offers_created(), 1);
    }

    #[tokio::test]
    async fn end_call_releases_everything() {
        let hub = LocalHub::new();
        let mentee = join(&hub, &config(), MENTEE, Role::Mentee).await;
        let name = channel_name(ChannelVisibility::Public, SESSION);
        assert_eq!(hub.subscriber_count(&name), 1);

        mentee.handle.end_call().await.unwrap();
        mentee.handle.end_call().await.unwrap();

        assert_eq!(mentee.handle.local_stream().live_count(), 0);
        assert_eq!(hub.subscriber_count(&name), 0);
        assert!(mentee.transport.is_closed());
        assert_eq!(mentee.handle.state(), ConnectionState::Ended);
        assert_eq!(mentee.shell.count(|e| *e == ShellEvent::CallEnded), 1);

        // события после teardown не обрабатываются
        let peer = injector(&hub, MENTOR).await;
        peer.send(&offer("123", MENTOR)).unwrap();
        settle().await;
        assert_eq!(mentee.transport.remote_sets(), 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_capture() {
        let hub = LocalHub::new();
        let party = join(&hub, &config(), MENTOR, Role::Mentor).await;
        let tracks = party.handle.local_stream().clone();
        let transport = party.transport.clone();
        drop(party);
        settle().await;

        assert_eq!(tracks.live_count(), 0);
        assert!(transport.is_closed());
        assert_eq!(
            hub.subscriber_count(&channel_name(ChannelVisibility::Public, SESSION)),
            0
        );
    }

    #[tokio::test]
    async fn capture_failure_is_reported() {
        let hub = LocalHub::new();
        let shell = RecordingShell::new();
        let result = start_call(
            &config(),
            CallParams {
                session_id: SESSION.into(),
                identity: MENTOR.into(),
                role: Role::Mentor,
                channel_auth: None,
            },
            CallDeps {
                pubsub: Arc::new(hub.connect()),
                devices: Arc::new(FakeDevices { deny: true }),
                transports: FakeFactory::new("o=- 1 1 IN IP4 0.0.0.0"),
                shell: shell.clone(),
            },
        )
        .await;

        assert!(matches!(result, Err(MediaError::Capture(_))));
        assert_eq!(
            shell.count(|e| matches!(e, ShellEvent::CaptureFailed(_))),
            1
        );
        assert_eq!(
            hub.subscriber_count(&channel_name(ChannelVisibility::Public, SESSION)),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_negotiation_is_surfaced_once() {
        let hub = LocalHub::new();
        let config = SessionConfig {
            negotiation_timeout: Some(Duration::from_secs(5)),
            ..config()
        };
        let mentor = join(&hub, &config, MENTOR, Role::Mentor).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        assert_eq!(mentor.handle.state(), ConnectionState::Negotiating);
        assert_eq!(
            mentor.shell.count(|e| *e == ShellEvent::NegotiationStalled),
            1
        );
    }

    #[tokio::test]
    async fn transport_problems_are_observed_not_acted_on() {
        let hub = LocalHub::new();
        let mentor = join(&hub, &config(), MENTOR, Role::Mentor).await;

        mentor.transport.fire_state(TransportState::Disconnected);
        mentor.transport.fire_state(TransportState::Failed);
        mentor.transport.fire_state(TransportState::Connected);
        settle().await;

        assert_eq!(mentor.shell.count(|e| *e == ShellEvent::ConnectionProblem), 1);
        assert_eq!(mentor.shell.count(|e| *e == ShellEvent::ConnectionRecovered), 1);
        assert_eq!(mentor.handle.state(), ConnectionState::Negotiating);
    }

    #[tokio::test]
    async fn failed_close_still_releases_capture_and_channel() {
        let hub = LocalHub::new();
        let mentee = join(&hub, &config(), MENTEE, Role::Mentee).await;
        mentee.transport.fail_close(true);

        assert!(matches!(
            mentee.handle.end_call().await,
            Err(MediaError::Transport(_))
        ));
        assert_eq!(mentee.handle.local_stream().live_count(), 0);
        assert_eq!(
            hub.subscriber_count(&channel_name(ChannelVisibility::Public, SESSION)),
            0
        );
        assert_eq!(mentee.handle.state(), ConnectionState::Ended);
        assert_eq!(mentee.shell.count(|e| *e == ShellEvent::CallEnded), 1);
    }

    async fn real_call(hub: &LocalHub, identity: &str, role: Role) -> CallHandle {
        let config = SessionConfig {
            ice_servers: Vec::new(),
            ..config()
        };
        start_call(
            &config,
            CallParams {
                session_id: SESSION.into(),
                identity: identity.into(),
                role,
                channel_auth: None,
            },
            CallDeps {
                pubsub: Arc::new(hub.connect()),
                devices: Arc::new(crate::peer::media::SyntheticDevices),
                transports: Arc::new(crate::peer::connection::RtcTransportFactory),
                shell: RecordingShell::new(),
            },
        )
        .await
        .expect("call starts")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn muting_before_connect_does_not_block_the_mentee() {
        let hub = LocalHub::new();
        let mentee = real_call(&hub, MENTEE, Role::Mentee).await;
        let mentor = real_call(&hub, MENTOR, Role::Mentor).await;
        // выключаем всё до того, как пошёл первый RTP
        assert!(mentor.toggle_mute());
        assert!(mentor.toggle_video());

        let wait = Duration::from_secs(10);
        assert!(timeout(wait, mentor.wait_connected()).await.unwrap_or(false));
        assert!(timeout(wait, mentee.wait_connected()).await.unwrap_or(false));
        assert!(!mentee.remote_stream().tracks.is_empty());

        mentor.end_call().await.unwrap();
        mentee.end_call().await.unwrap();
    }
}
