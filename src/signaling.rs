use crate::error::ChannelError;
use crate::peer::codec::{pack_description, unpack_description};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::session::verify_channel_auth;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ICE_CANDIDATE: &str = "iceCandidate";
pub const EVENT_CHAT_MESSAGE: &str = "chatMessage";

/// Сколько событий одного типа держим до появления обработчика
pub const EARLY_EVENT_LIMIT: usize = 64;
/// Сколько посторонних имён событий буферизуем на подписку
pub const EARLY_FOREIGN_KINDS: usize = 8;

fn is_session_event(event: &str) -> bool {
    matches!(
        event,
        EVENT_OFFER | EVENT_ANSWER | EVENT_ICE_CANDIDATE | EVENT_CHAT_MESSAGE
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelVisibility {
    Public,
    Private,
    Presence,
}

impl ChannelVisibility {
    pub fn prefix(self) -> &'static str {
        match self {
            ChannelVisibility::Public => "",
            ChannelVisibility::Private => "private-",
            ChannelVisibility::Presence => "presence-",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "public" => Some(ChannelVisibility::Public),
            "private" => Some(ChannelVisibility::Private),
            "presence" => Some(ChannelVisibility::Presence),
            _ => None,
        }
    }

    fn of_channel(name: &str) -> Self {
        if name.starts_with("private-") {
            ChannelVisibility::Private
        } else if name.starts_with("presence-") {
            ChannelVisibility::Presence
        } else {
            ChannelVisibility::Public
        }
    }
}

/// `<prefix>session-<session_id>`
pub fn channel_name(visibility: ChannelVisibility, session_id: &str) -> String {
    format!("{}session-{}", visibility.prefix(), session_id)
}

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Подписка на один канал
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    fn bind(&self, event: &str, handler: EventHandler);
    fn trigger(&self, event: &str, payload: Value) -> Result<(), ChannelError>;
    /// Идемпотентно
    fn unsubscribe(&self);
    fn is_subscribed(&self) -> bool;
}

/// Клиент pub/sub сервиса; передаётся явно, без глобального синглтона
#[async_trait]
pub trait PubSub: Send + Sync {
    fn socket_id(&self) -> String;
    async fn subscribe(
        &self,
        channel: &str,
        auth: Option<&str>,
    ) -> Result<Arc<dyn Channel>, ChannelError>;
}

/// ========== IN-MEMORY HUB ==========

enum Op {
    Bind(String, EventHandler),
    Deliver(String, Value),
    Close,
}

struct Subscriber {
    socket_id: String,
    tx: mpsc::UnboundedSender<Op>,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, Vec<Arc<Subscriber>>>>,
    credentials: Option<(String, String)>,
    next_socket: AtomicU64,
}

impl HubInner {
    fn publish(&self, channel: &str, event: &str, payload: &Value) {
        let subscribers = self
            .channels
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default();
        trace!(channel, event, count = subscribers.len(), "hub publish");
        for sub in subscribers {
            // подписчик мог уже уйти; сообщение теряется
            let _ = sub
                .tx
                .send(Op::Deliver(event.to_string(), payload.clone()));
        }
    }

    fn remove(&self, channel: &str, socket_id: &str) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|s| s.socket_id != socket_id);
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
    }
}

/// Pub/sub в памяти процесса: для тестов и локального демо
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// private-/presence- каналы требуют токен, подписанный этим секретом
    pub fn with_credentials(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                credentials: Some((app_key.into(), app_secret.into())),
                ..Default::default()
            }),
        }
    }

    pub fn connect(&self) -> LocalClient {
        let n = self.inner.next_socket.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix: u32 = rand::rng().random_range(0..1_000_000);
        LocalClient {
            hub: self.inner.clone(),
            socket_id: format!("{n}.{suffix}"),
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, |subs| subs.len())
    }
}

pub struct LocalClient {
    hub: Arc<HubInner>,
    socket_id: String,
}

#[async_trait]
impl PubSub for LocalClient {
    fn socket_id(&self) -> String {
        self.socket_id.clone()
    }

    async fn subscribe(
        &self,
        channel: &str,
        auth: Option<&str>,
    ) -> Result<Arc<dyn Channel>, ChannelError> {
        if let Some((key, secret)) = &self.hub.credentials {
            if ChannelVisibility::of_channel(channel) != ChannelVisibility::Public {
                let ok = auth.is_some_and(|token| {
                    verify_channel_auth(key, secret, &self.socket_id, channel, token)
                });
                if !ok {
                    warn!(channel, socket_id = %self.socket_id, "subscription rejected");
                    return Err(ChannelError::Unauthorized(channel.to_string()));
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Arc::new(Subscriber {
            socket_id: self.socket_id.clone(),
            tx: tx.clone(),
        });
        self.hub
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(sub);
        tokio::spawn(dispatch(channel.to_string(), rx));
        debug!(channel, socket_id = %self.socket_id, "subscribed");

        Ok(Arc::new(LocalChannel {
            name: channel.to_string(),
            socket_id: self.socket_id.clone(),
            hub: self.hub.clone(),
            tx,
            subscribed: AtomicBool::new(true),
        }))
    }
}

/// Разбор очереди одной подписки. Bind и доставка идут через одну очередь,
/// поэтому ранние события отдаются обработчику строго по порядку.
async fn dispatch(channel: String, mut rx: mpsc::UnboundedReceiver<Op>) {
    let mut handlers: HashMap<String, EventHandler> = HashMap::new();
    let mut pending: HashMap<String, VecDeque<Value>> = HashMap::new();

    while let Some(op) = rx.recv().await {
        match op {
            Op::Bind(event, handler) => {
                if let Some(queued) = pending.remove(&event) {
                    debug!(%channel, %event, count = queued.len(), "flushing early events");
                    for payload in queued {
                        handler(payload);
                    }
                }
                handlers.insert(event, handler);
            }
            Op::Deliver(event, payload) => match handlers.get(&event) {
                Some(handler) => handler(payload),
                None => {
                    // имена событий сессии всегда буферизуются, прочие ограничены
                    if !pending.contains_key(&event)
                        && !is_session_event(&event)
                        && pending.keys().filter(|k| !is_session_event(k)).count()
                            >= EARLY_FOREIGN_KINDS
                    {
                        trace!(%channel, %event, "dropping early event of unknown kind");
                        continue;
                    }
                    let queue = pending.entry(event).or_default();
                    if queue.len() == EARLY_EVENT_LIMIT {
                        queue.pop_front();
                    }
                    queue.push_back(payload);
                }
            },
            Op::Close => break,
        }
    }
    trace!(%channel, "dispatcher stopped");
}

struct LocalChannel {
    name: String,
    socket_id: String,
    hub: Arc<HubInner>,
    tx: mpsc::UnboundedSender<Op>,
    subscribed: AtomicBool,
}

impl Channel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, event: &str, handler: EventHandler) {
        if !self.is_subscribed() {
            return;
        }
        let _ = self.tx.send(Op::Bind(event.to_string(), handler));
    }

    fn trigger(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if !self.is_subscribed() {
            return Err(ChannelError::Closed(self.name.clone()));
        }
        self.hub.publish(&self.name, event, &payload);
        Ok(())
    }

    fn unsubscribe(&self) {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            self.hub.remove(&self.name, &self.socket_id);
            let _ = self.tx.send(Op::Close);
            debug!(channel = %self.name, socket_id = %self.socket_id, "unsubscribed");
        }
    }

    fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// ========== TYPED MESSAGES ==========

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_identity: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer {
        session_description: SessionDescription,
        sender_identity: String,
    },
    Answer {
        session_description: SessionDescription,
        sender_identity: String,
    },
    IceCandidate {
        candidate: IceCandidate,
        sender_identity: String,
    },
    ChatMessage(ChatMessage),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DescriptionField {
    Plain(SessionDescription),
    Packed(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionPayload {
    session_description: DescriptionField,
    sender_identity: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    candidate: IceCandidate,
    sender_identity: String,
}

impl SignalMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => EVENT_OFFER,
            SignalMessage::Answer { .. } => EVENT_ANSWER,
            SignalMessage::IceCandidate { .. } => EVENT_ICE_CANDIDATE,
            SignalMessage::ChatMessage(_) => EVENT_CHAT_MESSAGE,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            SignalMessage::Offer {
                sender_identity, ..
            }
            | SignalMessage::Answer {
                sender_identity, ..
            }
            | SignalMessage::IceCandidate {
                sender_identity, ..
            } => sender_identity,
            SignalMessage::ChatMessage(msg) => &msg.sender_identity,
        }
    }

    pub fn to_payload(&self, compress: bool) -> Result<Value, ChannelError> {
        let describe = |desc: &SessionDescription| -> Result<DescriptionField, ChannelError> {
            Ok(if compress {
                DescriptionField::Packed(pack_description(desc)?)
            } else {
                DescriptionField::Plain(desc.clone())
            })
        };

        let value = match self {
            SignalMessage::Offer {
                session_description,
                sender_identity,
            }
            | SignalMessage::Answer {
                session_description,
                sender_identity,
            } => serde_json::to_value(DescriptionPayload {
                session_description: describe(session_description)?,
                sender_identity: sender_identity.clone(),
            })?,
            SignalMessage::IceCandidate {
                candidate,
                sender_identity,
            } => serde_json::to_value(CandidatePayload {
                candidate: candidate.clone(),
                sender_identity: sender_identity.clone(),
            })?,
            SignalMessage::ChatMessage(msg) => serde_json::to_value(msg)?,
        };
        Ok(value)
    }

    pub fn from_payload(event: &str, payload: Value) -> Result<Self, ChannelError> {
        let description = |payload: Value| -> Result<(SessionDescription, String), ChannelError> {
            let parsed: DescriptionPayload = serde_json::from_value(payload)?;
            let desc = match parsed.session_description {
                DescriptionField::Plain(desc) => desc,
                DescriptionField::Packed(packed) => unpack_description(&packed)?,
            };
            Ok((desc, parsed.sender_identity))
        };

        match event {
            EVENT_OFFER => {
                let (session_description, sender_identity) = description(payload)?;
                Ok(SignalMessage::Offer {
                    session_description,
                    sender_identity,
                })
            }
            EVENT_ANSWER => {
                let (session_description, sender_identity) = description(payload)?;
                Ok(SignalMessage::Answer {
                    session_description,
                    sender_identity,
                })
            }
            EVENT_ICE_CANDIDATE => {
                let parsed: CandidatePayload = serde_json::from_value(payload)?;
                Ok(SignalMessage::IceCandidate {
                    candidate: parsed.candidate,
                    sender_identity: parsed.sender_identity,
                })
            }
            EVENT_CHAT_MESSAGE => Ok(SignalMessage::ChatMessage(serde_json::from_value(payload)?)),
            other => Err(ChannelError::UnknownEvent(other.to_string())),
        }
    }
}

/// Типизированная обёртка над каналом: кодирует сообщения и отбрасывает
/// собственное эхо.
#[derive(Clone)]
pub struct SignalingChannel {
    channel: Arc<dyn Channel>,
    identity: String,
    compress: bool,
}

impl SignalingChannel {
    pub fn new(channel: Arc<dyn Channel>, identity: impl Into<String>, compress: bool) -> Self {
        Self {
            channel,
            identity: identity.into(),
            compress,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn send(&self, msg: &SignalMessage) -> Result<(), ChannelError> {
        let payload = msg.to_payload(self.compress)?;
        self.channel.trigger(msg.event_name(), payload)
    }

    /// Обработчик вызывается только для сообщений от другой стороны
    pub fn on<F>(&self, event: &'static str, handler: F)
    where
        F: Fn(SignalMessage) + Send + Sync + 'static,
    {
        let me = self.identity.clone();
        let channel = self.channel.name().to_string();
        self.channel.bind(
            event,
            Arc::new(move |payload| match SignalMessage::from_payload(event, payload) {
                Ok(msg) if msg.sender() == me => {
                    trace!(%channel, event, "ignoring own echo");
                }
                Ok(msg) => handler(msg),
                Err(e) => warn!(%channel, event, "dropping malformed payload: {}", e),
            }),
        );
    }

    pub fn unsubscribe(&self) {
        self.channel.unsubscribe();
    }

    pub fn is_subscribed(&self) -> bool {
        self.channel.is_subscribed()
    }
}
