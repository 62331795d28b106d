use crate::peer::state::ConnectionState;
use crate::peer::types::RemoteStream;
use crate::signaling::ChatMessage;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// События для оболочки страницы (рендеринг)
#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    StateChanged(ConnectionState),
    RemoteStreamUpdated(RemoteStream),
    CaptureFailed(String),
    NegotiationError(String),
    /// Согласование слишком долго висит в `Negotiating`
    NegotiationStalled,
    ConnectionProblem,
    ConnectionRecovered,
    LocalMediaToggled { muted: bool, video_off: bool },
    ChatAppended(ChatMessage),
    NotesSaved,
    NotesSaveFailed(String),
    /// Звонок завершён локально, оболочка уходит со страницы
    CallEnded,
}

impl ShellEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ShellEvent::StateChanged(ConnectionState::Connected) => "session-connected",
            ShellEvent::StateChanged(ConnectionState::Ended) => "session-disconnected",
            ShellEvent::StateChanged(_) => "session-connecting",
            ShellEvent::RemoteStreamUpdated(_) => "session-remote-stream",
            ShellEvent::CaptureFailed(_) => "session-capture-failed",
            ShellEvent::NegotiationError(_) => "session-negotiation-error",
            ShellEvent::NegotiationStalled => "session-negotiation-stalled",
            ShellEvent::ConnectionProblem => "session-connection-problem",
            ShellEvent::ConnectionRecovered => "session-connection-recovered",
            ShellEvent::LocalMediaToggled { .. } => "session-local-media",
            ShellEvent::ChatAppended(_) => "session-chat",
            ShellEvent::NotesSaved => "session-notes-saved",
            ShellEvent::NotesSaveFailed(_) => "session-notes-failed",
            ShellEvent::CallEnded => "session-call-ended",
        }
    }
}

pub trait SessionShell: Send + Sync {
    fn emit(&self, event: ShellEvent);
}

/// Оболочка поверх broadcast канала; подписчиков может не быть
#[derive(Debug, Clone)]
pub struct BroadcastShell {
    tx: broadcast::Sender<ShellEvent>,
}

impl BroadcastShell {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastShell {
    fn default() -> Self {
        Self::new(256)
    }
}

impl SessionShell for BroadcastShell {
    fn emit(&self, event: ShellEvent) {
        debug!("emit {}", event.name());
        if self.tx.send(event).is_err() {
            trace!("no shell listeners");
        }
    }
}
