use thiserror::Error;

/// Отказ в доступе к странице сессии
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("caller is not signed in")]
    Unauthenticated,
    /// Нет такой сессии, либо вызывающий не ментор и не менти
    #[error("access to session {session_id} denied")]
    AccessDenied { session_id: String },
    #[error("channel {0} is not the channel of this session")]
    ForeignChannel(String),
    #[error("session store error: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} is closed")]
    Closed(String),
    #[error("subscription to {0} was not authorized")]
    Unauthorized(String),
    #[error("unknown event {0}")]
    UnknownEvent(String),
    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("description codec error: {0}")]
    Codec(String),
    #[error("pub/sub transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("local capture failed: {0}")]
    Capture(String),
    #[error("peer transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<webrtc::Error> for MediaError {
    fn from(err: webrtc::Error) -> Self {
        MediaError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NotesError {
    #[error("notes store error: {0}")]
    Store(String),
    #[error("notes widget is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat message is empty")]
    Empty,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Ошибки локального демо-прогона
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Page(#[from] crate::commands::PageError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Notes(#[from] NotesError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}
