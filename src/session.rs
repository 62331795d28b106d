use crate::error::{AuthError, NotesError};
use crate::signaling::{channel_name, ChannelVisibility};
use async_trait::async_trait;
use parking_lot::Mutex;
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Запись о сессии наставничества (хранится снаружи)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub mentor_identity: String,
    pub mentee_identity: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    Mentee,
}

/// Результат успешной проверки доступа
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub session_id: String,
    pub identity: String,
    pub role: Role,
    pub notes: String,
}

/// Тег операции частичного обновления
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotesAction {
    UpdateNotes,
}

/// Поиск сессии по id + совпадение identity с ментором ИЛИ менти
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_for_participant(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<Option<SessionRecord>, AuthError>;
}

/// Сохранение заметок; простая перезапись
#[async_trait]
pub trait NotesStore: Send + Sync {
    async fn update_notes(
        &self,
        session_id: &str,
        action: NotesAction,
        notes: &str,
    ) -> Result<(), NotesError>;
}

/// Проверка доступа к странице сессии. Одноразовая, без повторов.
pub async fn authorize(
    store: &dyn SessionStore,
    session_id: &str,
    caller: Option<&str>,
) -> Result<Authorized, AuthError> {
    let identity = caller.ok_or(AuthError::Unauthenticated)?;

    let record = store
        .find_for_participant(session_id, identity)
        .await?
        .ok_or_else(|| AuthError::AccessDenied {
            session_id: session_id.to_string(),
        })?;

    let role = if record.mentor_identity == identity {
        Role::Mentor
    } else if record.mentee_identity == identity {
        Role::Mentee
    } else {
        // хранилище вернуло чужую запись
        return Err(AuthError::AccessDenied {
            session_id: session_id.to_string(),
        });
    };

    info!(session_id, ?role, "caller authorized for session");
    Ok(Authorized {
        session_id: record.session_id,
        identity: identity.to_string(),
        role,
        notes: record.notes,
    })
}

/// Токен подписки на private/presence канал: `<app_key>:<hex(hmac)>`
pub fn sign_channel(app_key: &str, app_secret: &str, socket_id: &str, channel: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, app_secret.as_bytes());
    let tag = hmac::sign(&key, format!("{socket_id}:{channel}").as_bytes());
    format!("{}:{}", app_key, hex::encode(tag.as_ref()))
}

/// Проверка токена подписки
pub fn verify_channel_auth(
    app_key: &str,
    app_secret: &str,
    socket_id: &str,
    channel: &str,
    auth: &str,
) -> bool {
    let Some((key_part, sig_hex)) = auth.split_once(':') else {
        return false;
    };
    if key_part != app_key {
        return false;
    }
    let Ok(sig) = hex::decode(sig_hex) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, app_secret.as_bytes());
    hmac::verify(&key, format!("{socket_id}:{channel}").as_bytes(), &sig).is_ok()
}

/// Подписать подписку на канал, только если это канал сессии участника
pub fn authorize_channel(
    authorized: &Authorized,
    visibility: ChannelVisibility,
    app_key: &str,
    app_secret: &str,
    socket_id: &str,
    channel: &str,
) -> Result<String, AuthError> {
    if channel != channel_name(visibility, &authorized.session_id) {
        return Err(AuthError::ForeignChannel(channel.to_string()));
    }
    debug!(socket_id, channel, "signing channel subscription");
    Ok(sign_channel(app_key, app_secret, socket_id, channel))
}

/// Хранилище сессий в памяти (демо и тесты)
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: Mutex<HashMap<String, SessionRecord>>,
    writes: Mutex<Vec<(String, NotesAction, String)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SessionRecord) {
        self.records.lock().insert(record.session_id.clone(), record);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.lock().get(session_id).cloned()
    }

    /// Все вызовы update_notes в порядке поступления
    pub fn note_writes(&self) -> Vec<(String, NotesAction, String)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_for_participant(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<Option<SessionRecord>, AuthError> {
        let records = self.records.lock();
        Ok(records
            .get(session_id)
            .filter(|r| r.mentor_identity == identity || r.mentee_identity == identity)
            .cloned())
    }
}

#[async_trait]
impl NotesStore for InMemorySessionStore {
    async fn update_notes(
        &self,
        session_id: &str,
        action: NotesAction,
        notes: &str,
    ) -> Result<(), NotesError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| NotesError::Store(format!("session {session_id} not found")))?;
        match action {
            NotesAction::UpdateNotes => record.notes = notes.to_string(),
        }
        self.writes
            .lock()
            .push((session_id.to_string(), action, notes.to_string()));
        Ok(())
    }
}
