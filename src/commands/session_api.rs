use crate::chat::ChatWidget;
use crate::config::SessionConfig;
use crate::error::{AuthError, MediaError, NotesError};
use crate::notes::NotesWidget;
use crate::peer::coordinator::{start_call, CallDeps, CallHandle, CallParams};
use crate::session::{authorize, authorize_channel, Authorized, NotesStore, SessionStore};
use crate::signaling::{channel_name, ChannelVisibility};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const SIGN_IN_PATH: &str = "/sign-in";

/// Почему страницу сессии открыть нельзя
#[derive(Debug, Error)]
pub enum PageError {
    #[error("sign in required, redirecting to {0}")]
    Redirect(String),
    #[error("access to session {0} denied")]
    AccessDenied(String),
    #[error(transparent)]
    Auth(AuthError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl From<AuthError> for PageError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => PageError::Redirect(SIGN_IN_PATH.to_string()),
            AuthError::AccessDenied { session_id } => PageError::AccessDenied(session_id),
            other => PageError::Auth(other),
        }
    }
}

/// Всё, что странице нужно снаружи
#[derive(Clone)]
pub struct PageContext {
    pub config: SessionConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub notes: Arc<dyn NotesStore>,
    pub deps: CallDeps,
}

/// Открытая страница сессии: звонок, чат и заметки
pub struct SessionPage {
    pub authorized: Authorized,
    pub call: CallHandle,
    pub chat: ChatWidget,
    pub notes: NotesWidget,
}

/// Страница сессии: авторизация → подпись канала → звонок → виджеты
pub async fn open_session_page(
    ctx: &PageContext,
    session_id: &str,
    caller: Option<&str>,
) -> Result<SessionPage, PageError> {
    let authorized = authorize(ctx.sessions.as_ref(), session_id, caller).await?;

    let visibility = ctx.config.channel_visibility;
    let channel_auth = match visibility {
        ChannelVisibility::Public => None,
        ChannelVisibility::Private | ChannelVisibility::Presence => Some(authorize_channel(
            &authorized,
            visibility,
            &ctx.config.app_key,
            &ctx.config.app_secret,
            &ctx.deps.pubsub.socket_id(),
            &channel_name(visibility, &authorized.session_id),
        )?),
    };

    let call = start_call(
        &ctx.config,
        CallParams {
            session_id: authorized.session_id.clone(),
            identity: authorized.identity.clone(),
            role: authorized.role,
            channel_auth,
        },
        ctx.deps.clone(),
    )
    .await?;

    let chat = ChatWidget::attach(call.signaling(), ctx.deps.shell.clone());
    let notes = NotesWidget::open(
        authorized.session_id.clone(),
        authorized.notes.clone(),
        ctx.notes.clone(),
        ctx.deps.shell.clone(),
        ctx.config.notes_debounce,
    );

    info!(
        session_id = %authorized.session_id,
        role = ?authorized.role,
        "session page opened"
    );
    Ok(SessionPage {
        authorized,
        call,
        chat,
        notes,
    })
}

/// Уход со страницы: конец звонка и сохранение заметок
pub async fn leave_session_page(page: SessionPage) -> Result<(), NotesError> {
    let SessionPage {
        authorized,
        call,
        notes,
        ..
    } = page;
    if let Err(e) = call.end_call().await {
        warn!(session_id = %authorized.session_id, "end_call: {}", e);
    }
    notes.close().await
}
