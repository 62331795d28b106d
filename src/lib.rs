pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod notes;
pub mod peer;
pub mod session;
pub mod shell;
pub mod signaling;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use crate::commands::{leave_session_page, open_session_page, PageContext};
use crate::config::SessionConfig;
use crate::error::RunError;
use crate::peer::{CallDeps, RtcTransportFactory, SyntheticDevices};
use crate::session::{InMemorySessionStore, SessionRecord};
use crate::shell::BroadcastShell;
use crate::signaling::LocalHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

const DEMO_SESSION: &str = "demo";
const DEMO_MENTOR: &str = "mentor@example.com";
const DEMO_MENTEE: &str = "mentee@example.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Локальный прогон: ментор и менти в одном процессе, настоящие webrtc-rs
/// peer connection, сигнализация через in-memory hub.
pub async fn run() -> Result<(), RunError> {
    let config = SessionConfig::from_env();
    let store = Arc::new(InMemorySessionStore::new());
    store.insert(SessionRecord {
        session_id: DEMO_SESSION.into(),
        mentor_identity: DEMO_MENTOR.into(),
        mentee_identity: DEMO_MENTEE.into(),
        notes: String::new(),
    });
    let hub = LocalHub::with_credentials(config.app_key.clone(), config.app_secret.clone());

    let page_context = |shell: Arc<BroadcastShell>| PageContext {
        config: config.clone(),
        sessions: store.clone(),
        notes: store.clone(),
        deps: CallDeps {
            pubsub: Arc::new(hub.connect()),
            devices: Arc::new(SyntheticDevices),
            transports: Arc::new(RtcTransportFactory),
            shell,
        },
    };

    let mentor_ctx = page_context(Arc::new(BroadcastShell::default()));
    let mentee_ctx = page_context(Arc::new(BroadcastShell::default()));

    let mentor = open_session_page(&mentor_ctx, DEMO_SESSION, Some(DEMO_MENTOR)).await?;
    let mentee = open_session_page(&mentee_ctx, DEMO_SESSION, Some(DEMO_MENTEE)).await?;

    let both = async {
        mentor.call.wait_connected().await && mentee.call.wait_connected().await
    };
    match timeout(CONNECT_TIMEOUT, both).await {
        Ok(true) => info!("both sides connected"),
        _ => return Err(RunError::Timeout("peer connection")),
    }

    mentee.chat.send("Hi! Ready when you are.")?;
    mentor.chat.send("Let's start with last week's goals.")?;
    mentor.notes.edit("1. Review goals\n2. Plan next sprint")?;
    mentor.notes.flush().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!(
        mentor_chat = mentor.chat.len(),
        mentee_chat = mentee.chat.len(),
        notes = ?store.get(DEMO_SESSION).map(|r| r.notes),
        "session state before hang-up"
    );

    leave_session_page(mentor).await?;
    leave_session_page(mentee).await?;
    info!("demo finished");
    Ok(())
}
