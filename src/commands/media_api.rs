use super::session_api::SessionPage;
use crate::peer::state::ConnectionState;
use tracing::info;

/// Состояние локальных кнопок страницы
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaControls {
    pub muted: bool,
    pub video_off: bool,
}

/// микрофон вкл/выкл
pub fn toggle_mute(page: &SessionPage) -> MediaControls {
    let muted = page.call.toggle_mute();
    info!(session_id = %page.authorized.session_id, muted, "microphone toggled");
    controls(page)
}

/// камера вкл/выкл
pub fn toggle_video(page: &SessionPage) -> MediaControls {
    let video_off = page.call.toggle_video();
    info!(session_id = %page.authorized.session_id, video_off, "camera toggled");
    controls(page)
}

pub fn controls(page: &SessionPage) -> MediaControls {
    MediaControls {
        muted: page.call.is_muted(),
        video_off: page.call.is_video_off(),
    }
}

pub fn is_connected(page: &SessionPage) -> bool {
    page.call.state() == ConnectionState::Connected
}
