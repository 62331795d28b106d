pub mod media_api;
pub mod session_api;
pub mod util_api;

pub use media_api::{controls, is_connected, toggle_mute, toggle_video, MediaControls};
pub use session_api::{
    leave_session_page, open_session_page, PageContext, PageError, SessionPage, SIGN_IN_PATH,
};
pub use util_api::{check_ice_server_availability, describe_candidates, validate_user_ice_servers};
