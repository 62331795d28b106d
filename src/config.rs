// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::peer::types::IceServerConfig;
use crate::signaling::ChannelVisibility;
use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
    pub const VERBOSE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
    pub const VERBOSE_LOGGING: bool = false;
}

/// Публичные STUN серверы по умолчанию (только для поиска путей, медиа не ретранслируют)
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<IceServerConfig>> = Lazy::new(|| {
    vec![
        IceServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        IceServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

pub const DEFAULT_NOTES_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OFFER_RESEND_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_OFFER_RESEND_LIMIT: u32 = 10;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub channel_visibility: ChannelVisibility,
    pub app_key: String,
    pub app_secret: String,
    /// Паковать offer/answer в base64(gzip(json))
    pub compress_descriptions: bool,
    pub notes_debounce: Duration,
    /// `None` отключает сторожевой таймер согласования
    pub negotiation_timeout: Option<Duration>,
    /// Ментор повторяет offer, пока не придёт answer: менти мог подписаться позже
    pub offer_resend_interval: Duration,
    pub offer_resend_limit: u32,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let channel_visibility = env::var("MENTORCALL_CHANNEL_VISIBILITY")
            .ok()
            .and_then(|val| ChannelVisibility::parse(&val))
            .unwrap_or(defaults.channel_visibility);
        let compress_descriptions = env::var("MENTORCALL_COMPRESS_SDP")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.compress_descriptions);
        let notes_debounce = env::var("MENTORCALL_NOTES_DEBOUNCE_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.notes_debounce);
        // 0 = без таймера
        let negotiation_timeout = match env::var("MENTORCALL_NEGOTIATION_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.negotiation_timeout,
        };
        let ice_servers = env::var("MENTORCALL_STUN_URLS")
            .ok()
            .map(|urls| {
                urls.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .enumerate()
                    .map(|(idx, url)| IceServerConfig {
                        id: format!("env-{idx}"),
                        r#type: "stun".into(),
                        url: url.to_string(),
                        username: None,
                        credential: None,
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|servers| !servers.is_empty())
            .unwrap_or(defaults.ice_servers);

        let offer_resend_limit = env::var("MENTORCALL_OFFER_RESEND_LIMIT")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(defaults.offer_resend_limit);

        Self {
            ice_servers,
            channel_visibility,
            app_key: env::var("MENTORCALL_APP_KEY").unwrap_or(defaults.app_key),
            app_secret: env::var("MENTORCALL_APP_SECRET").unwrap_or(defaults.app_secret),
            compress_descriptions,
            notes_debounce,
            negotiation_timeout,
            offer_resend_interval: defaults.offer_resend_interval,
            offer_resend_limit,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            channel_visibility: ChannelVisibility::Private,
            app_key: "mentorcall-local".to_string(),
            app_secret: "mentorcall-local-secret".to_string(),
            compress_descriptions: true,
            notes_debounce: DEFAULT_NOTES_DEBOUNCE,
            negotiation_timeout: Some(DEFAULT_NEGOTIATION_TIMEOUT),
            offer_resend_interval: DEFAULT_OFFER_RESEND_INTERVAL,
            offer_resend_limit: DEFAULT_OFFER_RESEND_LIMIT,
        }
    }
}
