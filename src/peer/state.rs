use crate::session::Role;
use std::fmt;
use std::time::Duration;

/// ========== NEGOTIATION STATE ==========

/// Состояние согласования одного звонка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Negotiating,
    Connected,
    /// Звонок завершён (teardown), дальше ничего не происходит
    Ended,
}

/// Что может сдвинуть состояние
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Захват получен, транспорт создан, треки добавлены
    Started,
    /// Применён answer от другой стороны
    AnswerApplied,
    /// Пришёл первый удалённый трек
    RemoteTrackArrived,
    TornDown,
}

impl ConnectionState {
    /// Единственная функция переходов.
    ///
    /// Ментор переходит в `Connected` только по answer, менти только по
    /// первому удалённому треку (answer менти никогда не получает).
    pub fn next(self, role: Role, event: NegotiationEvent) -> ConnectionState {
        use ConnectionState::*;
        use NegotiationEvent::*;

        match (self, event) {
            (_, TornDown) => Ended,
            (Ended, _) => Ended,
            (Idle, Started) => Negotiating,
            (Negotiating, AnswerApplied) if role == Role::Mentor => Connected,
            (Negotiating, RemoteTrackArrived) if role == Role::Mentee => Connected,
            (state, _) => state,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// ========== CONSTANTS ==========

/// Сколько ждать кандидатов при проверке ICE сервера
pub const ICE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
