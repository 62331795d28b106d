use crate::logger::analyze_candidates;
use crate::peer::connection::validate_ice_servers;
use crate::peer::ice;
use crate::peer::types::{IceCandidate, IceServerConfig};
use tracing::{info, warn};

/// Проверка пользовательских STUN/TURN серверов перед сохранением
pub fn validate_user_ice_servers(servers: &[IceServerConfig]) -> Result<(), String> {
    validate_ice_servers(servers).inspect_err(|e| warn!("Invalid ICE server list: {}", e))
}

/// Пинг ICE сервера
pub async fn check_ice_server_availability(server: IceServerConfig) -> bool {
    if let Err(e) = validate_ice_servers(std::slice::from_ref(&server)) {
        warn!("Skipping probe of {}: {}", server.id, e);
        return false;
    }
    ice::check_ice_server_availability(server).await
}

/// Сводка по типам кандидатов для диагностики
pub fn describe_candidates(candidates: &[IceCandidate]) -> String {
    let (host, srflx, relay) = analyze_candidates(candidates);
    let summary = format!("host={host} srflx={srflx} relay={relay}");
    info!("Candidate summary: {}", summary);
    summary
}
