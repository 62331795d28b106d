use crate::error::ChannelError;
use crate::peer::types::SessionDescription;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Ограничение на распакованный размер, защита от zip-bomb
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024; // 256 KiB

/// SessionDescription → base64(gzip(json))
pub fn pack_description(desc: &SessionDescription) -> Result<String, ChannelError> {
    // 1. JSON -> bytes
    let json = serde_json::to_vec(desc)?;

    // 2. GZIP compress
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)
        .map_err(|e| ChannelError::Codec(e.to_string()))?;
    let compressed = gz.finish().map_err(|e| ChannelError::Codec(e.to_string()))?;

    // 3. base64
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn unpack_description(packed: &str) -> Result<SessionDescription, ChannelError> {
    // 1. base64 -> bytes
    let compressed = general_purpose::STANDARD
        .decode(packed)
        .map_err(|e| ChannelError::Codec(e.to_string()))?;

    // 2. gunzip с ограничением размера
    let gz = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    let mut limited_reader = gz.take(MAX_DECOMPRESSED_SIZE + 1);
    limited_reader
        .read_to_end(&mut json)
        .map_err(|e| ChannelError::Codec(e.to_string()))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(ChannelError::Codec(format!(
            "description exceeds {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }

    // 3. JSON -> struct
    Ok(serde_json::from_slice(&json)?)
}
