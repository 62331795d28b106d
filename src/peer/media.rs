use crate::error::MediaError;
use crate::peer::types::TrackKind;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Кадр тишины Opus (20 мс)
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const AUDIO_FRAME: Duration = Duration::from_millis(20);
/// Заголовок ключевого кадра VP8 16x16 без картинки
const VP8_IDLE_FRAME: [u8; 10] = [0x50, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00];
const VIDEO_FRAME: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct TrackFlags {
    enabled: AtomicBool,
    live: AtomicBool,
}

/// Локальный трек захвата. Клоны делят одни и те же флаги.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    flags: Arc<TrackFlags>,
    source: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: format!("{}-{}", kind_label(kind), random_id()),
            kind,
            flags: Arc::new(TrackFlags {
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
            source: None,
        }
    }

    pub fn with_source(kind: TrackKind, source: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            source: Some(source),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn source(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.source.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.flags.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.flags.live.load(Ordering::SeqCst)
    }

    /// Останавливает захват; обратно не включается
    pub fn stop(&self) {
        if self.flags.live.swap(false, Ordering::SeqCst) {
            debug!(track = %self.id, "local track stopped");
        }
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

fn kind_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Включает/выключает все треки данного типа
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn live_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }
}

/// Захват камеры/микрофона
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, audio: bool, video: bool) -> Result<LocalStream, MediaError>;
}

/// Синтетический захват для локального демо: Opus тишина и пустые VP8 кадры
#[derive(Debug, Default, Clone)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(&self, audio: bool, video: bool) -> Result<LocalStream, MediaError> {
        if !audio && !video {
            return Err(MediaError::Capture("no media kinds requested".into()));
        }
        let stream_id = format!("local-{}", random_id());
        let mut tracks = Vec::new();

        if audio {
            let source = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            ));
            let track = LocalTrack::with_source(TrackKind::Audio, source.clone());
            tokio::spawn(pump_frames(track.clone(), source, &OPUS_SILENCE, AUDIO_FRAME));
            tracks.push(track);
        }
        if video {
            let source = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id,
            ));
            let track = LocalTrack::with_source(TrackKind::Video, source.clone());
            tokio::spawn(pump_frames(track.clone(), source, &VP8_IDLE_FRAME, VIDEO_FRAME));
            tracks.push(track);
        }
        Ok(LocalStream::new(tracks))
    }
}

/// Пишет кадры, пока трек жив. Выключенный трек продолжает слать тишину
/// или заглушку кадра: выключение меняет содержимое, а не наличие RTP.
async fn pump_frames(
    track: LocalTrack,
    source: Arc<TrackLocalStaticSample>,
    frame: &'static [u8],
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    while track.is_live() {
        ticker.tick().await;
        let sample = Sample {
            data: Bytes::from_static(frame),
            duration: every,
            ..Default::default()
        };
        if let Err(e) = source.write_sample(&sample).await {
            trace!(track = %track.id(), "sample write failed: {}", e);
        }
    }
    debug!(track = %track.id(), "frame pump stopped");
}
