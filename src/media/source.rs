//! Media-Quellen
//!
//! Eine Quelle liefert beim Start genau einen [`MediaStream`] mit mindestens
//! einem Track, oder einen [`MediaError`].

use super::stream::{MediaFrame, MediaStream, MediaTrack, TrackFeed, TrackKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("Permission to access {0} was denied")]
    PermissionDenied(String),

    #[error("No {0} device found")]
    DeviceNotFound(String),

    #[error("No compatible capture API: {0}")]
    NoCompatibleApi(String),

    #[error("Media source unreachable: {0}")]
    Unreachable(String),

    #[error("Captured source is not supported: {0}")]
    CaptureUnsupported(String),

    #[error("Source produced no frames within {0:?}")]
    NoFrames(Duration),

    #[error("Source yields no tracks")]
    NoTracks,

    #[error("Capture failed: {0}")]
    Capture(String),
}

// ============================================================================
// SOURCE TRAIT
// ============================================================================

/// Liefert den Stream, der in die Loopback-Session eingespeist wird
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Kurzer Name für Logs
    fn name(&self) -> &str;

    async fn acquire(&self) -> Result<MediaStream, MediaError>;
}

// ============================================================================
// SYNTHETIC SOURCE
// ============================================================================

/// Video-Takt (~30 fps)
pub const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Audio-Takt (20ms Frames)
pub const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Erzeugt Tracks mit generierten Payloads
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    video: bool,
    audio: bool,
}

impl SyntheticSource {
    pub fn new(video: bool, audio: bool) -> Self {
        Self { video, audio }
    }

    pub fn video_only() -> Self {
        Self::new(true, false)
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[async_trait]
impl MediaSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn acquire(&self) -> Result<MediaStream, MediaError> {
        if !self.video && !self.audio {
            return Err(MediaError::NoTracks);
        }

        let mut stream = MediaStream::new();

        if self.video {
            let track = MediaTrack::new(TrackKind::Video, "synthetic-video");
            if let Some(feed) = track.feed() {
                tokio::spawn(generate_frames(
                    feed.clone(),
                    TrackKind::Video,
                    VIDEO_FRAME_INTERVAL,
                ));
            }
            stream.add_track(track);
        }

        if self.audio {
            let track = MediaTrack::new(TrackKind::Audio, "synthetic-audio");
            if let Some(feed) = track.feed() {
                tokio::spawn(generate_frames(
                    feed.clone(),
                    TrackKind::Audio,
                    AUDIO_FRAME_INTERVAL,
                ));
            }
            stream.add_track(track);
        }

        tracing::info!(
            "Synthetic stream {} with {} track(s)",
            stream.id,
            stream.tracks().len()
        );

        Ok(stream)
    }
}

/// Schreibt in festem Takt Frames in den Feed bis dieser gestoppt wird
async fn generate_frames(feed: TrackFeed, kind: TrackKind, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut stop = feed.stop_signal();
    let mut sequence: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = MediaFrame {
                    data: synthetic_payload(kind, sequence),
                    duration: interval,
                };
                if !feed.push(frame) {
                    break;
                }
                sequence = sequence.wrapping_add(1);
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Synthetic {} generator stopped after {} frames", kind, sequence);
}

/// Payload mit Sequenznummer, Größe je nach Track-Art
fn synthetic_payload(kind: TrackKind, sequence: u32) -> Bytes {
    let len = match kind {
        TrackKind::Video => 1200,
        TrackKind::Audio => 160,
    };
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&sequence.to_be_bytes());
    data.resize(len, (sequence & 0xff) as u8);
    Bytes::from(data)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_source_tracks() {
        let stream = SyntheticSource::default().acquire().await.unwrap();

        assert_eq!(stream.video_tracks().count(), 1);
        assert_eq!(stream.audio_tracks().count(), 1);
        stream.stop();
    }

    #[tokio::test]
    async fn test_synthetic_source_without_tracks_fails() {
        let result = SyntheticSource::new(false, false).acquire().await;
        assert!(matches!(result, Err(MediaError::NoTracks)));
    }

    #[tokio::test]
    async fn test_synthetic_source_produces_frames() {
        let stream = SyntheticSource::video_only().acquire().await.unwrap();
        let feed = stream.tracks()[0].feed().unwrap().clone();
        let mut rx = feed.subscribe();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no frame within timeout")
            .unwrap();
        assert_eq!(frame.data.len(), 1200);

        stream.stop();
    }

    #[test]
    fn test_synthetic_payload_carries_sequence() {
        let payload = synthetic_payload(TrackKind::Audio, 7);
        assert_eq!(&payload[..4], &7u32.to_be_bytes());
        assert_eq!(payload.len(), 160);
    }
}
