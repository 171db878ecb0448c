//! Geräte-Capture - Kamera über nokhwa, Mikrofon über cpal
//!
//! Weder die nokhwa Kamera noch der cpal Stream sind Send. Beide leben
//! deshalb in eigenen Threads, die Frames in den jeweiligen Track-Feed
//! schieben, bis der Track gestoppt wird.
//!
//! Die Payloads sind roh: Kamera-Frames im Quellformat der Kamera (MJPEG
//! oder YUYV), Audio als f32 Little-Endian PCM (Mono). Sie werden nicht
//! encodiert, bevor sie auf die VP8/Opus Tracks geschrieben werden.

use super::source::{MediaError, MediaSource, AUDIO_FRAME_INTERVAL, VIDEO_FRAME_INTERVAL};
use super::stream::{MediaFrame, MediaStream, MediaTrack, TrackFeed, TrackKind};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Bevorzugte Sample Rate (48kHz ist der Standard für WebRTC Audio)
pub const SAMPLE_RATE: u32 = 48000;

/// Frames im Ring-Buffer, bevor Samples verworfen werden
const RING_BUFFER_FRAMES: usize = 10;

/// Samples pro 20ms Frame bei gegebener Rate (48kHz → 960)
fn frame_size(sample_rate: u32) -> usize {
    (sample_rate as u64 * AUDIO_FRAME_INTERVAL.as_millis() as u64 / 1000) as usize
}

/// Frame-Dauer bei gegebener Kamera-Framerate
fn video_frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        VIDEO_FRAME_INTERVAL
    } else {
        Duration::from_secs(1) / fps
    }
}

// ============================================================================
// DEVICE SOURCE
// ============================================================================

/// Standard-Kamera und Standard-Mikrofon
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceSource;

impl DeviceSource {
    pub fn new() -> Self {
        Self
    }
}

type Ready = oneshot::Sender<Result<String, MediaError>>;

/// Startet einen Capture-Thread und wartet, bis das Gerät offen ist
async fn spawn_capture<F>(name: &str, track: &MediaTrack, run: F) -> Result<String, MediaError>
where
    F: FnOnce(TrackFeed, Ready) + Send + 'static,
{
    let feed = track
        .feed()
        .cloned()
        .ok_or_else(|| MediaError::Capture("track without feed".to_string()))?;

    let (ready_tx, ready_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run(feed, ready_tx))
        .map_err(|e| MediaError::Capture(e.to_string()))?;

    ready_rx
        .await
        .map_err(|_| MediaError::Capture(format!("{} thread exited", name)))?
}

#[async_trait]
impl MediaSource for DeviceSource {
    fn name(&self) -> &str {
        "device"
    }

    async fn acquire(&self) -> Result<MediaStream, MediaError> {
        let video = MediaTrack::new(TrackKind::Video, "camera");
        let camera = spawn_capture("loopback-camera", &video, camera_thread).await?;
        tracing::info!("Capturing video from '{}'", camera);

        let audio = MediaTrack::new(TrackKind::Audio, "microphone");
        let microphone = match spawn_capture("loopback-microphone", &audio, audio_thread).await {
            Ok(label) => label,
            Err(e) => {
                video.stop();
                return Err(e);
            }
        };
        tracing::info!("Capturing audio from '{}'", microphone);

        let mut stream = MediaStream::new();
        stream.add_track(video);
        stream.add_track(audio);
        Ok(stream)
    }
}

// ============================================================================
// CAMERA
// ============================================================================

fn camera_error(e: NokhwaError) -> MediaError {
    let message = e.to_string();
    if is_permission_error(&message) {
        return MediaError::PermissionDenied(format!("camera: {}", message));
    }
    match e {
        NokhwaError::OpenDeviceError(_, _) => MediaError::DeviceNotFound("camera".to_string()),
        NokhwaError::UnsupportedOperationError(_) => MediaError::NoCompatibleApi(message),
        _ => MediaError::Capture(message),
    }
}

fn is_permission_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["permission", "denied", "not authorized", "not permitted"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn open_camera() -> Result<(Camera, String), MediaError> {
    let cameras = nokhwa::query(ApiBackend::Auto).map_err(camera_error)?;
    let info = cameras
        .first()
        .ok_or_else(|| MediaError::DeviceNotFound("camera".to_string()))?;

    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = Camera::new(info.index().clone(), format).map_err(camera_error)?;
    camera.open_stream().map_err(camera_error)?;

    tracing::info!(
        "Starting video capture on '{}': {:?} @ {} fps",
        info.human_name(),
        camera.resolution(),
        camera.frame_rate()
    );

    Ok((camera, info.human_name()))
}

fn camera_thread(feed: TrackFeed, ready: Ready) {
    let mut camera = match open_camera() {
        Ok((camera, label)) => {
            let _ = ready.send(Ok(label));
            camera
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let duration = video_frame_interval(camera.frame_rate());

    while !feed.is_stopped() {
        match camera.frame() {
            Ok(buffer) => {
                feed.push(MediaFrame {
                    data: Bytes::copy_from_slice(buffer.buffer()),
                    duration,
                });
            }
            Err(e) => {
                tracing::error!("Camera capture error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Failed to stop camera stream: {}", e);
    }
    feed.stop();
    tracing::info!("Video capture stopped");
}

// ============================================================================
// MICROPHONE
// ============================================================================

struct Input {
    stream: cpal::Stream,
    label: String,
    buffer: Arc<Mutex<HeapRb<f32>>>,
    frame_size: usize,
}

fn audio_thread(feed: TrackFeed, ready: Ready) {
    let input = match open_input() {
        Ok(input) => {
            let _ = ready.send(Ok(input.label.clone()));
            input
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !feed.is_stopped() {
        std::thread::sleep(AUDIO_FRAME_INTERVAL);

        while let Some(frame) = read_frame(&input.buffer, input.frame_size) {
            let data: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
            feed.push(MediaFrame {
                data: Bytes::from(data),
                duration: AUDIO_FRAME_INTERVAL,
            });
        }
    }

    drop(input.stream);
    tracing::info!("Audio capture stopped");
}

/// Öffnet das Standard-Eingabegerät und startet den Stream
fn open_input() -> Result<Input, MediaError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::DeviceNotFound("microphone".to_string()))?;

    let label = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = find_best_input_config(&device)?;
    let frame_size = frame_size(config.sample_rate.0);

    tracing::info!(
        "Starting audio capture on '{}': {} Hz, {} channels, {} samples per frame",
        label,
        config.sample_rate.0,
        config.channels,
        frame_size
    );

    let buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(frame_size * RING_BUFFER_FRAMES)));
    let producer = Arc::clone(&buffer);
    let channels = config.channels as usize;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut buffer = producer.lock();
                // Nur der erste Kanal wird übernommen (Mono)
                for sample in data.iter().step_by(channels.max(1)) {
                    let _ = buffer.try_push(*sample);
                }
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => {
                MediaError::PermissionDenied("microphone".to_string())
            }
            other => MediaError::Capture(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| MediaError::Capture(e.to_string()))?;

    Ok(Input {
        stream,
        label,
        buffer,
        frame_size,
    })
}

/// Liest einen Frame aus dem Ring-Buffer
fn read_frame(buffer: &Mutex<HeapRb<f32>>, frame_size: usize) -> Option<Vec<f32>> {
    let mut buffer = buffer.lock();
    if frame_size == 0 || buffer.occupied_len() < frame_size {
        return None;
    }
    let mut frame = Vec::with_capacity(frame_size);
    for _ in 0..frame_size {
        if let Some(sample) = buffer.try_pop() {
            frame.push(sample);
        }
    }
    Some(frame)
}

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| MediaError::NoCompatibleApi(e.to_string()))?;

    select_best_config(configs.collect())
}

/// Priorität: 48kHz > höchste Rate, F32 ist Pflicht für den Callback
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, MediaError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);

    for config in &configs {
        if config.sample_format() == SampleFormat::F32
            && config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
        {
            return Ok(config.with_sample_rate(target_rate).into());
        }
    }

    configs
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
        .map(|c| c.with_max_sample_rate().into())
        .ok_or_else(|| MediaError::NoCompatibleApi("no f32 input configuration".to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize};

    fn range(format: SampleFormat, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_prefers_48k_f32() {
        let config = select_best_config(vec![
            range(SampleFormat::I16, 8000, 48000),
            range(SampleFormat::F32, 8000, 96000),
        ])
        .unwrap();

        assert_eq!(config.sample_rate, SampleRate(48000));
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn test_falls_back_to_max_rate() {
        let config = select_best_config(vec![range(SampleFormat::F32, 8000, 44100)]).unwrap();
        assert_eq!(config.sample_rate, SampleRate(44100));
    }

    #[test]
    fn test_requires_f32() {
        let err = select_best_config(vec![range(SampleFormat::I16, 8000, 48000)]).unwrap_err();
        assert!(matches!(err, MediaError::NoCompatibleApi(_)));
    }

    #[test]
    fn test_frame_size_follows_sample_rate() {
        assert_eq!(frame_size(48000), 960);
        assert_eq!(frame_size(44100), 882);
        assert_eq!(frame_size(16000), 320);
    }

    #[test]
    fn test_read_frame_uses_given_size() {
        let buffer = Mutex::new(HeapRb::<f32>::new(2000));
        for i in 0..1000 {
            let _ = buffer.lock().try_push(i as f32);
        }

        assert_eq!(read_frame(&buffer, 882).map(|f| f.len()), Some(882));
        assert!(read_frame(&buffer, 882).is_none());
    }

    #[test]
    fn test_video_frame_interval() {
        assert_eq!(video_frame_interval(30), Duration::from_secs(1) / 30);
        assert_eq!(video_frame_interval(0), VIDEO_FRAME_INTERVAL);
    }

    #[test]
    fn test_permission_messages() {
        assert!(is_permission_error("Permission denied (os error 13)"));
        assert!(is_permission_error("Camera access not authorized"));
        assert!(!is_permission_error("No such device"));
    }
}
