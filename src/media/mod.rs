//! Media Module - Streams, Tracks und Quellen
//!
//! Dieses Modul verwaltet:
//! - MediaStream / MediaTrack Datenmodell
//! - Synthetische Quelle (Tests, Demo)
//! - MJPEG HTTP Quelle (z.B. ESP32-CAM)
//! - Kamera- und Mikrofon-Capture (Feature `device-capture`)

#[cfg(feature = "device-capture")]
mod device;
mod mjpeg;
mod source;
mod stream;

#[cfg(feature = "device-capture")]
pub use device::{DeviceSource, SAMPLE_RATE};
pub use mjpeg::{MjpegFrameParser, MjpegSource};
pub use source::{
    MediaError, MediaSource, SyntheticSource, AUDIO_FRAME_INTERVAL, VIDEO_FRAME_INTERVAL,
};
pub use stream::{MediaFrame, MediaStream, MediaTrack, TrackFeed, TrackKind};
