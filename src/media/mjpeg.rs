//! MJPEG Quelle (z.B. ESP32-CAM)
//!
//! Startet die Wiedergabe eines MJPEG HTTP-Streams und erfasst die
//! empfangenen JPEG-Frames als Video-Track. Die Frames werden unverändert
//! weitergereicht: das RTC-Backend schreibt die JPEG-Bytes als Samples auf
//! einen VP8 Track, ohne sie zu transcodieren. Ein Browser auf der
//! Gegenseite kann sie daher nicht dekodieren.

use super::source::{MediaError, MediaSource, VIDEO_FRAME_INTERVAL};
use super::stream::{MediaFrame, MediaStream, MediaTrack, TrackFeed, TrackKind};
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use url::Url;

// ============================================================================
// CONSTANTS
// ============================================================================

/// JPEG Start-of-Image Marker
const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG End-of-Image Marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Obergrenze für ungeparste Daten (ein Frame darf nicht größer werden)
const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Wartezeit auf den ersten vollständigen Frame
const DEFAULT_FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// FRAME PARSER
// ============================================================================

/// Zerlegt einen MJPEG Byte-Strom anhand der SOI/EOI Marker in Frames
#[derive(Debug)]
pub struct MjpegFrameParser {
    buf: BytesMut,
    max_buffer: usize,
}

impl MjpegFrameParser {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_SIZE)
    }

    pub fn with_limit(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_buffer,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);

        if self.buf.len() > self.max_buffer {
            tracing::warn!(
                "MJPEG buffer exceeded {} bytes without a complete frame, dropping",
                self.max_buffer
            );
            self.buf.clear();
        }
    }

    /// Nächster vollständiger JPEG-Frame, falls vorhanden
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Ein einzelnes 0xFF am Ende kann der Anfang eines Markers sein
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let drop = self.buf.len() - keep;
            self.buf.advance(drop);
            return None;
        };

        self.buf.advance(start);

        let end = find(&self.buf, &EOI, SOI.len())?;
        Some(self.buf.split_to(end + EOI.len()).freeze())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for MjpegFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

// ============================================================================
// MJPEG SOURCE
// ============================================================================

/// Erfasst einen MJPEG HTTP-Stream als Video-Track
pub struct MjpegSource {
    url: Url,
    client: reqwest::Client,
    first_frame_timeout: Duration,
}

impl MjpegSource {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            first_frame_timeout: DEFAULT_FIRST_FRAME_TIMEOUT,
        }
    }

    pub fn parse(url: &str) -> Result<Self, MediaError> {
        let url = Url::parse(url).map_err(|e| MediaError::Unreachable(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::new(url)),
            other => Err(MediaError::NoCompatibleApi(format!(
                "unsupported URL scheme '{}'",
                other
            ))),
        }
    }

    pub fn with_first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MediaSource for MjpegSource {
    fn name(&self) -> &str {
        "mjpeg"
    }

    async fn acquire(&self) -> Result<MediaStream, MediaError> {
        tracing::info!("Opening MJPEG stream: {}", self.url);

        let mut response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| MediaError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MediaError::Unreachable(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if !is_supported_content_type(&content_type) {
            return Err(MediaError::CaptureUnsupported(format!(
                "content type '{}'",
                content_type
            )));
        }

        // Wiedergabe starten: erst mit dem ersten Frame gilt die Quelle als aktiv
        let mut parser = MjpegFrameParser::new();
        let first = tokio::time::timeout(
            self.first_frame_timeout,
            read_frame(&mut response, &mut parser),
        )
        .await
        .map_err(|_| MediaError::NoFrames(self.first_frame_timeout))??
        .ok_or(MediaError::NoFrames(self.first_frame_timeout))?;

        tracing::debug!("First MJPEG frame: {} bytes", first.len());

        let track = MediaTrack::new(TrackKind::Video, self.url.as_str());
        let feed = track
            .feed()
            .cloned()
            .ok_or_else(|| MediaError::Capture("track without feed".to_string()))?;

        feed.push(MediaFrame {
            data: first,
            duration: VIDEO_FRAME_INTERVAL,
        });

        tokio::spawn(pump_frames(response, parser, feed));

        let mut stream = MediaStream::new();
        stream.add_track(track);
        Ok(stream)
    }
}

fn is_supported_content_type(content_type: &str) -> bool {
    content_type.starts_with("multipart/x-mixed-replace") || content_type.starts_with("image/jpeg")
}

/// Liest so lange Chunks bis ein Frame vollständig ist
async fn read_frame(
    response: &mut reqwest::Response,
    parser: &mut MjpegFrameParser,
) -> Result<Option<Bytes>, MediaError> {
    loop {
        if let Some(frame) = parser.next_frame() {
            return Ok(Some(frame));
        }
        match response.chunk().await {
            Ok(Some(chunk)) => parser.push(&chunk),
            Ok(None) => return Ok(None),
            Err(e) => return Err(MediaError::Unreachable(e.to_string())),
        }
    }
}

/// Schiebt Frames in den Feed bis der Track gestoppt wird oder der Stream endet
async fn pump_frames(
    mut response: reqwest::Response,
    mut parser: MjpegFrameParser,
    feed: TrackFeed,
) {
    let mut stop = feed.stop_signal();
    let mut frames: u64 = 1;

    loop {
        tokio::select! {
            result = read_frame(&mut response, &mut parser) => match result {
                Ok(Some(data)) => {
                    let frame = MediaFrame { data, duration: VIDEO_FRAME_INTERVAL };
                    if !feed.push(frame) {
                        break;
                    }
                    frames += 1;
                }
                Ok(None) => {
                    tracing::warn!("MJPEG stream ended after {} frames", frames);
                    break;
                }
                Err(e) => {
                    tracing::error!("MJPEG stream error: {}", e);
                    break;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    feed.stop();
    tracing::debug!("MJPEG pump stopped");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut data = SOI.to_vec();
        data.extend_from_slice(body);
        data.extend_from_slice(&EOI);
        data
    }

    #[test]
    fn test_parser_splits_multipart_stream() {
        let mut parser = MjpegFrameParser::new();
        let mut input = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        input.extend(jpeg(b"one"));
        input.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        input.extend(jpeg(b"two"));

        parser.push(&input);

        assert_eq!(parser.next_frame().unwrap().as_ref(), jpeg(b"one").as_slice());
        assert_eq!(parser.next_frame().unwrap().as_ref(), jpeg(b"two").as_slice());
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_parser_handles_split_markers() {
        let mut parser = MjpegFrameParser::new();
        let frame = jpeg(b"payload");

        // Marker über Chunk-Grenzen verteilt
        parser.push(&frame[..1]);
        assert!(parser.next_frame().is_none());
        parser.push(&frame[1..frame.len() - 1]);
        assert!(parser.next_frame().is_none());
        parser.push(&frame[frame.len() - 1..]);

        assert_eq!(parser.next_frame().unwrap().as_ref(), frame.as_slice());
    }

    #[test]
    fn test_parser_discards_garbage() {
        let mut parser = MjpegFrameParser::new();
        parser.push(b"no markers here");

        assert!(parser.next_frame().is_none());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_parser_enforces_buffer_limit() {
        let mut parser = MjpegFrameParser::with_limit(16);
        parser.push(&SOI);
        parser.push(&[0u8; 32]);

        assert_eq!(parser.buffered(), 0);
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_content_type_check() {
        assert!(is_supported_content_type(
            "multipart/x-mixed-replace; boundary=frame"
        ));
        assert!(is_supported_content_type("image/jpeg"));
        assert!(!is_supported_content_type("text/html"));
        assert!(!is_supported_content_type(""));
    }

    #[test]
    fn test_non_http_url_is_rejected() {
        let result = MjpegSource::parse("rtsp://camera.local/stream");
        assert!(matches!(result, Err(MediaError::NoCompatibleApi(_))));

        let source = MjpegSource::parse("http://192.168.1.20:81/stream").unwrap();
        assert_eq!(source.url().port(), Some(81));
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    const MULTIPART_HEADER: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n";

    /// Beantwortet genau eine Anfrage und hält die Verbindung danach offen
    async fn serve_once(response: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        format!("http://{}/stream", addr)
    }

    #[tokio::test]
    async fn test_http_error_is_unreachable() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()).await;

        let result = MjpegSource::parse(&url).unwrap().acquire().await;

        assert!(matches!(result, Err(MediaError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_html_is_unsupported() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
        )
        .await;

        let result = MjpegSource::parse(&url).unwrap().acquire().await;

        assert!(matches!(result, Err(MediaError::CaptureUnsupported(_))));
    }

    #[tokio::test]
    async fn test_no_frame_within_timeout() {
        let mut response = MULTIPART_HEADER.to_vec();
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        let url = serve_once(response).await;

        let timeout = Duration::from_millis(300);
        let result = MjpegSource::parse(&url)
            .unwrap()
            .with_first_frame_timeout(timeout)
            .acquire()
            .await;

        match result {
            Err(MediaError::NoFrames(waited)) => assert_eq!(waited, timeout),
            other => panic!("unexpected result: {:?}", other.map(|s| s.id)),
        }
    }

    #[tokio::test]
    async fn test_first_frame_yields_video_track() {
        let frame = jpeg(b"esp32");
        let mut response = MULTIPART_HEADER.to_vec();
        response.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\r\n");
        let url = serve_once(response).await;

        let stream = MjpegSource::parse(&url)
            .unwrap()
            .with_first_frame_timeout(Duration::from_secs(2))
            .acquire()
            .await
            .unwrap();

        assert_eq!(stream.tracks().len(), 1);
        let track = &stream.tracks()[0];
        assert_eq!(track.kind, TrackKind::Video);
        assert_eq!(track.label, url);
        assert!(!track.is_stopped());

        stream.stop();
        assert!(track.is_stopped());
    }
}
