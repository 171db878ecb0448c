//! MediaStream und MediaTrack
//!
//! Ein Stream ist eine geordnete Menge von Tracks. Jeder Track besitzt einen
//! Feed, in den Quellen Frames schieben und aus dem Peer-Backends lesen.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Kapazität des Frame-Broadcasts pro Track
const FEED_CAPACITY: usize = 64;

// ============================================================================
// TRACK KIND
// ============================================================================

/// Art eines Media Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FRAMES & FEED
// ============================================================================

/// Ein einzelner, bereits kodierter Frame
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// Frame-Verteiler eines Tracks
///
/// Quellen schieben Frames per [`TrackFeed::push`], Backends abonnieren per
/// [`TrackFeed::subscribe`]. Nach [`TrackFeed::stop`] werden keine Frames
/// mehr angenommen und alle Stop-Signale feuern.
#[derive(Clone)]
pub struct TrackFeed {
    tx: broadcast::Sender<MediaFrame>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl TrackFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        Self {
            tx,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Schiebt einen Frame in den Feed. Gibt `false` zurück wenn gestoppt.
    pub fn push(&self, frame: MediaFrame) -> bool {
        if self.is_stopped() {
            return false;
        }
        // Ohne Abonnenten geht der Frame verloren, das ist erlaubt
        let _ = self.tx.send(frame);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.tx.subscribe()
    }

    /// Receiver der auf `true` wechselt sobald der Feed gestoppt wird
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TrackFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TrackFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackFeed")
            .field("subscribers", &self.subscriber_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// MEDIA TRACK
// ============================================================================

/// Ein Audio- oder Video-Track
#[derive(Debug, Clone, Serialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
    #[serde(skip)]
    feed: Option<TrackFeed>,
}

impl MediaTrack {
    /// Erstellt einen lokalen Track mit eigenem Feed
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            feed: Some(TrackFeed::new()),
        }
    }

    /// Beschreibt einen empfangenen Track (ohne lokalen Feed)
    pub fn remote(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            feed: None,
        }
    }

    pub fn feed(&self) -> Option<&TrackFeed> {
        self.feed.as_ref()
    }

    pub fn stop(&self) {
        if let Some(feed) = &self.feed {
            feed.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.feed.as_ref().map(|f| f.is_stopped()).unwrap_or(false)
    }
}

// ============================================================================
// MEDIA STREAM
// ============================================================================

/// Geordnete Menge von Tracks
#[derive(Debug, Clone, Serialize)]
pub struct MediaStream {
    pub id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    /// Fügt einen Track hinzu, falls die ID noch nicht enthalten ist
    pub fn add_track_once(&mut self, track: MediaTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stoppt alle Tracks des Streams
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
