//! Wiedergabe- und Benachrichtigungs-Oberfläche
//!
//! Ersetzt Video-Element und `alert()` durch zwei kleine Traits.

use crate::media::MediaStream;
use parking_lot::Mutex;

/// Empfängt den zurückgeschleiften Stream
pub trait PlaybackSink: Send + Sync {
    fn attach(&self, stream: MediaStream);
}

/// Zeigt dem Benutzer eine Fehlermeldung
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

/// Sink, der angehängte Streams loggt und den letzten behält
#[derive(Debug, Default)]
pub struct LogSink {
    current: Mutex<Option<MediaStream>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<MediaStream> {
        self.current.lock().clone()
    }
}

impl PlaybackSink for LogSink {
    fn attach(&self, stream: MediaStream) {
        let kinds: Vec<&str> = stream.tracks().iter().map(|t| t.kind.as_str()).collect();
        tracing::info!(
            "Playback attached stream {} with tracks [{}]",
            stream.id,
            kinds.join(", ")
        );
        *self.current.lock() = Some(stream);
    }
}

/// Meldet Fehler auf stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn alert(&self, message: &str) {
        tracing::warn!("Alert: {}", message);
        eprintln!("\n!! {}\n", message);
    }
}
