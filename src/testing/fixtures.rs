//! Feste Quellen und aufzeichnende Senken

use crate::media::{MediaError, MediaSource, MediaStream};
use crate::negotiator::{Notifier, PlaybackSink};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Liefert immer denselben Stream
#[derive(Debug, Clone)]
pub struct StaticSource {
    stream: MediaStream,
}

impl StaticSource {
    pub fn new(stream: MediaStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl MediaSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn acquire(&self) -> Result<MediaStream, MediaError> {
        Ok(self.stream.clone())
    }
}

/// Schlägt immer mit dem gegebenen Fehler fehl
#[derive(Debug, Clone)]
pub struct FailingSource {
    error: MediaError,
}

impl FailingSource {
    pub fn new(error: MediaError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl MediaSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn acquire(&self) -> Result<MediaStream, MediaError> {
        Err(self.error.clone())
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<MediaStream>>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<MediaStream> {
        self.attached.lock().clone()
    }

    pub fn last(&self) -> Option<MediaStream> {
        self.attached.lock().last().cloned()
    }
}

impl PlaybackSink for RecordingSink {
    fn attach(&self, stream: MediaStream) {
        self.attached.lock().push(stream);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
