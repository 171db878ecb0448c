//! Loopback Negotiator
//!
//! Koordiniert einen Durchlauf: Stream holen, zwei Verbindungen aufbauen,
//! Candidates kreuzweise verdrahten und Offer/Answer austauschen. Der
//! zurückgeschleifte Stream geht an den `PlaybackSink`.

use super::negotiation::{negotiate, NegotiationError};
use super::playback::{Notifier, PlaybackSink};
use super::relay::CandidateRelay;
use super::session::LoopbackSession;
use crate::config::{FailureReporting, LoopbackConfig};
use crate::media::{MediaError, MediaSource, MediaStream, TrackKind};
use crate::peer::{PeerConnection, PeerError, PeerEvent, PeerFactory, PeerRole};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum NegotiatorError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Connection error: {0}")]
    Connection(#[from] PeerError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("A loopback session is already starting")]
    AlreadyRunning,

    #[error("No active session")]
    NoActiveSession,
}

// ============================================================================
// STATE & EVENTS
// ============================================================================

/// Status des Negotiators
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nichts gestartet
    #[default]
    Idle,
    /// Stream wird geholt
    AcquiringMedia,
    /// Verbindungen werden aufgebaut
    Connecting,
    /// Offer/Answer läuft
    Negotiating,
    /// Austausch abgeschlossen
    Negotiated { session_id: Uuid },
    /// Abgebrochen
    Failed { reason: String },
    /// Session beendet
    Closed,
}

#[derive(Debug, Clone)]
pub enum NegotiatorEvent {
    StateChanged(SessionState),
    TrackAttached {
        stream_id: String,
        kinds: Vec<TrackKind>,
    },
    Error(String),
}

/// Setzt das Start-Flag auch bei abgebrochenem Future zurück
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// NEGOTIATOR
// ============================================================================

pub struct LoopbackNegotiator {
    config: LoopbackConfig,
    factory: Arc<dyn PeerFactory>,
    sink: Arc<dyn PlaybackSink>,
    notifier: Arc<dyn Notifier>,
    state: Arc<Mutex<SessionState>>,
    session: Mutex<Option<Arc<LoopbackSession>>>,
    starting: AtomicBool,
    event_tx: broadcast::Sender<NegotiatorEvent>,
}

impl LoopbackNegotiator {
    pub fn new(
        config: LoopbackConfig,
        factory: Arc<dyn PeerFactory>,
        sink: Arc<dyn PlaybackSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            config,
            factory,
            sink,
            notifier,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            session: Mutex::new(None),
            starting: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<NegotiatorEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Aktuelle (oder zuletzt gestartete) Session
    pub fn session(&self) -> Option<Arc<LoopbackSession>> {
        self.session.lock().clone()
    }

    fn set_state(&self, new_state: SessionState) {
        *self.state.lock() = new_state.clone();
        let _ = self.event_tx.send(NegotiatorEvent::StateChanged(new_state));
    }

    /// Capture-Fehler werden immer angezeigt
    fn alert_failure(&self, message: &str) {
        let _ = self.event_tx.send(NegotiatorEvent::Error(message.to_string()));
        self.notifier.alert(message);
    }

    /// Verbindungs- und Negotiation-Fehler je nach `FailureReporting`
    fn report_failure(&self, message: &str) {
        let _ = self.event_tx.send(NegotiatorEvent::Error(message.to_string()));
        match self.config.failure_reporting {
            FailureReporting::Alert => self.notifier.alert(message),
            FailureReporting::LogOnly => {}
        }
    }

    fn fail(&self, error: &NegotiatorError) {
        self.set_state(SessionState::Failed {
            reason: error.to_string(),
        });
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Holt einen Stream von der Quelle. Fehler werden gemeldet, nie wiederholt.
    pub async fn acquire_stream(
        &self,
        source: &dyn MediaSource,
    ) -> Result<MediaStream, NegotiatorError> {
        tracing::info!("Requesting local stream from {}", source.name());

        let result = match source.acquire().await {
            Ok(stream) if stream.is_empty() => Err(MediaError::NoTracks),
            other => other,
        };

        match result {
            Ok(stream) => {
                tracing::info!(
                    "Received local stream {} with {} track(s)",
                    stream.id,
                    stream.tracks().len()
                );
                Ok(stream)
            }
            Err(e) => {
                tracing::error!("getUserMedia() error: {}", e);
                self.alert_failure(&format!("getUserMedia() error: {}", e));
                Err(e.into())
            }
        }
    }

    /// Baut beide Verbindungen auf und verdrahtet Tracks, Candidates und Playback
    pub async fn build_connections(
        &self,
        stream: &MediaStream,
    ) -> Result<LoopbackSession, NegotiatorError> {
        let ice_servers = &self.config.ice_servers;
        tracing::info!("Creating peer connections with {} ICE server(s)", ice_servers.len());

        let local = self.factory.create(PeerRole::Local, ice_servers).await?;
        tracing::debug!("Created local peer connection");

        let remote = match self.factory.create(PeerRole::Remote, ice_servers).await {
            Ok(remote) => remote,
            Err(e) => {
                close_quietly(local.as_ref()).await;
                return Err(e.into());
            }
        };
        tracing::debug!("Created remote peer connection");

        for track in stream.tracks() {
            if let Err(e) = local.add_track(track, stream).await {
                futures::join!(close_quietly(local.as_ref()), close_quietly(remote.as_ref()));
                return Err(e.into());
            }
        }
        tracing::info!("Added {} local track(s) to local connection", stream.tracks().len());

        let to_remote = CandidateRelay::spawn(PeerRole::Local, Arc::clone(&remote));
        let to_local = CandidateRelay::spawn(PeerRole::Remote, Arc::clone(&local));

        let local_sub = local.events().subscribe(to_remote.observer());
        let remote_sub = remote.events().subscribe(to_local.observer());

        let sink = Arc::clone(&self.sink);
        let event_tx = self.event_tx.clone();
        let track_sub = remote.events().subscribe(move |event| {
            if let PeerEvent::TrackReceived(received) = event {
                tracing::info!("Received remote stream {}", received.id);
                let kinds = received.tracks().iter().map(|t| t.kind).collect();
                sink.attach(received.clone());
                let _ = event_tx.send(NegotiatorEvent::TrackAttached {
                    stream_id: received.id.clone(),
                    kinds,
                });
            }
        });

        let session = LoopbackSession::new(stream.clone(), local, remote, to_remote, to_local);
        session.track_subscription(PeerRole::Local, local_sub);
        session.track_subscription(PeerRole::Remote, remote_sub);
        session.track_subscription(PeerRole::Remote, track_sub);

        Ok(session)
    }

    /// Kompletter Durchlauf. Eine vorherige Session wird vorher geschlossen.
    pub async fn start(
        &self,
        source: &dyn MediaSource,
    ) -> Result<Arc<LoopbackSession>, NegotiatorError> {
        if self.starting.swap(true, Ordering::SeqCst) {
            tracing::warn!("Start requested while another start is in flight");
            return Err(NegotiatorError::AlreadyRunning);
        }
        let _guard = StartGuard(&self.starting);

        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            tracing::info!("Closing previous session {}", previous.id());
            previous.close().await;
        }

        self.set_state(SessionState::AcquiringMedia);
        let stream = match self.acquire_stream(source).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        self.set_state(SessionState::Connecting);
        let session = match self.build_connections(&stream).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                stream.stop();
                tracing::error!("Failed to create peer connections: {}", e);
                self.report_failure(&format!("Failed to create peer connections: {}", e));
                self.fail(&e);
                return Err(e);
            }
        };
        *self.session.lock() = Some(Arc::clone(&session));

        self.set_state(SessionState::Negotiating);
        if let Err(e) = negotiate(session.local().as_ref(), session.remote().as_ref()).await {
            tracing::error!("{}", e);
            self.report_failure(&e.to_string());
            session.close().await;
            let e = NegotiatorError::from(e);
            self.fail(&e);
            return Err(e);
        }

        tracing::info!("Session {} negotiated", session.id());
        self.set_state(SessionState::Negotiated {
            session_id: session.id(),
        });

        Ok(session)
    }

    /// Schließt die aktuelle Session
    pub async fn stop(&self) -> Result<(), NegotiatorError> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(NegotiatorError::NoActiveSession)?;

        session.close().await;
        self.set_state(SessionState::Closed);
        Ok(())
    }
}

async fn close_quietly(peer: &dyn PeerConnection) {
    if let Err(e) = peer.close().await {
        tracing::warn!("Failed to close {} connection: {}", peer.role(), e);
    }
}

impl std::fmt::Debug for LoopbackNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNegotiator")
            .field("state", &self.state())
            .field("session", &self.session())
            .field("starting", &self.starting.load(Ordering::SeqCst))
            .finish()
    }
}
