//! Loopback Session
//!
//! Eine Session pro Startversuch: besitzt Stream, beide Verbindungen, die
//! Relays und alle Observer-Registrierungen.

use super::relay::{CandidateRelay, RelayStats};
use crate::media::{MediaStream, TrackKind};
use crate::peer::{PeerConnection, PeerRole, SdpType, SignalingState, SubscriptionId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub role: PeerRole,
    pub signaling_state: SignalingState,
    pub local_description: Option<SdpType>,
    pub remote_description: Option<SdpType>,
    pub outbound_tracks: usize,
    pub inbound_tracks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub kind: TrackKind,
    pub label: String,
}

/// Zusammenfassung einer Session (z.B. für die CLI-Ausgabe)
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stream_id: String,
    pub tracks: Vec<TrackSummary>,
    pub local: PeerReport,
    pub remote: PeerReport,
    pub candidates_local_to_remote: RelayStats,
    pub candidates_remote_to_local: RelayStats,
    pub closed: bool,
}

// ============================================================================
// SESSION
// ============================================================================

pub struct LoopbackSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    stream: MediaStream,
    local: Arc<dyn PeerConnection>,
    remote: Arc<dyn PeerConnection>,
    to_remote: CandidateRelay,
    to_local: CandidateRelay,
    subscriptions: Mutex<Vec<(PeerRole, SubscriptionId)>>,
    closed: AtomicBool,
}

impl LoopbackSession {
    pub(crate) fn new(
        stream: MediaStream,
        local: Arc<dyn PeerConnection>,
        remote: Arc<dyn PeerConnection>,
        to_remote: CandidateRelay,
        to_local: CandidateRelay,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            stream,
            local,
            remote,
            to_remote,
            to_local,
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn track_subscription(&self, role: PeerRole, id: SubscriptionId) {
        self.subscriptions.lock().push((role, id));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn local(&self) -> &Arc<dyn PeerConnection> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn PeerConnection> {
        &self.remote
    }

    /// Relay-Zähler (local → remote, remote → local)
    pub fn relay_stats(&self) -> (RelayStats, RelayStats) {
        (self.to_remote.stats(), self.to_local.stats())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Gibt alle Ressourcen frei. Mehrfacher Aufruf ist wirkungslos.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (role, id) in subscriptions {
            let peer = match role {
                PeerRole::Local => &self.local,
                PeerRole::Remote => &self.remote,
            };
            peer.events().unsubscribe(id);
        }

        self.to_remote.shutdown();
        self.to_local.shutdown();
        self.stream.stop();

        let (local, remote) = futures::join!(self.local.close(), self.remote.close());
        if let Err(e) = local {
            tracing::warn!("Failed to close local connection: {}", e);
        }
        if let Err(e) = remote {
            tracing::warn!("Failed to close remote connection: {}", e);
        }

        tracing::info!("Session {} closed", self.id);
    }

    pub async fn report(&self) -> SessionReport {
        let (to_remote, to_local) = self.relay_stats();

        SessionReport {
            session_id: self.id,
            started_at: self.started_at,
            stream_id: self.stream.id.clone(),
            tracks: self
                .stream
                .tracks()
                .iter()
                .map(|t| TrackSummary {
                    id: t.id.clone(),
                    kind: t.kind,
                    label: t.label.clone(),
                })
                .collect(),
            local: peer_report(self.local.as_ref()).await,
            remote: peer_report(self.remote.as_ref()).await,
            candidates_local_to_remote: to_remote,
            candidates_remote_to_local: to_local,
            closed: self.is_closed(),
        }
    }
}

async fn peer_report(peer: &dyn PeerConnection) -> PeerReport {
    PeerReport {
        role: peer.role(),
        signaling_state: peer.signaling_state(),
        local_description: peer.local_description().await.map(|d| d.kind),
        remote_description: peer.remote_description().await.map(|d| d.kind),
        outbound_tracks: peer.outbound_track_count().await,
        inbound_tracks: peer.inbound_track_count().await,
    }
}

impl std::fmt::Debug for LoopbackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSession")
            .field("id", &self.id)
            .field("stream", &self.stream.id)
            .field("local", &self.local.signaling_state())
            .field("remote", &self.remote.signaling_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
