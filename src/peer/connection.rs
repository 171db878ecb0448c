//! Peer Connection Schnittstelle
//!
//! Die Negotiation arbeitet nur gegen diese Traits. Das webrtc-rs Backend
//! und die Test-Stubs implementieren sie.

use super::description::{IceCandidate, SessionDescription};
use super::events::EventDispatcher;
use super::signaling_state::{SignalingError, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{MediaStream, MediaTrack};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error("Operation rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// ROLE
// ============================================================================

/// Welche Seite der Loopback-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Local,
    Remote,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Local => f.write_str("local"),
            PeerRole::Remote => f.write_str("remote"),
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Peer Connection mit Offer/Answer, ICE und Track-Events
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn role(&self) -> PeerRole;

    /// Events dieser Verbindung (CandidateDiscovered, TrackReceived)
    fn events(&self) -> &EventDispatcher;

    fn signaling_state(&self) -> SignalingState;

    /// Hängt einen ausgehenden Track an
    async fn add_track(&self, track: &MediaTrack, stream: &MediaStream) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn remote_description(&self) -> Option<SessionDescription>;

    /// Anzahl ausgehender Tracks
    async fn outbound_track_count(&self) -> usize;

    /// Anzahl empfangener Tracks
    async fn inbound_track_count(&self) -> usize;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Erstellt Peer Connections mit gegebener ICE-Konfiguration
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        role: PeerRole,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
