//! In-Memory Peer Connection
//!
//! Verhält sich wie ein deterministischer ICE-Agent: SDP listet die Tracks
//! als `m=`/`a=msid:` Zeilen, `set_local_description` sammelt N Host
//! Candidates, empfangene Tracks werden beim Erreichen von `Stable`
//! gemeldet.

use crate::config::IceServerConfig;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::{
    EventDispatcher, IceCandidate, PeerConnection, PeerError, PeerEvent, PeerFactory, PeerRole,
    SdpType, SessionDescription, SignalingOp, SignalingState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// BEHAVIOR
// ============================================================================

/// Operationen, die fehlschlagen können
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubOp {
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Close,
}

/// Aufgezeichneter Aufruf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    AddTrack { track_id: String },
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    AddIceCandidate(IceCandidate),
    Close,
}

#[derive(Debug, Clone)]
pub struct StubBehavior {
    /// Operationen, die mit `PeerError::Rejected` scheitern
    pub fail_on: HashSet<StubOp>,
    /// Anzahl Host Candidates pro `set_local_description`
    pub candidates: usize,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            fail_on: HashSet::new(),
            candidates: 2,
        }
    }
}

// ============================================================================
// STUB PEER
// ============================================================================

#[derive(Default)]
struct Inbound {
    pending: Vec<(String, MediaTrack)>,
    stream: Option<MediaStream>,
}

pub struct StubPeer {
    role: PeerRole,
    behavior: StubBehavior,
    ice_servers: Vec<IceServerConfig>,
    events: EventDispatcher,
    state: Mutex<SignalingState>,
    outbound: Mutex<Vec<(String, MediaTrack)>>,
    inbound: Mutex<Inbound>,
    local_desc: Mutex<Option<SessionDescription>>,
    remote_desc: Mutex<Option<SessionDescription>>,
    gathered: Mutex<Vec<IceCandidate>>,
    added: Mutex<Vec<IceCandidate>>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubPeer {
    pub fn new(role: PeerRole, behavior: StubBehavior) -> Self {
        Self::with_ice_servers(role, behavior, Vec::new())
    }

    fn with_ice_servers(
        role: PeerRole,
        behavior: StubBehavior,
        ice_servers: Vec<IceServerConfig>,
    ) -> Self {
        Self {
            role,
            behavior,
            ice_servers,
            events: EventDispatcher::new(),
            state: Mutex::new(SignalingState::New),
            outbound: Mutex::new(Vec::new()),
            inbound: Mutex::new(Inbound::default()),
            local_desc: Mutex::new(None),
            remote_desc: Mutex::new(None),
            gathered: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Alle bisherigen Aufrufe in Reihenfolge
    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().clone()
    }

    pub fn was_called(&self, predicate: impl Fn(&StubCall) -> bool) -> bool {
        self.calls.lock().iter().any(predicate)
    }

    /// Von dieser Verbindung gesammelte Candidates
    pub fn gathered_candidates(&self) -> Vec<IceCandidate> {
        self.gathered.lock().clone()
    }

    /// Von außen hinzugefügte Candidates
    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.added.lock().clone()
    }

    pub fn ice_servers(&self) -> &[IceServerConfig] {
        &self.ice_servers
    }

    fn enter(&self, call: StubCall, op: StubOp) -> Result<(), PeerError> {
        self.calls.lock().push(call);
        if self.behavior.fail_on.contains(&op) {
            return Err(PeerError::Rejected(format!(
                "{} {:?} failed (injected)",
                self.role, op
            )));
        }
        Ok(())
    }

    fn transition(&self, op: SignalingOp) -> Result<SignalingState, PeerError> {
        let mut state = self.state.lock();
        let next = state.apply(op)?;
        *state = next;
        Ok(next)
    }

    fn render_sdp(&self, kind: SdpType) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            match self.role {
                PeerRole::Local => 1001,
                PeerRole::Remote => 2002,
            }
        );
        for (mid, (stream_id, track)) in self.outbound.lock().iter().enumerate() {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:{}\r\na=sendonly\r\na=msid:{} {}\r\n",
                track.kind, mid, stream_id, track.id
            ));
        }
        if kind == SdpType::Answer {
            sdp.push_str("a=ice-lite\r\n");
        }
        sdp
    }

    fn gather_candidates(&self) {
        let base_port = match self.role {
            PeerRole::Local => 50000,
            PeerRole::Remote => 60000,
        };
        let candidates: Vec<IceCandidate> = (0..self.behavior.candidates)
            .map(|i| IceCandidate {
                candidate: format!(
                    "candidate:{}{} 1 udp 2130706431 127.0.0.1 {} typ host",
                    self.role,
                    i,
                    base_port + i
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })
            .collect();

        self.gathered.lock().extend(candidates.iter().cloned());
        for candidate in candidates {
            self.events.dispatch(&PeerEvent::CandidateDiscovered(candidate));
        }
    }

    /// Merkt sich die Tracks aus der Gegenseite
    fn note_remote_tracks(&self, sdp: &str) {
        let mut kind = None;
        let mut inbound = self.inbound.lock();
        for line in sdp.lines() {
            if let Some(media) = line.strip_prefix("m=") {
                kind = match media.split_whitespace().next() {
                    Some("audio") => Some(TrackKind::Audio),
                    Some("video") => Some(TrackKind::Video),
                    _ => None,
                };
            } else if let Some(msid) = line.strip_prefix("a=msid:") {
                let mut parts = msid.split_whitespace();
                if let (Some(kind), Some(stream_id), Some(track_id)) =
                    (kind, parts.next(), parts.next())
                {
                    let track = MediaTrack::remote(track_id, kind, format!("remote-{}", kind));
                    inbound.pending.push((stream_id.to_string(), track));
                }
            }
        }
    }

    /// Meldet ausstehende Tracks, jeweils mit dem kombinierten Stream
    fn deliver_tracks(&self) {
        let mut received = Vec::new();
        {
            let mut inbound = self.inbound.lock();
            let pending = std::mem::take(&mut inbound.pending);
            for (stream_id, track) in pending {
                let stream = inbound
                    .stream
                    .get_or_insert_with(|| MediaStream::with_id(stream_id.clone()));
                stream.add_track_once(track);
                received.push(stream.clone());
            }
        }
        for stream in received {
            self.events.dispatch(&PeerEvent::TrackReceived(stream));
        }
    }
}

#[async_trait]
impl PeerConnection for StubPeer {
    fn role(&self) -> PeerRole {
        self.role
    }

    fn events(&self) -> &EventDispatcher {
        &self.events
    }

    fn signaling_state(&self) -> SignalingState {
        *self.state.lock()
    }

    async fn add_track(&self, track: &MediaTrack, stream: &MediaStream) -> Result<(), PeerError> {
        self.enter(
            StubCall::AddTrack {
                track_id: track.id.clone(),
            },
            StubOp::AddTrack,
        )?;
        self.transition(SignalingOp::AddTrack)?;
        self.outbound
            .lock()
            .push((stream.id.clone(), track.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.enter(StubCall::CreateOffer, StubOp::CreateOffer)?;
        self.signaling_state().check(SignalingOp::CreateOffer)?;
        Ok(SessionDescription::offer(self.render_sdp(SdpType::Offer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.enter(StubCall::CreateAnswer, StubOp::CreateAnswer)?;
        self.signaling_state().check(SignalingOp::CreateAnswer)?;
        Ok(SessionDescription::answer(self.render_sdp(SdpType::Answer)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.enter(
            StubCall::SetLocalDescription(desc.kind),
            StubOp::SetLocalDescription,
        )?;
        let next = self.transition(SignalingOp::SetLocal(desc.kind))?;
        *self.local_desc.lock() = Some(desc);

        self.gather_candidates();
        if next == SignalingState::Stable {
            self.deliver_tracks();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.enter(
            StubCall::SetRemoteDescription(desc.kind),
            StubOp::SetRemoteDescription,
        )?;
        let next = self.transition(SignalingOp::SetRemote(desc.kind))?;
        self.note_remote_tracks(&desc.sdp);
        *self.remote_desc.lock() = Some(desc);

        if next == SignalingState::Stable {
            self.deliver_tracks();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.enter(
            StubCall::AddIceCandidate(candidate.clone()),
            StubOp::AddIceCandidate,
        )?;
        self.signaling_state().check(SignalingOp::AddCandidate)?;
        self.added.lock().push(candidate);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local_desc.lock().clone()
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_desc.lock().clone()
    }

    async fn outbound_track_count(&self) -> usize {
        self.outbound.lock().len()
    }

    async fn inbound_track_count(&self) -> usize {
        self.inbound
            .lock()
            .stream
            .as_ref()
            .map(|s| s.tracks().len())
            .unwrap_or(0)
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.enter(StubCall::Close, StubOp::Close)?;
        self.transition(SignalingOp::Close)?;
        Ok(())
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erstellt [`StubPeer`]s und merkt sich die letzte Verbindung pro Rolle
#[derive(Default)]
pub struct StubPeerFactory {
    behaviors: HashMap<PeerRole, StubBehavior>,
    fail_creation: HashSet<PeerRole>,
    created: AtomicUsize,
    peers: Mutex<HashMap<PeerRole, Arc<StubPeer>>>,
    ice_configs: Mutex<Vec<(PeerRole, Vec<IceServerConfig>)>>,
}

impl StubPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, role: PeerRole, op: StubOp) -> Self {
        self.behaviors.entry(role).or_default().fail_on.insert(op);
        self
    }

    pub fn with_candidates(mut self, role: PeerRole, count: usize) -> Self {
        self.behaviors.entry(role).or_default().candidates = count;
        self
    }

    /// `create` für diese Rolle schlägt fehl
    pub fn fail_creation(mut self, role: PeerRole) -> Self {
        self.fail_creation.insert(role);
        self
    }

    /// Anzahl `create` Aufrufe (auch fehlgeschlagene)
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn peer(&self, role: PeerRole) -> Option<Arc<StubPeer>> {
        self.peers.lock().get(&role).cloned()
    }

    /// ICE-Konfigurationen in Erstellungsreihenfolge
    pub fn ice_configs(&self) -> Vec<(PeerRole, Vec<IceServerConfig>)> {
        self.ice_configs.lock().clone()
    }
}

#[async_trait]
impl PeerFactory for StubPeerFactory {
    async fn create(
        &self,
        role: PeerRole,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.ice_configs.lock().push((role, ice_servers.to_vec()));

        if self.fail_creation.contains(&role) {
            return Err(PeerError::WebRTC(format!(
                "Failed to create {} peer connection (injected)",
                role
            )));
        }

        let behavior = self.behaviors.get(&role).cloned().unwrap_or_default();
        let peer = Arc::new(StubPeer::with_ice_servers(
            role,
            behavior,
            ice_servers.to_vec(),
        ));
        self.peers.lock().insert(role, Arc::clone(&peer));
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream() -> MediaStream {
        let mut stream = MediaStream::with_id("s1");
        stream.add_track(MediaTrack::new(TrackKind::Video, "cam"));
        stream
    }

    #[tokio::test]
    async fn test_offer_lists_tracks() {
        let peer = StubPeer::new(PeerRole::Local, StubBehavior::default());
        let stream = video_stream();
        peer.add_track(&stream.tracks()[0], &stream).await.unwrap();

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=video"));
        assert!(offer
            .sdp
            .contains(&format!("a=msid:s1 {}", stream.tracks()[0].id)));
    }

    #[tokio::test]
    async fn test_gathers_candidates_on_local_description() {
        let peer = StubPeer::new(
            PeerRole::Local,
            StubBehavior {
                candidates: 3,
                ..Default::default()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        peer.events().subscribe(move |event| {
            if let PeerEvent::CandidateDiscovered(c) = event {
                seen_clone.lock().push(c.clone());
            }
        });

        let offer = peer.create_offer().await.unwrap();
        peer.set_local_description(offer).await.unwrap();

        assert_eq!(seen.lock().len(), 3);
        assert_eq!(*seen.lock(), peer.gathered_candidates());
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let mut behavior = StubBehavior::default();
        behavior.fail_on.insert(StubOp::CreateOffer);
        let peer = StubPeer::new(PeerRole::Local, behavior);

        assert!(matches!(
            peer.create_offer().await,
            Err(PeerError::Rejected(_))
        ));
        assert_eq!(peer.calls(), vec![StubCall::CreateOffer]);
    }

    #[tokio::test]
    async fn test_candidate_rejected_after_close() {
        let peer = StubPeer::new(PeerRole::Remote, StubBehavior::default());
        peer.close().await.unwrap();

        let candidate = IceCandidate {
            candidate: "candidate:x".into(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        assert!(matches!(
            peer.add_ice_candidate(candidate).await,
            Err(PeerError::Signaling(_))
        ));
        assert!(peer.added_candidates().is_empty());
    }
}
