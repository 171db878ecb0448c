//! WebRTC Peer Backend (webrtc-rs)
//!
//! Verwaltet eine RTCPeerConnection, schreibt Frames der lokalen Tracks als
//! Samples und meldet Candidates und empfangene Tracks als [`PeerEvent`].
//!
//! Es gibt keinen Encoder: Feed-Payloads gehen unverändert als Samples auf
//! den Track (VP8 für Video, Opus für Audio). Nur Quellen, die bereits
//! passend encodierte Frames liefern, ergeben einen dekodierbaren Stream.
//! JPEG-Frames und rohes PCM werden transportiert und gezählt, aber nicht
//! in den deklarierten Codec umgewandelt.

use super::connection::{PeerConnection, PeerError, PeerFactory, PeerRole};
use super::description::{IceCandidate, SessionDescription};
use super::events::{EventDispatcher, PeerEvent};
use super::signaling_state::{SignalingOp, SignalingState};
use crate::config::IceServerConfig;
use crate::media::{MediaStream, MediaTrack, TrackFeed, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn webrtc_err(e: webrtc::Error) -> PeerError {
    PeerError::WebRTC(e.to_string())
}

/// Codec für ausgehende Tracks je nach Art
fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    }
}

// ============================================================================
// RTC PEER
// ============================================================================

/// webrtc-rs basierte Peer Connection
pub struct RtcPeer {
    role: PeerRole,
    pc: Arc<RTCPeerConnection>,
    state: Mutex<SignalingState>,
    events: EventDispatcher,
    inbound: Arc<AtomicUsize>,
    packets_received: Arc<AtomicU64>,
    /// Candidates vor der Remote Description (`None` sobald diese gesetzt ist)
    early_candidates: tokio::sync::Mutex<Option<Vec<IceCandidate>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RtcPeer {
    /// Erstellt eine neue Peer Connection
    pub async fn new(role: PeerRole, ice_servers: &[IceServerConfig]) -> Result<Self, PeerError> {
        // Media Engine mit Standard-Codecs (VP8, Opus, ...)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_err)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().cloned().map(Into::into).collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_err)?);

        let peer = Self {
            role,
            pc,
            state: Mutex::new(SignalingState::New),
            events: EventDispatcher::new(),
            inbound: Arc::new(AtomicUsize::new(0)),
            packets_received: Arc::new(AtomicU64::new(0)),
            early_candidates: tokio::sync::Mutex::new(Some(Vec::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        peer.register_handlers();

        tracing::debug!("[{}] Peer connection created", role);
        Ok(peer)
    }

    /// Anzahl empfangener RTP-Pakete über alle Remote-Tracks
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Zustand laut webrtc-rs (zum Abgleich mit der eigenen State Machine)
    pub fn stack_signaling_state(&self) -> RTCSignalingState {
        self.pc.signaling_state()
    }

    fn register_handlers(&self) {
        let role = self.role;

        // ICE Candidate Handler
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => {
                            events.dispatch(&PeerEvent::CandidateDiscovered(init.into()));
                        }
                        Err(e) => {
                            tracing::warn!("[{}] Failed to serialize ICE candidate: {}", role, e)
                        }
                    },
                    None => tracing::debug!("[{}] ICE gathering complete", role),
                }
                Box::pin(async {})
            }));

        // Track Handler: Tracks werden pro Stream-ID zusammengefasst
        let events = self.events.clone();
        let inbound = Arc::clone(&self.inbound);
        let packets = Arc::clone(&self.packets_received);
        let tasks = Arc::clone(&self.tasks);
        let streams: Arc<Mutex<HashMap<String, MediaStream>>> = Arc::default();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let stream_id = track.stream_id();
            let remote_track = MediaTrack::remote(track.id(), kind, format!("remote-{}", kind));

            let combined = {
                let mut streams = streams.lock();
                let stream = streams
                    .entry(stream_id.clone())
                    .or_insert_with(|| MediaStream::with_id(stream_id.clone()));
                if stream.add_track_once(remote_track) {
                    inbound.fetch_add(1, Ordering::SeqCst);
                }
                stream.clone()
            };

            tracing::info!(
                "[{}] Received {} track {} (stream {})",
                role,
                kind,
                track.id(),
                stream_id
            );
            events.dispatch(&PeerEvent::TrackReceived(combined));

            // RTP lesen, damit der Empfangspuffer nicht vollläuft
            let packets = Arc::clone(&packets);
            let handle = tokio::spawn(async move {
                while let Ok((_packet, _)) = track.read_rtp().await {
                    packets.fetch_add(1, Ordering::Relaxed);
                }
            });
            tasks.lock().push(handle);

            Box::pin(async {})
        }));

        // Connection State Handler
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::info!("[{}] Peer connection state: {:?}", role, s);
                Box::pin(async {})
            }));

        self.pc
            .on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
                tracing::debug!("[{}] Stack signaling state: {:?}", role, s);
                Box::pin(async {})
            }));
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }
}

/// Schreibt Frames aus dem Feed als Samples in den lokalen Track
async fn pump_samples(feed: TrackFeed, track: Arc<TrackLocalStaticSample>) {
    if feed.is_stopped() {
        return;
    }

    let mut frames = feed.subscribe();
    let mut stop = feed.stop_signal();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let sample = Sample {
                        data: frame.data,
                        duration: frame.duration,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        tracing::debug!("Failed to write sample on {}: {}", track.id(), e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Track {} skipped {} frames", track.id(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Sample pump for {} stopped", track.id());
}

#[async_trait]
impl PeerConnection for RtcPeer {
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
        self.state.lock().check(SignalingOp::AddTrack)?;

        let local_track = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind),
            track.id.clone(),
            stream.id.clone(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&local_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_err)?;

        // RTCP lesen, sonst laufen die Interceptors nicht
        self.track_task(tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        }));

        if let Some(feed) = track.feed() {
            self.track_task(tokio::spawn(pump_samples(feed.clone(), local_track)));
        }

        tracing::debug!("[{}] Added {} track {}", self.role, track.kind, track.id);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.state.lock().check(SignalingOp::CreateOffer)?;

        let offer = self.pc.create_offer(None).await.map_err(webrtc_err)?;
        SessionDescription::try_from(offer).map_err(PeerError::InvalidSdp)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.state.lock().check(SignalingOp::CreateAnswer)?;

        let answer = self.pc.create_answer(None).await.map_err(webrtc_err)?;
        SessionDescription::try_from(answer).map_err(PeerError::InvalidSdp)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let next = self.state.lock().apply(SignalingOp::SetLocal(desc.kind))?;
        let desc = RTCSessionDescription::try_from(desc).map_err(PeerError::InvalidSdp)?;

        self.pc.set_local_description(desc).await.map_err(webrtc_err)?;
        *self.state.lock() = next;

        tracing::debug!("[{}] Local description set, state {}", self.role, next);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let next = self.state.lock().apply(SignalingOp::SetRemote(desc.kind))?;
        let desc = RTCSessionDescription::try_from(desc).map_err(PeerError::InvalidSdp)?;

        // Queue sperren, damit kein Candidate zwischen Setzen und Leeren verloren geht
        let mut early = self.early_candidates.lock().await;
        self.pc.set_remote_description(desc).await.map_err(webrtc_err)?;
        *self.state.lock() = next;
        let queued = early.take().unwrap_or_default();
        drop(early);

        tracing::debug!(
            "[{}] Remote description set, state {}, applying {} queued candidate(s)",
            self.role,
            next,
            queued.len()
        );

        for candidate in queued {
            if let Err(e) = self.pc.add_ice_candidate(candidate.into()).await {
                tracing::warn!("[{}] Failed to apply queued ICE candidate: {}", self.role, e);
            }
        }

        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.state.lock().check(SignalingOp::AddCandidate)?;

        {
            let mut early = self.early_candidates.lock().await;
            if let Some(queue) = early.as_mut() {
                queue.push(candidate);
                return Ok(());
            }
        }

        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(webrtc_err)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|d| SessionDescription::try_from(d).ok())
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.pc
            .remote_description()
            .await
            .and_then(|d| SessionDescription::try_from(d).ok())
    }

    async fn outbound_track_count(&self) -> usize {
        let mut count = 0;
        for sender in self.pc.get_senders().await {
            if sender.track().await.is_some() {
                count += 1;
            }
        }
        count
    }

    async fn inbound_track_count(&self) -> usize {
        self.inbound.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), PeerError> {
        *self.state.lock() = SignalingState::Closed;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }

        self.pc.close().await.map_err(webrtc_err)?;
        tracing::debug!("[{}] Peer connection closed", self.role);
        Ok(())
    }
}

impl std::fmt::Debug for RtcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcPeer")
            .field("role", &self.role)
            .field("state", &self.signaling_state())
            .field("packets_received", &self.packets_received())
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erstellt [`RtcPeer`] Instanzen
#[derive(Debug, Clone, Default)]
pub struct RtcPeerFactory;

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        role: PeerRole,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = RtcPeer::new(role, ice_servers).await?;
        Ok(Arc::new(peer))
    }
}
