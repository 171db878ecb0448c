//! Peer Module - Peer Connections und Signaling
//!
//! Dieses Modul verwaltet:
//! - Die PeerConnection Schnittstelle (Trait + Factory)
//! - Typisierte Events (CandidateDiscovered, TrackReceived)
//! - Die Signaling State Machine
//! - Das webrtc-rs Backend

mod connection;
mod description;
mod events;
mod rtc;
mod signaling_state;

pub use connection::{PeerConnection, PeerError, PeerFactory, PeerRole};
pub use description::{IceCandidate, SdpType, SessionDescription};
pub use events::{EventDispatcher, Observer, PeerEvent, SubscriptionId};
pub use rtc::{RtcPeer, RtcPeerFactory};
pub use signaling_state::{SignalingError, SignalingOp, SignalingState};
