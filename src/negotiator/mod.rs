//! Negotiator Module - Loopback-Session zwischen zwei Peer Connections

mod negotiation;
#[allow(clippy::module_inception)]
mod negotiator;
mod playback;
mod relay;
mod session;

pub use negotiation::{negotiate, NegotiationError, NegotiationStep};
pub use negotiator::{LoopbackNegotiator, NegotiatorError, NegotiatorEvent, SessionState};
pub use playback::{ConsoleNotifier, LogSink, Notifier, PlaybackSink};
pub use relay::{CandidateRelay, RelayStats};
pub use session::{LoopbackSession, PeerReport, SessionReport, TrackSummary};
