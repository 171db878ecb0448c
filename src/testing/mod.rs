//! Test-Hilfen für Loopback
//!
//! Stub Peer Connections mit deterministischen Candidates, sowie feste
//! Quellen und aufzeichnende Senken.

mod fixtures;
mod stub_peer;

pub use fixtures::{FailingSource, RecordingNotifier, RecordingSink, StaticSource};
pub use stub_peer::{StubBehavior, StubCall, StubOp, StubPeer, StubPeerFactory};
