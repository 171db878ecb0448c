//! ICE Candidate Relay
//!
//! Leitet Candidates einer Verbindung an die jeweils andere weiter. Der
//! Observer reiht nur ein, das asynchrone `add_ice_candidate` läuft in einem
//! eigenen Task. Fehler werden geloggt und gezählt, nie weitergereicht.

use crate::peer::{IceCandidate, PeerConnection, PeerEvent, PeerRole};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Zähler eines Relays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub forwarded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    failed: AtomicU64,
}

pub struct CandidateRelay {
    from: PeerRole,
    tx: mpsc::UnboundedSender<IceCandidate>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl CandidateRelay {
    /// Startet ein Relay, das Candidates von `from` an `target` übergibt
    pub fn spawn(from: PeerRole, target: Arc<dyn PeerConnection>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
        let counters = Arc::new(Counters::default());

        let task_counters = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            while let Some(candidate) = rx.recv().await {
                match target.add_ice_candidate(candidate).await {
                    Ok(()) => {
                        task_counters.forwarded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        task_counters.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!("Error adding {} ICE candidate: {}", from, e);
                    }
                }
            }
        });

        Self {
            from,
            tx,
            counters,
            task,
        }
    }

    /// Observer für die Quell-Verbindung
    pub fn observer(&self) -> impl Fn(&PeerEvent) + Send + Sync + 'static {
        let tx = self.tx.clone();
        let from = self.from;
        move |event| {
            if let PeerEvent::CandidateDiscovered(candidate) = event {
                tracing::trace!("Relaying {} candidate {}", from, candidate.candidate);
                let _ = tx.send(candidate.clone());
            }
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            forwarded: self.counters.forwarded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for CandidateRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}
