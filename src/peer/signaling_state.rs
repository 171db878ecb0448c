//! Signaling State Machine
//!
//! Explizites Modell des Offer/Answer Zustands einer Verbindung. Jede
//! Operation wird validiert, bevor sie den WebRTC-Stack erreicht.
//!
//! ```text
//! New ──set local offer──▶ HaveLocalOffer ──set remote answer──▶ Stable
//!  └───set remote offer──▶ HaveRemoteOffer ─set local answer──▶ Stable
//! ```

use super::description::SdpType;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Cannot {op} in signaling state {state}")]
    InvalidTransition {
        state: SignalingState,
        op: SignalingOp,
    },

    #[error("Unsupported description type: {0}")]
    Unsupported(SdpType),
}

// ============================================================================
// STATE & OPERATIONS
// ============================================================================

/// Signaling-Zustand einer Verbindung
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    #[default]
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalingState::New => "new",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Stable => "stable",
            SignalingState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Operationen, die den Zustand prüfen oder ändern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddTrack,
    AddCandidate,
    Close,
}

impl std::fmt::Display for SignalingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalingOp::CreateOffer => f.write_str("create offer"),
            SignalingOp::CreateAnswer => f.write_str("create answer"),
            SignalingOp::SetLocal(kind) => write!(f, "set local {}", kind),
            SignalingOp::SetRemote(kind) => write!(f, "set remote {}", kind),
            SignalingOp::AddTrack => f.write_str("add track"),
            SignalingOp::AddCandidate => f.write_str("add ICE candidate"),
            SignalingOp::Close => f.write_str("close"),
        }
    }
}

impl SignalingState {
    /// Liefert den Folgezustand oder einen Fehler bei ungültigem Übergang
    pub fn apply(self, op: SignalingOp) -> Result<SignalingState, SignalingError> {
        use SignalingState::*;

        if let SignalingOp::SetLocal(kind) | SignalingOp::SetRemote(kind) = op {
            if matches!(kind, SdpType::Pranswer | SdpType::Rollback) {
                return Err(SignalingError::Unsupported(kind));
            }
        }

        let next = match (self, op) {
            (_, SignalingOp::Close) => Some(Closed),
            (Closed, _) => None,

            (New | Stable | HaveLocalOffer, SignalingOp::CreateOffer) => Some(self),
            (HaveRemoteOffer, SignalingOp::CreateAnswer) => Some(self),

            (New | Stable | HaveLocalOffer, SignalingOp::SetLocal(SdpType::Offer)) => {
                Some(HaveLocalOffer)
            }
            (HaveRemoteOffer, SignalingOp::SetLocal(SdpType::Answer)) => Some(Stable),

            (New | Stable | HaveRemoteOffer, SignalingOp::SetRemote(SdpType::Offer)) => {
                Some(HaveRemoteOffer)
            }
            (HaveLocalOffer, SignalingOp::SetRemote(SdpType::Answer)) => Some(Stable),

            (_, SignalingOp::AddTrack | SignalingOp::AddCandidate) => Some(self),

            _ => None,
        };

        next.ok_or(SignalingError::InvalidTransition { state: self, op })
    }

    /// Prüft eine Operation ohne den Zustand zu ändern
    pub fn check(self, op: SignalingOp) -> Result<(), SignalingError> {
        self.apply(op).map(|_| ())
    }

    pub fn is_closed(&self) -> bool {
        *self == SignalingState::Closed
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_new() {
        assert_eq!(SignalingState::default(), SignalingState::New);
    }

    #[test]
    fn test_offerer_path() {
        let state = SignalingState::New
            .apply(SignalingOp::CreateOffer)
            .and_then(|s| s.apply(SignalingOp::SetLocal(SdpType::Offer)))
            .unwrap();
        assert_eq!(state, SignalingState::HaveLocalOffer);

        let state = state.apply(SignalingOp::SetRemote(SdpType::Answer)).unwrap();
        assert_eq!(state, SignalingState::Stable);
    }

    #[test]
    fn test_answerer_path() {
        let state = SignalingState::New
            .apply(SignalingOp::SetRemote(SdpType::Offer))
            .unwrap();
        assert_eq!(state, SignalingState::HaveRemoteOffer);

        state.check(SignalingOp::CreateAnswer).unwrap();

        let state = state.apply(SignalingOp::SetLocal(SdpType::Answer)).unwrap();
        assert_eq!(state, SignalingState::Stable);
    }

    #[test]
    fn test_answer_requires_remote_offer() {
        let err = SignalingState::New
            .apply(SignalingOp::CreateAnswer)
            .unwrap_err();
        assert_eq!(
            err,
            SignalingError::InvalidTransition {
                state: SignalingState::New,
                op: SignalingOp::CreateAnswer,
            }
        );

        assert!(SignalingState::New
            .apply(SignalingOp::SetRemote(SdpType::Answer))
            .is_err());
        assert!(SignalingState::HaveLocalOffer
            .apply(SignalingOp::SetLocal(SdpType::Answer))
            .is_err());
    }

    #[test]
    fn test_offer_rejected_while_remote_offer_pending() {
        assert!(SignalingState::HaveRemoteOffer
            .apply(SignalingOp::CreateOffer)
            .is_err());
        assert!(SignalingState::HaveRemoteOffer
            .apply(SignalingOp::SetLocal(SdpType::Offer))
            .is_err());
    }

    #[test]
    fn test_stable_allows_new_offer() {
        let state = SignalingState::Stable
            .apply(SignalingOp::SetLocal(SdpType::Offer))
            .unwrap();
        assert_eq!(state, SignalingState::HaveLocalOffer);
    }

    #[test]
    fn test_closed_is_terminal() {
        let closed = SignalingState::HaveLocalOffer
            .apply(SignalingOp::Close)
            .unwrap();
        assert!(closed.is_closed());

        assert!(closed.apply(SignalingOp::CreateOffer).is_err());
        assert!(closed.apply(SignalingOp::AddCandidate).is_err());
        assert_eq!(closed.apply(SignalingOp::Close).unwrap(), SignalingState::Closed);
    }

    #[test]
    fn test_pranswer_and_rollback_unsupported() {
        assert_eq!(
            SignalingState::HaveRemoteOffer.apply(SignalingOp::SetLocal(SdpType::Pranswer)),
            Err(SignalingError::Unsupported(SdpType::Pranswer))
        );
        assert_eq!(
            SignalingState::HaveLocalOffer.apply(SignalingOp::SetRemote(SdpType::Rollback)),
            Err(SignalingError::Unsupported(SdpType::Rollback))
        );
    }

    #[test]
    fn test_candidates_accepted_before_remote_description() {
        assert_eq!(
            SignalingState::New.apply(SignalingOp::AddCandidate).unwrap(),
            SignalingState::New
        );
    }
}
