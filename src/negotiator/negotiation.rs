//! Offer/Answer Austausch zwischen zwei Verbindungen
//!
//! Die Reihenfolge ist fest, jeder Schritt wird abgewartet. Der erste
//! Fehler bricht den Rest ab.

use crate::peer::{PeerConnection, PeerError};
use thiserror::Error;

/// Schritte des Austauschs in Ausführungsreihenfolge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    CreateOffer,
    SetLocalOffer,
    SetRemoteOffer,
    CreateAnswer,
    SetLocalAnswer,
    SetRemoteAnswer,
}

impl std::fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NegotiationStep::CreateOffer => "local.createOffer",
            NegotiationStep::SetLocalOffer => "local.setLocalDescription(offer)",
            NegotiationStep::SetRemoteOffer => "remote.setRemoteDescription(offer)",
            NegotiationStep::CreateAnswer => "remote.createAnswer",
            NegotiationStep::SetLocalAnswer => "remote.setLocalDescription(answer)",
            NegotiationStep::SetRemoteAnswer => "local.setRemoteDescription(answer)",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
#[error("Negotiation failed at {step}: {source}")]
pub struct NegotiationError {
    pub step: NegotiationStep,
    #[source]
    pub source: PeerError,
}

fn at(step: NegotiationStep) -> impl FnOnce(PeerError) -> NegotiationError {
    move |source| NegotiationError { step, source }
}

/// Führt den kompletten Offer/Answer Austausch aus
pub async fn negotiate(
    local: &dyn PeerConnection,
    remote: &dyn PeerConnection,
) -> Result<(), NegotiationError> {
    let offer = local
        .create_offer()
        .await
        .map_err(at(NegotiationStep::CreateOffer))?;
    local
        .set_local_description(offer.clone())
        .await
        .map_err(at(NegotiationStep::SetLocalOffer))?;
    remote
        .set_remote_description(offer)
        .await
        .map_err(at(NegotiationStep::SetRemoteOffer))?;
    tracing::debug!("Offer applied on both sides");

    let answer = remote
        .create_answer()
        .await
        .map_err(at(NegotiationStep::CreateAnswer))?;
    remote
        .set_local_description(answer.clone())
        .await
        .map_err(at(NegotiationStep::SetLocalAnswer))?;
    local
        .set_remote_description(answer)
        .await
        .map_err(at(NegotiationStep::SetRemoteAnswer))?;
    tracing::debug!("Answer applied on both sides");

    Ok(())
}
