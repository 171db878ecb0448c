//! Session Descriptions und ICE Candidates
//!
//! Eigene, serialisierbare Typen an der Peer-Schnittstelle. Konvertierungen
//! zu den webrtc-rs Typen liegen hier, damit Backends sie teilen.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

// ============================================================================
// SDP TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

impl From<SdpType> for RTCSdpType {
    fn from(sdp_type: SdpType) -> Self {
        match sdp_type {
            SdpType::Offer => RTCSdpType::Offer,
            SdpType::Answer => RTCSdpType::Answer,
            SdpType::Pranswer => RTCSdpType::Pranswer,
            SdpType::Rollback => RTCSdpType::Rollback,
        }
    }
}

impl TryFrom<RTCSdpType> for SdpType {
    type Error = String;

    fn try_from(sdp_type: RTCSdpType) -> Result<Self, Self::Error> {
        match sdp_type {
            RTCSdpType::Offer => Ok(SdpType::Offer),
            RTCSdpType::Answer => Ok(SdpType::Answer),
            RTCSdpType::Pranswer => Ok(SdpType::Pranswer),
            RTCSdpType::Rollback => Ok(SdpType::Rollback),
            RTCSdpType::Unspecified => Err("unspecified SDP type".to_string()),
        }
    }
}

// ============================================================================
// SESSION DESCRIPTION
// ============================================================================

/// Offer oder Answer, wird genau einmal von der Gegenseite konsumiert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = String;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        match desc.kind {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)
                .map_err(|e| format!("Invalid SDP offer: {}", e)),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)
                .map_err(|e| format!("Invalid SDP answer: {}", e)),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)
                .map_err(|e| format!("Invalid SDP pranswer: {}", e)),
            SdpType::Rollback => Err("Rollback SDP type not supported".to_string()),
        }
    }
}

impl TryFrom<RTCSessionDescription> for SessionDescription {
    type Error = String;

    fn try_from(desc: RTCSessionDescription) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: SdpType::try_from(desc.sdp_type)?,
            sdp: desc.sdp,
        })
    }
}

// ============================================================================
// ICE CANDIDATE
// ============================================================================

/// Ein entdeckter Netzwerkpfad
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_json_uses_browser_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_candidate_init_conversion() {
        let candidate = IceCandidate {
            candidate: "candidate:2 1 udp 1 127.0.0.1 9 typ host".to_string(),
            sdp_mid: Some("1".to_string()),
            sdp_mline_index: Some(1),
        };

        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(IceCandidate::from(init), candidate);
    }

    #[test]
    fn test_rollback_cannot_be_converted() {
        let desc = SessionDescription {
            kind: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(RTCSessionDescription::try_from(desc).is_err());
    }

    #[test]
    fn test_description_json_uses_type_field() {
        let json = serde_json::to_value(SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }
}
