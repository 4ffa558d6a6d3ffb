//! Signaling payloads relayed between the two call participants
//!
//! The relay itself is external. These types fix the JSON shapes: session
//! descriptions and ICE candidates use the standard browser field names so
//! either side may be a browser.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP offer or answer (`{"type": "offer", "sdp": "v=0..."}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether the SDP carries fresh ICE credentials of an ICE restart
    ///
    /// Only meaningful when compared against the previous description; this
    /// returns the `ice-ufrag` so callers can compare.
    pub fn ice_ufrag(&self) -> Option<&str> {
        self.sdp
            .lines()
            .find_map(|line| line.trim().strip_prefix("a=ice-ufrag:"))
    }
}

/// A trickled ICE candidate (`RTCIceCandidateInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// One message for the relay, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalingMessage {
    /// Wrap a description in the matching message variant
    pub fn from_description(description: SessionDescription) -> Result<Self> {
        match description.sdp_type {
            SdpType::Offer => Ok(SignalingMessage::Offer(description)),
            SdpType::Answer | SdpType::Pranswer => Ok(SignalingMessage::Answer(description)),
            SdpType::Rollback => Err(Error::SerializationError(
                "rollback descriptions are not relayed".to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::SerializationError(e.to_string()))
    }
}
