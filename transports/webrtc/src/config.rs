//! Configuration types for call sessions

use crate::capture::CaptureConstraints;
use crate::peer::ReconnectionPolicy;
use serde::{Deserialize, Serialize};

/// Main configuration for a [`CallSession`](crate::CallSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// STUN/TURN endpoints handed to every new transport (at least one of each)
    pub ice_servers: Vec<IceServerConfig>,

    /// ICE-restart recovery policy
    pub reconnection: ReconnectionPolicy,

    /// Constraints used by `request_capture_default`
    pub default_constraints: CaptureConstraints,
}

/// One negotiation-assistance endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Endpoint URLs (`stun:`, `stuns:`, `turn:` or `turns:`)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// STUN-only endpoint
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Authenticated TURN endpoint
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Whether any of the URLs is a relay (TURN) endpoint
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }

    /// Whether any of the URLs is a STUN endpoint
    pub fn is_stun(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("stun:") || u.starts_with("stuns:"))
    }
}

const DEFAULT_TURN_USERNAME: &str = "openrelayproject";
const DEFAULT_TURN_CREDENTIAL: &str = "openrelayproject";

/// Default STUN endpoints plus a TURN relay reachable over UDP/80 and TCP/443
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig::stun("stun:stun.l.google.com:19302"),
        IceServerConfig::stun("stun:stun1.l.google.com:19302"),
        IceServerConfig::turn(
            "turn:openrelay.metered.ca:80",
            DEFAULT_TURN_USERNAME,
            DEFAULT_TURN_CREDENTIAL,
        ),
        IceServerConfig::turn(
            "turn:openrelay.metered.ca:443?transport=tcp",
            DEFAULT_TURN_USERNAME,
            DEFAULT_TURN_CREDENTIAL,
        ),
    ]
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            reconnection: ReconnectionPolicy::default(),
            default_constraints: CaptureConstraints::default(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - no STUN endpoint or no TURN endpoint is configured
    /// - an endpoint URL has an unknown scheme
    /// - a TURN endpoint lacks a username or credential
    /// - the reconnection policy is invalid
    /// - the default constraints request neither audio nor video
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "ICE server entry has no URLs".to_string(),
                ));
            }
            for url in &server.urls {
                let known = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known {
                    return Err(Error::InvalidConfig(format!(
                        "ICE server URL must start with stun:, stuns:, turn: or turns:, got {}",
                        url
                    )));
                }
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {:?} requires a username and credential",
                    server.urls
                )));
            }
        }

        if !self.ice_servers.iter().any(IceServerConfig::is_stun) {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.ice_servers.iter().any(IceServerConfig::is_turn) {
            return Err(Error::InvalidConfig(
                "At least one TURN server is required".to_string(),
            ));
        }

        self.reconnection.validate()?;

        if self.default_constraints.is_empty() {
            return Err(Error::InvalidConfig(
                "default_constraints must request audio or video".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse a configuration from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| crate::Error::SerializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Preset for cellular networks: more restarts, longer handoff windows,
    /// 480p capture
    ///
    /// # Example
    ///
    /// ```
    /// use rendezvous_call::config::SessionConfig;
    ///
    /// let config = SessionConfig::mobile_network_preset();
    /// assert!(config.validate().is_ok());
    /// assert_eq!(config.reconnection.max_attempts, 5);
    /// ```
    pub fn mobile_network_preset() -> Self {
        let mut constraints = CaptureConstraints::default();
        if let Some(video) = constraints.video.as_mut() {
            video.width = 640;
            video.height = 480;
            video.frame_rate = 24;
        }

        Self {
            ice_servers: default_ice_servers(),
            reconnection: ReconnectionPolicy::conservative(),
            default_constraints: constraints,
        }
    }

    /// Preset for stable networks: fast restarts with short timeouts
    pub fn low_latency_preset() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            reconnection: ReconnectionPolicy::aggressive(),
            default_constraints: CaptureConstraints::default(),
        }
    }

    /// Replace the ICE server list
    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    /// Replace the reconnection policy
    pub fn with_reconnection(mut self, reconnection: ReconnectionPolicy) -> Self {
        self.reconnection = reconnection;
        self
    }

    /// Set the maximum number of ICE restarts per episode
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u8) -> Self {
        self.reconnection.max_attempts = max_attempts;
        self
    }
}
