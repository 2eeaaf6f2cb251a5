//! Configuration types for the WebRTC bridge

use serde::{Deserialize, Serialize};

/// Main configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// ICE server URLs (STUN/TURN), e.g. `stun:stun.l.google.com:19302`
    pub ice_servers: Vec<String>,

    /// Public IPs announced as host candidates (NAT 1:1 mapping).
    /// Empty when the server is directly reachable.
    pub public_ips: Vec<String>,

    /// Lower bound of the UDP port range used for media (0 = ephemeral)
    pub udp_port_min: u16,

    /// Upper bound of the UDP port range used for media (0 = ephemeral)
    pub udp_port_max: u16,

    /// Interval between PLI keyframe requests on inbound video (default: 2000ms)
    pub pli_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            public_ips: Vec::new(),
            udp_port_min: 0,
            udp_port_max: 0,
            pli_interval_ms: 2000,
        }
    }
}

impl BridgeConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `pli_interval_ms` is zero
    /// - the UDP port range is inverted
    /// - an ICE server URL has an unknown scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.pli_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "pli_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.udp_port_min > self.udp_port_max {
            return Err(Error::InvalidConfig(format!(
                "udp port range is inverted: {}-{}",
                self.udp_port_min, self.udp_port_max
            )));
        }

        for url in &self.ice_servers {
            if !url.starts_with("stun:") && !url.starts_with("turn:") && !url.starts_with("turns:")
            {
                return Err(Error::InvalidConfig(format!(
                    "ICE server URL must start with stun:, turn: or turns:, got {url}"
                )));
            }
        }

        Ok(())
    }
}
