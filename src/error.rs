//! Error types for the WebRTC bridge

/// Result type alias using the bridge Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bridge operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Unsupported or unresolvable codec parameters
    #[error("Codec error: {0}")]
    CodecError(String),

    /// The media hub rejected or cannot satisfy a publish/subscribe request
    #[error("{0}")]
    HubError(String),

    /// Session state machine error
    #[error("Session error: {0}")]
    SessionError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error came from the media hub
    pub fn is_hub_error(&self) -> bool {
        matches!(self, Error::HubError(_))
    }

    /// Check if this error is a negotiation (SDP/codec) error
    pub fn is_negotiation_error(&self) -> bool {
        matches!(self, Error::SdpError(_) | Error::CodecError(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_hub_error_display_is_bare() {
        // Hub rejections are surfaced verbatim to signaling clients.
        let err = Error::HubError("bad name".to_string());
        assert_eq!(err.to_string(), "bad name");
    }

    #[test]
    fn test_error_is_hub_error() {
        assert!(Error::HubError("bad name".to_string()).is_hub_error());
        assert!(!Error::SdpError("test".to_string()).is_hub_error());
    }

    #[test]
    fn test_error_is_negotiation_error() {
        assert!(Error::SdpError("test".to_string()).is_negotiation_error());
        assert!(Error::CodecError("test".to_string()).is_negotiation_error());
        assert!(!Error::HubError("test".to_string()).is_negotiation_error());
    }

    #[test]
    fn test_anyhow_passthrough() {
        let err = Error::from(anyhow::anyhow!("listener gone"));
        assert_eq!(err.to_string(), "listener gone");
    }
}
