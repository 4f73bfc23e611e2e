//! Error types shared across Framecast crates.

/// Top-level error type for Framecast operations.
#[derive(Debug, thiserror::Error)]
pub enum FramecastError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Decoder fault: {message}")]
    DecoderFault { message: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Pipeline closed: {message}")]
    Closed { message: String },

    #[error("Timed out: {message}")]
    Timeout { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramecastError.
pub type FramecastResult<T> = Result<T, FramecastError>;

impl FramecastError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn decoder_fault(msg: impl Into<String>) -> Self {
        Self::DecoderFault {
            message: msg.into(),
        }
    }

    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    /// Whether the producer that returned this error can never yield
    /// another frame.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::DecoderFault { .. }
                | Self::Closed { .. }
                | Self::Timeout { .. }
        )
    }

    /// Cloneable copy of the error for reporting to multiple waiters.
    ///
    /// Transparent variants collapse into their message text.
    pub fn to_reported(&self) -> Self {
        match self {
            Self::Network { message } => Self::network(message.clone()),
            Self::Configuration { message } => Self::configuration(message.clone()),
            Self::DecoderFault { message } => Self::decoder_fault(message.clone()),
            Self::ProtocolViolation { message } => Self::protocol_violation(message.clone()),
            Self::Encoder { message } => Self::encoder(message.clone()),
            Self::Mux { message } => Self::mux(message.clone()),
            Self::Audio { message } => Self::audio(message.clone()),
            Self::Storage { message } => Self::storage(message.clone()),
            Self::Closed { message } => Self::closed(message.clone()),
            Self::Timeout { message } => Self::timeout(message.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Json(e) => Self::Other(anyhow::anyhow!(e.to_string())),
            Self::Other(e) => Self::Other(anyhow::anyhow!(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_are_classified() {
        assert!(FramecastError::configuration("no video track").is_terminal());
        assert!(FramecastError::decoder_fault("gpu reset").is_terminal());
        assert!(FramecastError::timeout("flush").is_terminal());
        assert!(!FramecastError::network("503").is_terminal());
        assert!(!FramecastError::protocol_violation("pending").is_terminal());
    }

    #[test]
    fn reported_copy_keeps_variant_and_message() {
        let err = FramecastError::decoder_fault("bitstream corrupt");
        let copy = err.to_reported();
        assert!(matches!(copy, FramecastError::DecoderFault { .. }));
        assert_eq!(copy.to_string(), "Decoder fault: bitstream corrupt");
    }
}
