use thiserror::Error;

/// Ramp error types covering configuration, service connectivity, and lifecycle faults.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RampError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration service could not be reached, or the connection was lost.
    #[error("connection to configuration service '{service}' failed: {reason}")]
    Connection {
        /// Logical service name.
        service: String,
        /// Underlying cause.
        reason: String,
    },

    /// The configuration service rejected an update.
    #[error("configuration update rejected by '{service}': {reason}")]
    Update {
        /// Logical service name.
        service: String,
        /// Message reported by the service.
        reason: String,
    },

    /// Malformed or unexpected reply on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl RampError {
    /// Build a connection error for `service`.
    pub fn connection(service: &str, reason: impl Into<String>) -> Self {
        Self::Connection {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Build an update-rejected error for `service`.
    pub fn update(service: &str, reason: impl Into<String>) -> Self {
        Self::Update {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error means the service is gone and nothing further can be sent.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Protocol(_))
    }
}

/// Convenience type alias for ramp operations.
pub type RampResult<T> = Result<T, RampError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RampError::connection("filter", "connection refused");
        assert_eq!(
            err.to_string(),
            "connection to configuration service 'filter' failed: connection refused"
        );

        let err = RampError::update("filter", "unknown parameter");
        assert!(err.to_string().contains("unknown parameter"));
    }

    #[test]
    fn test_connection_loss_classification() {
        assert!(RampError::connection("filter", "eof").is_connection_loss());
        assert!(RampError::Protocol("garbage".into()).is_connection_loss());
        assert!(!RampError::update("filter", "out of range").is_connection_loss());
        assert!(!RampError::Config("bad".into()).is_connection_loss());
    }
}
