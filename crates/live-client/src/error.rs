//! Client error types

use live_transport::TransportError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Why a connection could not be established
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("host not found: {host}")]
    DnsNotFound { host: String },

    #[error("connection refused by {address}:{port}")]
    ConnectionRefused { address: String, port: u16 },

    #[error("{message}")]
    Other { message: String },
}

impl ConnectionError {
    pub(crate) fn timed_out(after: Duration) -> Self {
        ConnectionError::Other {
            message: format!("connect timed out after {}ms", after.as_millis()),
        }
    }
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::DnsNotFound { host } => ConnectionError::DnsNotFound { host },
            TransportError::ConnectionRefused { address, port } => {
                ConnectionError::ConnectionRefused { address, port }
            }
            other => ConnectionError::Other {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("not connected")]
    NotConnected,

    #[error("session already started")]
    AlreadyStarted,

    #[error("session stopped")]
    Stopped,

    #[error("serialize failed: {0}")]
    Serialize(String),

    #[error("publish failed: {0}")]
    Publish(TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] live_core::Error),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::InvalidUrl(message) => ClientError::Config(message),
            other => ClientError::Connection(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification_preserved() {
        let err: ClientError = TransportError::ConnectionRefused {
            address: "10.0.0.1".to_string(),
            port: 8883,
        }
        .into();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::ConnectionRefused { port: 8883, .. })
        ));

        let err: ClientError = TransportError::DnsNotFound {
            host: "nowhere".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::DnsNotFound { .. })
        ));
    }

    #[test]
    fn test_other_transport_errors_are_generic() {
        let err: ClientError = TransportError::Timeout.into();
        match err {
            ClientError::Connection(ConnectionError::Other { message }) => {
                assert_eq!(message, "timeout")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err: ClientError = TransportError::InvalidUrl("bad".to_string()).into();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
