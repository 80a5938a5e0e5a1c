//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Substrings resolvers use when a host name does not resolve
const DNS_FAILURE_MARKERS: &[&str] = &[
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "no such host",
    "no address associated",
    "temporary failure in name resolution",
];

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("host not found: {host}")]
    DnsNotFound { host: String },

    #[error("connection refused: {address}:{port}")]
    ConnectionRefused { address: String, port: u16 },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Classify an I/O error raised while opening a connection to `host:port`
    pub fn from_connect_io(error: &std::io::Error, host: &str, port: u16) -> Self {
        if error.kind() == std::io::ErrorKind::ConnectionRefused {
            return TransportError::ConnectionRefused {
                address: host.to_string(),
                port,
            };
        }

        if is_dns_failure(&error.to_string()) {
            return TransportError::DnsNotFound {
                host: host.to_string(),
            };
        }

        TransportError::ConnectionFailed(error.to_string())
    }
}

fn is_dns_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    DNS_FAILURE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_refused_classification() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused");
        match TransportError::from_connect_io(&err, "10.0.0.5", 8883) {
            TransportError::ConnectionRefused { address, port } => {
                assert_eq!(address, "10.0.0.5");
                assert_eq!(port, 8883);
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_dns_classification() {
        let messages = [
            "failed to lookup address information: Name or service not known",
            "failed to lookup address information: nodename nor servname provided, or not known",
            "No such host is known. (os error 11001)",
        ];

        for message in messages {
            let err = io::Error::new(io::ErrorKind::Other, message);
            assert!(
                matches!(
                    TransportError::from_connect_io(&err, "broker.invalid", 1883),
                    TransportError::DnsNotFound { ref host } if host == "broker.invalid"
                ),
                "not classified as dns failure: {}",
                message
            );
        }
    }

    #[test]
    fn test_other_classification() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        assert!(matches!(
            TransportError::from_connect_io(&err, "h", 1),
            TransportError::ConnectionFailed(_)
        ));
    }
}
