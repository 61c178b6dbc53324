use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the Waypost service locator
#[derive(Debug)]
pub enum LocatorError {
    /// The resolve target exists in no known catalog and no gateway applies
    Unavailable(String),

    /// `attach` cannot allocate a port from the configured pool
    NoPortsLeft,

    /// A routing group is known but currently has no active candidates
    NoGroupCandidate(String),

    /// Storage reports that the named group does not exist
    GroupNotFound(String),

    /// The group storage backend itself failed
    Storage(String),

    /// `attach` was called with a name that is already taken
    DuplicateService(String),

    /// `detach` was called with an unknown name
    ServiceNotFound(String),

    /// A discovered peer could not be connected on any resolved endpoint
    Unreachable(String),

    /// A peer sent traffic that violates the synchronization protocol
    Protocol(String),

    /// Transport layer errors
    Transport(String),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// System I/O errors
    Io(std::io::Error),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// MessagePack encoding errors (announces, catalog chunks)
    MsgPackEncode(rmp_serde::encode::Error),

    /// MessagePack decoding errors
    MsgPackDecode(rmp_serde::decode::Error),

    /// Binary envelope encoding errors (TCP sync frames)
    FrameEncode(bincode::error::EncodeError),

    /// Binary envelope decoding errors
    FrameDecode(bincode::error::DecodeError),
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorError::Unavailable(name) => {
                write!(f, "service '{}' is not available", name)
            }
            LocatorError::NoPortsLeft => write!(f, "no ports left for allocation"),
            LocatorError::NoGroupCandidate(group) => {
                write!(f, "no active candidates in routing group '{}'", group)
            }
            LocatorError::GroupNotFound(group) => {
                write!(f, "routing group '{}' not found in storage", group)
            }
            LocatorError::Storage(msg) => write!(f, "storage error: {}", msg),
            LocatorError::DuplicateService(name) => {
                write!(f, "service '{}' is already attached", name)
            }
            LocatorError::ServiceNotFound(name) => {
                write!(f, "service '{}' is not attached", name)
            }
            LocatorError::Unreachable(node) => {
                write!(f, "unable to connect to node '{}'", node)
            }
            LocatorError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            LocatorError::Transport(msg) => write!(f, "transport error: {}", msg),
            LocatorError::Serialization(err) => write!(f, "serialization error: {}", err),
            LocatorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::MsgPackEncode(err) => write!(f, "msgpack encode: {}", err),
            SerializationError::MsgPackDecode(err) => write!(f, "msgpack decode: {}", err),
            SerializationError::FrameEncode(err) => write!(f, "frame encode: {}", err),
            SerializationError::FrameDecode(err) => write!(f, "frame decode: {}", err),
        }
    }
}

impl std::error::Error for LocatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocatorError::Io(err) => Some(err),
            LocatorError::Serialization(SerializationError::MsgPackEncode(err)) => Some(err),
            LocatorError::Serialization(SerializationError::MsgPackDecode(err)) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, LocatorError>;

// Conversions from common error types
impl From<std::io::Error> for LocatorError {
    fn from(err: std::io::Error) -> Self {
        LocatorError::Io(err)
    }
}

impl From<rmp_serde::encode::Error> for LocatorError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        LocatorError::Serialization(SerializationError::MsgPackEncode(err))
    }
}

impl From<rmp_serde::decode::Error> for LocatorError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        LocatorError::Serialization(SerializationError::MsgPackDecode(err))
    }
}

impl From<bincode::error::EncodeError> for LocatorError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LocatorError::Serialization(SerializationError::FrameEncode(err))
    }
}

impl From<bincode::error::DecodeError> for LocatorError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LocatorError::Serialization(SerializationError::FrameDecode(err))
    }
}

impl From<SerializationError> for LocatorError {
    fn from(err: SerializationError) -> Self {
        LocatorError::Serialization(err)
    }
}

// Axum IntoResponse implementation for the HTTP surface
impl IntoResponse for LocatorError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl LocatorError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LocatorError::Unavailable(_) => StatusCode::NOT_FOUND,
            LocatorError::NoPortsLeft => StatusCode::SERVICE_UNAVAILABLE,
            LocatorError::NoGroupCandidate(_) => StatusCode::SERVICE_UNAVAILABLE,
            LocatorError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            LocatorError::Storage(_) => StatusCode::BAD_GATEWAY,
            LocatorError::DuplicateService(_) => StatusCode::CONFLICT,
            LocatorError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            LocatorError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            LocatorError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LocatorError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LocatorError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LocatorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            LocatorError::Unavailable(_) => "unavailable",
            LocatorError::NoPortsLeft => "no_ports_left",
            LocatorError::NoGroupCandidate(_) => "no_group_candidate",
            LocatorError::GroupNotFound(_) => "group_not_found",
            LocatorError::Storage(_) => "storage_unavailable",
            LocatorError::DuplicateService(_) => "duplicate_service",
            LocatorError::ServiceNotFound(_) => "service_not_found",
            LocatorError::Unreachable(_) => "unreachable",
            LocatorError::Protocol(_) => "protocol_error",
            LocatorError::Transport(_) => "transport_error",
            LocatorError::Serialization(_) => "serialization_error",
            LocatorError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LocatorError::Unavailable("echo".to_string());
        assert_eq!(err.to_string(), "service 'echo' is not available");

        let err = LocatorError::NoGroupCandidate("db".to_string());
        assert_eq!(
            err.to_string(),
            "no active candidates in routing group 'db'"
        );

        let io_err = LocatorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let err: LocatorError = io_err.into();

        assert!(matches!(err, LocatorError::Io(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LocatorError::Unavailable("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LocatorError::NoPortsLeft.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            LocatorError::DuplicateService("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
