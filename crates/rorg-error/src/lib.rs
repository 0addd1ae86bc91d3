//! `rorg-error`: Declare the unified error type returned by the rorg
//! service orchestrator.
//!
//! # Overview
//!
//! Every fallible operation in the orchestrator core reports an [`Error`],
//! and every RPC response carries a [`ResultCode`].  The two are kept in
//! lockstep: each `Error` variant corresponds to exactly one non-`Ok`
//! result code, so the RPC facade can translate any core failure into a
//! `(code, message)` pair without ever surfacing a transport-level
//! failure to the client.
//!
//! Unexpected failures from the container runtime or the filesystem are
//! wrapped as [`Error::Internal`].

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::unwrap_used)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome code carried by every RPC response.
///
/// The wire form is the SCREAMING_SNAKE_CASE name, e.g.
/// `SERVICE_NOT_FOUND`.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ResultCode {
    /// The operation succeeded.
    Ok,
    /// The operation failed for an unclassified reason.
    Unknown,
    /// The named service is not registered.
    ServiceNotFound,
    /// A service with the same id already exists.
    ServiceAlreadyExist,
    /// The requested service type is not supported.
    ServiceTypeNotSupported,
    /// The submitted options are not supported for this service type.
    ServiceUnsupportedOptions,
    /// An internal invariant was violated, or a collaborator failed.
    Internal,
    /// The named request does not exist on the service it was routed to.
    ServiceRequestNotExist,
    /// The service id did not parse.
    InvalidServiceId,
    /// The operation requires the service to be active.
    ServiceNotActive,
}

/// An error returned by the orchestrator core.
///
/// Each variant carries a human-readable message that ends up in the
/// `error_message` field of the RPC response.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Some state or collaborator behaved in a way we can't classify.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// A lookup named a service that is not in the registry.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// A create named an id that is already registered.
    #[error("service already exists: {0}")]
    ServiceAlreadyExist(String),

    /// The service type code is not one we can construct.
    #[error("service type is not supported")]
    ServiceTypeNotSupported,

    /// The submitted options cannot be honored.
    #[error("unsupported service options: {0}")]
    ServiceUnsupportedOptions(String),

    /// An internal error: a broken invariant, a runtime-driver failure,
    /// or an I/O failure during persistence.
    #[error("internal error: {0}")]
    Internal(String),

    /// A release named a request id that the issuer or target does not
    /// hold.
    #[error("service request does not exist: {0}")]
    ServiceRequestNotExist(String),

    /// A service id failed to parse.
    #[error("invalid service id: {0}")]
    InvalidServiceId(String),

    /// The issuer of a request is not active.
    #[error("service not active: {0}")]
    ServiceNotActive(String),
}

impl Error {
    /// Return the [`ResultCode`] that represents this error on the wire.
    pub fn code(&self) -> ResultCode {
        match self {
            Error::Unknown(_) => ResultCode::Unknown,
            Error::ServiceNotFound(_) => ResultCode::ServiceNotFound,
            Error::ServiceAlreadyExist(_) => ResultCode::ServiceAlreadyExist,
            Error::ServiceTypeNotSupported => ResultCode::ServiceTypeNotSupported,
            Error::ServiceUnsupportedOptions(_) => ResultCode::ServiceUnsupportedOptions,
            Error::Internal(_) => ResultCode::Internal,
            Error::ServiceRequestNotExist(_) => ResultCode::ServiceRequestNotExist,
            Error::InvalidServiceId(_) => ResultCode::InvalidServiceId,
            Error::ServiceNotActive(_) => ResultCode::ServiceNotActive,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Internal(format!("I/O error: {}", e))
    }
}

/// A `Result` as returned by the orchestrator core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn wire_form() {
        assert_eq!(serde_json::to_string(&ResultCode::Ok).unwrap(), r#""OK""#);
        assert_eq!(
            serde_json::to_string(&ResultCode::ServiceNotFound).unwrap(),
            r#""SERVICE_NOT_FOUND""#
        );
        assert_eq!(
            serde_json::to_string(&ResultCode::ServiceUnsupportedOptions).unwrap(),
            r#""SERVICE_UNSUPPORTED_OPTIONS""#
        );
        let code: ResultCode = serde_json::from_str(r#""INVALID_SERVICE_ID""#).unwrap();
        assert_eq!(code, ResultCode::InvalidServiceId);
    }

    #[test]
    fn codes_round_trip() {
        for code in ResultCode::iter() {
            let json = serde_json::to_string(&code).unwrap();
            let back: ResultCode = serde_json::from_str(&json).unwrap();
            assert_eq!(code, back);
        }
    }

    #[test]
    fn error_to_code() {
        assert_eq!(
            Error::ServiceNotFound("x:y".into()).code(),
            ResultCode::ServiceNotFound
        );
        assert_eq!(
            Error::ServiceNotActive("x:y".into()).code(),
            ResultCode::ServiceNotActive
        );
        assert_eq!(Error::ServiceTypeNotSupported.code(), ResultCode::ServiceTypeNotSupported);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(Error::from(io).code(), ResultCode::Internal);
    }

    #[test]
    fn message_includes_context() {
        let e = Error::ServiceRequestNotExist("__builtin:__operator[r1]".into());
        assert!(e.to_string().contains("__operator"));
    }
}
