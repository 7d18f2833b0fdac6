//! Failure taxonomy for remote calls.
//!
//! | Kind           | Retryable |
//! |----------------|-----------|
//! | `Connectivity` | yes       |
//! | `Timeout`      | yes       |
//! | `Server`       | yes       |
//! | `Client`       | no        |
//! | `Decoding`     | no        |
//! | `InvalidState` | no        |
//! | `Cancelled`    | no        |

use bridge_traits::{BridgeError, HttpResponse};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

/// Refinement of a 4xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Other,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientErrorKind::BadRequest => "bad request",
            ClientErrorKind::Unauthorized => "unauthorized",
            ClientErrorKind::Forbidden => "forbidden",
            ClientErrorKind::NotFound => "not found",
            ClientErrorKind::Other => "rejected",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("No network connection: {0}")]
    Connectivity(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Server error (HTTP {status})")]
    Server { status: u16 },

    #[error("Request {kind} (HTTP {status})")]
    Client { status: u16, kind: ClientErrorKind },

    #[error("Malformed response: {0}")]
    Decoding(String),

    /// Local data that cannot be turned into a request, such as a queued
    /// operation without a target id.
    #[error("Invalid local state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Connectivity(_) | ApiError::Timeout(_) | ApiError::Server { .. }
        )
    }

    /// Whether this failure says something about the backend or the network.
    ///
    /// Cancellation is the caller's decision and is left out of health
    /// accounting.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, ApiError::Cancelled)
    }

    /// Classifies a status code. Returns `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            500..=599 => Some(ApiError::Server { status }),
            _ => {
                let kind = match status {
                    400 => ClientErrorKind::BadRequest,
                    401 => ClientErrorKind::Unauthorized,
                    403 => ClientErrorKind::Forbidden,
                    404 => ClientErrorKind::NotFound,
                    _ => ClientErrorKind::Other,
                };
                Some(ApiError::Client { status, kind })
            }
        }
    }

    /// Passes a 2xx response through and turns anything else into an error.
    pub fn check_response(response: HttpResponse) -> Result<HttpResponse> {
        match Self::from_status(response.status) {
            None => Ok(response),
            Some(error) => Err(error),
        }
    }

    /// Checks the status, then decodes the JSON body. A body that does not
    /// match `T` is a [`ApiError::Decoding`] failure.
    pub fn decode_response<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
        let response = Self::check_response(response)?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Timeout(message) => ApiError::Timeout(message),
            BridgeError::Connectivity(message) => ApiError::Connectivity(message),
            other => ApiError::Connectivity(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::Decoding(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_table() {
        assert!(ApiError::Connectivity("dns".into()).is_retryable());
        assert!(ApiError::Timeout("30s".into()).is_retryable());
        assert!(ApiError::Server { status: 503 }.is_retryable());

        assert!(!ApiError::Client {
            status: 404,
            kind: ClientErrorKind::NotFound
        }
        .is_retryable());
        assert!(!ApiError::Decoding("eof".into()).is_retryable());
        assert!(!ApiError::InvalidState("no id".into()).is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert_eq!(ApiError::from_status(204), None);
        assert_eq!(
            ApiError::from_status(500),
            Some(ApiError::Server { status: 500 })
        );
        assert_eq!(
            ApiError::from_status(401),
            Some(ApiError::Client {
                status: 401,
                kind: ClientErrorKind::Unauthorized
            })
        );
        assert_eq!(
            ApiError::from_status(409),
            Some(ApiError::Client {
                status: 409,
                kind: ClientErrorKind::Other
            })
        );
    }

    #[test]
    fn test_check_response() {
        assert!(ApiError::check_response(HttpResponse::new(200, "ok")).is_ok());
        let err = ApiError::check_response(HttpResponse::new(403, "")).unwrap_err();
        assert_eq!(
            err,
            ApiError::Client {
                status: 403,
                kind: ClientErrorKind::Forbidden
            }
        );
    }

    #[test]
    fn test_decode_response() {
        let ids: Vec<i64> = ApiError::decode_response(HttpResponse::new(200, "[4,2]")).unwrap();
        assert_eq!(ids, vec![4, 2]);

        let err = ApiError::decode_response::<Vec<i64>>(HttpResponse::new(200, "{}")).unwrap_err();
        assert!(matches!(err, ApiError::Decoding(_)));

        let err = ApiError::decode_response::<Vec<i64>>(HttpResponse::new(502, "")).unwrap_err();
        assert_eq!(err, ApiError::Server { status: 502 });
    }

    #[test]
    fn test_bridge_error_mapping() {
        assert_eq!(
            ApiError::from(BridgeError::Timeout("slow".into())),
            ApiError::Timeout("slow".into())
        );
        assert!(matches!(
            ApiError::from(BridgeError::OperationFailed("tls".into())),
            ApiError::Connectivity(_)
        ));
    }

    #[test]
    fn test_decoding_from_serde() {
        let err = serde_json::from_str::<Vec<i32>>("{").unwrap_err();
        assert!(matches!(ApiError::from(err), ApiError::Decoding(_)));
    }
}
