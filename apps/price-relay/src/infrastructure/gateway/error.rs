//! Gateway error taxonomy and its HTTP mapping.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::ports::FetchError;
use crate::domain::pricing::SymbolError;
use crate::infrastructure::metrics::GatewayOutcome;

/// Every way a `GET /prices` request can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// `symbols` missing or empty after parsing.
    #[error("symbols parameter required")]
    MissingParameter,

    /// A symbol failed validation.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The query string could not be decoded.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The upstream did not answer before the timeout.
    #[error("backend timed out after {after_ms}ms")]
    BackendTimeout {
        /// Timeout that elapsed.
        after_ms: u64,
    },

    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}")]
    UpstreamError {
        /// Upstream HTTP status, forwarded to the caller.
        status: u16,
    },

    /// Transport, decoding or other unexpected failure.
    #[error("{0}")]
    Unexpected(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl GatewayError {
    /// HTTP status returned to the caller.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter | Self::InvalidSymbol(_) | Self::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamError { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metrics label for this failure.
    #[must_use]
    pub const fn outcome(&self) -> GatewayOutcome {
        match self {
            Self::MissingParameter => GatewayOutcome::MissingParameter,
            Self::InvalidSymbol(_) => GatewayOutcome::InvalidSymbol,
            Self::InvalidQuery(_) => GatewayOutcome::InvalidQuery,
            Self::BackendTimeout { .. } => GatewayOutcome::Timeout,
            Self::UpstreamError { .. } => GatewayOutcome::UpstreamError,
            Self::Unexpected(_) => GatewayOutcome::Unexpected,
        }
    }

    /// Whether the failure points at the upstream rather than the caller.
    #[must_use]
    pub const fn is_upstream_failure(&self) -> bool {
        !matches!(
            self,
            Self::MissingParameter | Self::InvalidSymbol(_) | Self::InvalidQuery(_)
        )
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::MissingParameter => ErrorBody {
                error: "symbols parameter required",
                message: None,
            },
            Self::InvalidSymbol(_) => ErrorBody {
                error: "invalid symbol",
                message: Some(self.to_string()),
            },
            Self::InvalidQuery(message) => ErrorBody {
                error: "invalid query",
                message: Some(message.clone()),
            },
            Self::BackendTimeout { .. } | Self::UpstreamError { .. } => ErrorBody {
                error: "Backend error",
                message: Some(self.to_string()),
            },
            Self::Unexpected(message) => ErrorBody {
                error: "Failed to fetch prices",
                message: Some(message.clone()),
            },
        }
    }
}

impl From<SymbolError> for GatewayError {
    fn from(error: SymbolError) -> Self {
        match error {
            SymbolError::Empty => Self::MissingParameter,
            SymbolError::Invalid(symbol) => Self::InvalidSymbol(symbol),
        }
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidQuery(rejection.body_text())
    }
}

impl From<FetchError> for GatewayError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Timeout { after_ms } => Self::BackendTimeout { after_ms },
            FetchError::Upstream { status } => Self::UpstreamError { status },
            other @ (FetchError::Transport { .. }
            | FetchError::Decode { .. }
            | FetchError::Function { .. }) => Self::Unexpected(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(GatewayError::MissingParameter, 400 ; "missing parameter")]
    #[test_case(GatewayError::InvalidSymbol("A B".into()), 400 ; "invalid symbol")]
    #[test_case(GatewayError::InvalidQuery("duplicate field".into()), 400 ; "invalid query")]
    #[test_case(GatewayError::BackendTimeout { after_ms: 8000 }, 504 ; "timeout")]
    #[test_case(GatewayError::UpstreamError { status: 503 }, 503 ; "forwarded 503")]
    #[test_case(GatewayError::UpstreamError { status: 404 }, 404 ; "forwarded 404")]
    #[test_case(GatewayError::UpstreamError { status: 1000 }, 502 ; "unrepresentable status")]
    #[test_case(GatewayError::Unexpected("boom".into()), 500 ; "unexpected")]
    fn status_codes(error: GatewayError, expected: u16) {
        assert_eq!(error.status_code().as_u16(), expected);
    }

    #[test]
    fn missing_parameter_body_has_only_error() {
        let body = serde_json::to_value(GatewayError::MissingParameter.body()).unwrap();
        assert_eq!(body, serde_json::json!({"error": "symbols parameter required"}));
    }

    #[test]
    fn upstream_body_is_generic() {
        let body =
            serde_json::to_value(GatewayError::UpstreamError { status: 502 }.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "Backend error", "message": "upstream returned 502"})
        );
    }

    #[test]
    fn fetch_errors_map_onto_taxonomy() {
        assert_eq!(
            GatewayError::from(FetchError::Timeout { after_ms: 50 }),
            GatewayError::BackendTimeout { after_ms: 50 }
        );
        assert!(matches!(
            GatewayError::from(FetchError::Decode {
                message: "eof".into()
            }),
            GatewayError::Unexpected(_)
        ));
    }

    #[test]
    fn caller_errors_are_not_upstream_failures() {
        assert!(!GatewayError::MissingParameter.is_upstream_failure());
        assert!(!GatewayError::InvalidQuery("x".into()).is_upstream_failure());
        assert!(GatewayError::BackendTimeout { after_ms: 1 }.is_upstream_failure());
    }
}
