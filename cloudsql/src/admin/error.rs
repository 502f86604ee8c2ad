//! Control-plane error surface and user-facing classification.

use serde::Deserialize;
use thiserror::Error;

use crate::instance::InstanceName;

const REASON_ACCESS_NOT_CONFIGURED: &str = "accessNotConfigured";
const REASON_NOT_AUTHORIZED: &str = "notAuthorized";

/// An error returned by an [`AdminApi`](super::AdminApi) implementation.
///
/// Cloneable so a single control-plane failure can be fanned out to every
/// caller blocked on the same refresh cycle.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The control plane rejected the request.
    #[error("control plane returned status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable reason from the error envelope, when present.
        reason: Option<String>,
        /// Human-readable message from the error envelope.
        message: String,
    },

    /// The request never produced a usable response (connect failure,
    /// timeout, interrupted body).
    #[error("control plane transport failure: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("malformed control plane response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Builds an [`ApiError::Api`] from an HTTP status and the control
    /// plane's JSON error envelope
    /// (`{"error":{"errors":[{"reason":...}],"message":...}}`).
    ///
    /// Implementations of [`AdminApi`](super::AdminApi) should route error
    /// responses through here so failures stay classifiable. Bodies that do
    /// not match the envelope produce an `Api` error with no reason.
    pub fn from_status_body(status: u16, body: &[u8]) -> Self {
        let envelope: ErrorEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(_) => {
                return ApiError::Api {
                    status,
                    reason: None,
                    message: String::from_utf8_lossy(body).into_owned(),
                }
            }
        };
        let reason = envelope
            .error
            .errors
            .into_iter()
            .find_map(|item| item.reason);
        ApiError::Api {
            status,
            reason,
            message: envelope.error.message,
        }
    }

    /// The machine-readable reason, if the control plane supplied one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ApiError::Api { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// Turns a control-plane error into an actionable, instance-tagged message.
///
/// Known reasons get remediation text; everything else keeps the underlying
/// cause behind the supplied fallback description.
pub(crate) fn describe_api_error(name: &InstanceName, err: &ApiError, fallback: &str) -> String {
    match err.reason() {
        Some(REASON_ACCESS_NOT_CONFIGURED) => format!(
            "[{name}] the Admin API is not enabled for project \"{project}\"; enable it in the \
             console: https://console.cloud.google.com/apis/api/sqladmin/overview?project={project}",
            project = name.project()
        ),
        Some(REASON_NOT_AUTHORIZED) => format!(
            "[{name}] the instance does not exist or the caller is not authorized to access it; \
             verify the instance connection name and the IAM permissions for project \"{}\"",
            name.project()
        ),
        _ => format!("[{name}] {fallback}: {err}"),
    }
}
