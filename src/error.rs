use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

/// One field-level validation failure reported by the server.
///
/// Multiple server messages for the same field are joined into a single
/// `FieldError` before they reach the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Offending request field, or `None` for messages not tied to a field.
    pub field: Option<String>,
    /// Human-readable explanation.
    pub message: String,
    /// Exit code supplied by the server, if any.
    pub exit_code: Option<i32>,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors returned by broker client operations.
///
/// Every variant carries the message shown to the operator and maps to a
/// stable process exit code through [`BrokerError::exit_code`]. Scripts check
/// these codes, so they must never be renumbered.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport gave up waiting for the server.
    #[error("{0}")]
    OperationTimedOut(String),

    /// The server closed the connection mid-request.
    #[error("{0}")]
    ConnectionInterrupted(String),

    /// Bad gateway on a non-idempotent request, or on a `GET` that was already retried.
    #[error("{0}")]
    ConnectionUnstable(String),

    /// The server certificate was issued by an authority we do not trust.
    #[error("{message}")]
    CertificateChainUntrusted { message: String, reason: String },

    /// The server certificate failed verification for another reason.
    #[error("{message}")]
    CertificateVerificationFailed { message: String, reason: String },

    /// The TLS handshake was refused because of the protocol version.
    #[error("{message}")]
    ProtocolVersionRejected { message: String, reason: String },

    /// DNS lookup or socket connect failed.
    #[error("{0}")]
    HostUnreachable(String),

    /// Unexpected transport failure; the original cause is preserved.
    #[error("{message}")]
    ResourceAccessFailed {
        message: String,
        #[source]
        source: TransportError,
    },

    /// HTTP 401.
    #[error("{0}")]
    NotAuthenticated(String),

    /// HTTP 403.
    #[error("{0}")]
    RequestDenied(String),

    /// HTTP 404.
    #[error("{0}")]
    ResourceNotFound(String),

    /// HTTP 409.
    #[error("{message}")]
    ValidationConflict {
        message: String,
        field: Option<String>,
        exit_code: Option<i32>,
    },

    /// HTTP 422, with messages coalesced per field.
    #[error("{}", join_field_errors(.errors))]
    ValidationFailed { errors: Vec<FieldError> },

    /// HTTP 400.
    #[error("{0}")]
    ClientRequestError(String),

    /// HTTP 500.
    #[error("{message}")]
    ServerError {
        message: String,
        exit_code: Option<i32>,
    },

    /// HTTP 503.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Any status code without a dedicated mapping.
    #[error("{}", unexpected_status_message(.status, .message.as_deref()))]
    UnexpectedServerError {
        status: u16,
        message: Option<String>,
    },

    /// The server answered with something that is not a valid response envelope.
    #[error("{0}")]
    GenericServerError(String),

    /// No domain in the fetched collection has the requested id.
    #[error("{0}")]
    DomainNotFound(String),

    /// No application in the domain has the requested name.
    #[error("{0}")]
    ApplicationNotFound(String),

    /// No cartridge matches the requested name, pattern, or type.
    #[error("{0}")]
    CartridgeNotFound(String),

    /// The user has no key with the requested name.
    #[error("{0}")]
    KeyNotFound(String),

    /// End point or link URL is not valid.
    #[error("invalid end point '{0}'")]
    InvalidEndpoint(String),

    /// The server API document does not advertise the requested operation.
    #[error("the server does not support the '{0}' operation")]
    UnsupportedOperation(String),

    /// A parameter the operation requires was not provided.
    #[error("missing required parameter '{parameter}' for operation '{operation}'")]
    MissingParameter { operation: String, parameter: String },

    /// Credentials were needed but could not be read interactively.
    #[error("unable to read credentials: {0}")]
    PromptFailed(#[from] std::io::Error),

    /// A resource was used after the client that fetched it was dropped.
    #[error("the client that produced this resource has been closed")]
    ClientClosed,

    /// Client options could not be turned into a working transport.
    #[error("invalid client configuration: {0}")]
    InvalidConfiguration(String),
}

impl BrokerError {
    /// Process exit status for this error.
    ///
    /// Validation and server errors prefer the code supplied by the server.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ApplicationNotFound(_) => 101,
            Self::KeyNotFound(_) => 118,
            Self::DomainNotFound(_) => 127,
            Self::GenericServerError(_) => 129,
            Self::OperationTimedOut(_) => 140,
            Self::ConnectionInterrupted(_) => 141,
            Self::ConnectionUnstable(_) => 142,
            Self::CertificateChainUntrusted { .. } => 143,
            Self::CertificateVerificationFailed { .. } => 144,
            Self::ProtocolVersionRejected { .. } => 145,
            Self::HostUnreachable(_) => 146,
            Self::ResourceAccessFailed { .. } => 147,
            Self::CartridgeNotFound(_) => 154,
            Self::NotAuthenticated(_) => 160,
            Self::RequestDenied(_) => 161,
            Self::ResourceNotFound(_) => 162,
            Self::ValidationConflict { exit_code, .. } => exit_code.unwrap_or(163),
            Self::ValidationFailed { errors } => errors
                .iter()
                .find_map(|error| error.exit_code)
                .unwrap_or(164),
            Self::ClientRequestError(_) => 165,
            Self::ServerError { exit_code, .. } => exit_code.unwrap_or(166),
            Self::ServiceUnavailable(_) => 167,
            Self::UnexpectedServerError { .. } => 168,
            Self::InvalidEndpoint(_) => 170,
            Self::UnsupportedOperation(_) => 171,
            Self::MissingParameter { .. } => 172,
            Self::PromptFailed(_) => 173,
            Self::ClientClosed => 174,
            Self::InvalidConfiguration(_) => 175,
        }
    }

    /// Offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationConflict { field, .. } => field.as_deref(),
            Self::ValidationFailed { errors } => {
                errors.iter().find_map(|error| error.field.as_deref())
            }
            _ => None,
        }
    }

    /// Returns `true` for client-side lookups that found nothing in a fetched collection.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::DomainNotFound(_)
                | Self::ApplicationNotFound(_)
                | Self::CartridgeNotFound(_)
                | Self::KeyNotFound(_)
        )
    }
}

fn unexpected_status_message(status: &u16, message: Option<&str>) -> String {
    message.map_or_else(
        || format!("Server returned an unexpected error code: {status}"),
        str::to_owned,
    )
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
