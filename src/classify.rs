//! Maps transport failures and error responses onto [`BrokerError`].

use tracing::debug;

use crate::envelope::{Envelope, Message};
use crate::error::FieldError;
use crate::transport::{CertificateFailure, RawResponse, TransportError};
use crate::BrokerError;

const INSECURE_HINT: &str = "If your server is using a self-signed certificate, you may disable \
    certificate checks with the -k (or --insecure) option. Using this option means that your data \
    is potentially visible to third parties.";

/// Where a failed request was going, for use in messages.
#[derive(Clone, Copy, Debug)]
pub struct ErrorContext<'a> {
    pub url: &'a str,
    pub proxy: Option<&'a str>,
}

impl ErrorContext<'_> {
    fn check_server_hint(&self) -> String {
        match self.proxy {
            Some(proxy) => format!(
                " Check that you have correctly specified your proxy server '{proxy}' as well as \
                 your server '{}'.",
                self.url
            ),
            None => format!(
                " Check that you have correctly specified your server '{}'.",
                self.url
            ),
        }
    }
}

/// Message used when the server response cannot be understood at all.
pub fn generic_error_message(context: &ErrorContext<'_>) -> String {
    let hint = match context.proxy {
        Some(proxy) => format!(
            " Please verify that your proxy server is working correctly ({proxy}) and that you \
             can access the server {}",
            context.url
        ),
        None => format!(" Please verify that you can access the server {}", context.url),
    };
    format!(
        "The server did not respond correctly. This may be an issue with the server \
         configuration or with your connection to the server (such as a Web proxy or \
         firewall).{hint}"
    )
}

/// Classifies a failure that happened before any usable HTTP response.
pub fn classify_transport(error: TransportError, context: &ErrorContext<'_>) -> BrokerError {
    match error {
        TransportError::TimedOut => BrokerError::OperationTimedOut(
            "Connection to server timed out. It is possible the operation finished without \
             being able to report success. Use 'broker-cli domain <id>' or 'broker-cli apps \
             <domain>' to see the status of your applications."
                .to_owned(),
        ),
        TransportError::ConnectionInterrupted(reason) => BrokerError::ConnectionInterrupted(
            format!("Connection to server got interrupted: {reason}"),
        ),
        TransportError::BadGateway => BrokerError::ConnectionUnstable(unstable_message(
            "502 Bad Gateway",
            context,
        )),
        TransportError::CertificateUnverified {
            reason: CertificateFailure::UnknownIssuer,
            message,
        } => BrokerError::CertificateChainUntrusted {
            message: format!(
                "The server's certificate could not be verified, which means that a secure \
                 connection can't be established to the server '{}'.\n\nYou may need to specify \
                 your system CA certificate file with --ssl-ca-file=<path_to_file>. {INSECURE_HINT}",
                context.url
            ),
            reason: message,
        },
        TransportError::CertificateUnverified {
            reason: CertificateFailure::Other,
            message,
        } => BrokerError::CertificateVerificationFailed {
            message: format!(
                "The server's certificate could not be verified ({message}), which means that a \
                 secure connection can't be established to the server '{}'.\n\n{INSECURE_HINT}",
                context.url
            ),
            reason: message,
        },
        TransportError::ProtocolRejected(reason) => BrokerError::ProtocolVersionRejected {
            message: "The server has rejected your connection attempt because it does not \
                      support the requested SSL protocol version.\n\nCheck with the \
                      administrator for a valid SSL version to use."
                .to_owned(),
            reason,
        },
        TransportError::NameResolutionFailed(reason) => BrokerError::HostUnreachable(format!(
            "Unable to connect to the server ({reason}).{}",
            context.check_server_hint()
        )),
        other @ TransportError::Other { .. } => BrokerError::ResourceAccessFailed {
            message: format!("Failed to access resource: {other}"),
            source: other,
        },
    }
}

/// Classifies a non-success HTTP response.
///
/// Server messages with severity `ERROR` override the default text for each
/// status. A body that is not a valid envelope falls back to a generic
/// connectivity message where no status-specific default exists.
pub fn classify_response(response: &RawResponse, context: &ErrorContext<'_>) -> BrokerError {
    let (messages, envelope_invalid) = match Envelope::parse(&response.body) {
        Ok(envelope) => (envelope.messages, false),
        Err(error) => {
            debug!(%error, "response did not include a message from server");
            (Vec::new(), true)
        }
    };
    let first_error = messages.iter().find(|message| message.is_error());
    let error_text = first_error.map(|message| message.text().to_owned());
    let generic = || BrokerError::GenericServerError(generic_error_message(context));

    match response.status.as_u16() {
        401 => BrokerError::NotAuthenticated(
            error_text.unwrap_or_else(|| "Not authenticated".to_owned()),
        ),
        403 => BrokerError::RequestDenied(error_text.unwrap_or_else(|| "Forbidden".to_owned())),
        404 => BrokerError::ResourceNotFound(
            error_text.unwrap_or_else(|| generic_error_message(context)),
        ),
        409 => first_error.map_or_else(generic, |message| BrokerError::ValidationConflict {
            message: message.text().to_owned(),
            field: message.field.clone(),
            exit_code: message.exit_code,
        }),
        422 => {
            let errors = coalesce_by_field(&messages);
            if !errors.is_empty() {
                BrokerError::ValidationFailed { errors }
            } else if envelope_invalid {
                generic()
            } else {
                BrokerError::ValidationFailed {
                    errors: vec![FieldError {
                        field: None,
                        message: "Not valid".to_owned(),
                        exit_code: None,
                    }],
                }
            }
        }
        400 => error_text.map_or_else(generic, BrokerError::ClientRequestError),
        500 => first_error.map_or_else(generic, |message| BrokerError::ServerError {
            message: message.text().to_owned(),
            exit_code: message.exit_code,
        }),
        502 => BrokerError::ConnectionUnstable(
            error_text.unwrap_or_else(|| unstable_message("502 Bad Gateway", context)),
        ),
        503 => BrokerError::ServiceUnavailable(
            error_text.unwrap_or_else(|| generic_error_message(context)),
        ),
        status => BrokerError::UnexpectedServerError {
            status,
            message: error_text,
        },
    }
}

/// Joins validation messages per field, in order of first appearance.
///
/// Messages explicitly marked with a severity other than `ERROR` are skipped.
fn coalesce_by_field(messages: &[Message]) -> Vec<FieldError> {
    let mut errors: Vec<FieldError> = Vec::new();
    for message in messages
        .iter()
        .filter(|message| message.severity.is_none() || message.is_error())
    {
        match errors.iter_mut().find(|error| error.field == message.field) {
            Some(existing) => {
                existing.message.push(' ');
                existing.message.push_str(message.text());
                if existing.exit_code.is_none() {
                    existing.exit_code = message.exit_code;
                }
            }
            None => errors.push(FieldError {
                field: message.field.clone(),
                message: message.text().to_owned(),
                exit_code: message.exit_code,
            }),
        }
    }
    errors
}

fn unstable_message(reason: &str, context: &ErrorContext<'_>) -> String {
    format!(
        "An error occurred while communicating with the server ({reason}). This problem may only \
         be temporary.{}",
        context.check_server_hint()
    )
}
