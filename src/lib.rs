//! Rust client library for the platform broker REST API.
//!
//! Public API layers:
//! - [`Client`]: session facade. Negotiates the API version, authenticates,
//!   retries and caches the top-level collections.
//! - [`Decoded`] and the resource types ([`Domain`], [`Application`], ...):
//!   typed views of response envelopes. Follow-up operations are invoked
//!   through the links each resource carries.
//! - [`BrokerError`]: unified error type with stable process exit codes.
//! - [`Transport`] and [`Authenticator`]: seams for replacing the HTTP layer
//!   and the credential strategy.

mod api;
mod auth;
mod classify;
mod client;
mod dispatch;
mod envelope;
mod error;
mod resource;
mod transport;

#[cfg(test)]
mod testing;

/// API document, links and version negotiation.
pub use api::{Api, ApiVersion, CLIENT_API_VERSIONS, Link, LinkParam, Links, negotiate};
/// Credential strategies and operator input.
pub use auth::{
    Authenticator, BasicAuth, NonInteractive, Prompter, SESSION_COOKIE, TerminalPrompter,
    TokenAuth,
};
/// Session facade and its builders.
pub use client::{CartridgeQuery, Client, ClientOptions, ClientRef, RequestOptions, user_agent};
/// Typed response dispatch.
pub use dispatch::{Decoded, decode, known_kinds};
/// Response envelope.
pub use envelope::{Envelope, Message};
/// Error type returned by all client operations.
pub use error::{BrokerError, FieldError};
/// Resource model.
pub use resource::{
    Application, ApplicationOptions, Authorization, Cartridge, CartridgeType, Domain, Gear,
    GearGroup, Identity, Key, Member, Resource, ResourceBase, Role, Scaling, User,
};
/// HTTP transport.
pub use transport::{
    BasicCredentials, CertificateFailure, DEFAULT_TIMEOUT, HttpTransport, RawResponse, Request,
    SslVerify, Transport, TransportConfig, TransportError,
};
