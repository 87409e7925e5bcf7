use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::Method;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::{BrokerError, Client, RequestOptions};

/// API versions this client understands, oldest first.
///
/// Negotiation picks the last entry the server also supports.
pub const CLIENT_API_VERSIONS: &[ApiVersion] = &[
    ApiVersion::new(1, 1),
    ApiVersion::new(1, 2),
    ApiVersion::new(1, 3),
];

/// A `major.minor` broker API version.
///
/// The server sends these as JSON numbers (`1.3`) or strings (`"1.3"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    /// Version `major.minor`.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let invalid = || format!("invalid API version '{text}'");
        let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(number) => number.to_string().parse().map_err(D::Error::custom),
            Value::String(text) => text.parse().map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "expected an API version, found {other}"
            ))),
        }
    }
}

impl Serialize for ApiVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One parameter declared by a [`Link`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LinkParam {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// An operation advertised by the server: method, absolute href, and parameters.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Link {
    #[serde(default)]
    pub rel: Option<String>,
    pub method: String,
    pub href: String,
    #[serde(default)]
    pub required_params: Vec<LinkParam>,
    #[serde(default)]
    pub optional_params: Vec<LinkParam>,
}

impl Link {
    pub(crate) fn http_method(&self, name: &str) -> Result<Method, BrokerError> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| BrokerError::UnsupportedOperation(name.to_owned()))
    }

    /// Fails with [`BrokerError::MissingParameter`] for the first required
    /// parameter absent from `params` or given as `null`.
    pub(crate) fn check_required(
        &self,
        name: &str,
        params: &[(&str, Value)],
    ) -> Result<(), BrokerError> {
        for required in &self.required_params {
            let present = params
                .iter()
                .any(|(key, value)| *key == required.name && !value.is_null());
            if !present {
                return Err(BrokerError::MissingParameter {
                    operation: name.to_owned(),
                    parameter: required.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Operation name (`LIST_DOMAINS`, `ADD_KEY`, ...) to [`Link`].
pub type Links = BTreeMap<String, Link>;

pub(crate) fn find_link<'a>(links: &'a Links, name: &str) -> Result<&'a Link, BrokerError> {
    links
        .get(name)
        .ok_or_else(|| BrokerError::UnsupportedOperation(name.to_owned()))
}

/// Picks the last version in `preferred` that the server supports.
pub fn negotiate(preferred: &[ApiVersion], supported: &[ApiVersion]) -> Option<ApiVersion> {
    preferred
        .iter()
        .rev()
        .find(|version| supported.contains(version))
        .copied()
}

/// The server API document after version negotiation.
#[derive(Clone, Debug)]
pub struct Api {
    links: Links,
    client_versions: Vec<ApiVersion>,
    server_versions: Vec<ApiVersion>,
    current: Option<ApiVersion>,
    negotiated: Option<ApiVersion>,
}

impl Api {
    /// Fetches the API document from the client end point and negotiates a version.
    ///
    /// When the negotiated version is not the server's current one, the
    /// document is fetched again at that version so link hrefs match it.
    pub(crate) fn fetch(client: &Client, preferred: &[ApiVersion]) -> Result<Self, BrokerError> {
        debug!(versions = %join_versions(preferred), "client supports API versions");
        let mut document = fetch_document(client, None)?;
        debug!(
            versions = %join_versions(&document.server_versions),
            "server supports API versions"
        );

        let negotiated = negotiate(preferred, &document.server_versions);
        match negotiated {
            Some(version) if document.current != Some(version) => {
                debug!(%version, "client API version is not current, refetching API");
                document = fetch_document(client, Some(version))?;
            }
            Some(_) => {}
            None => warn!(
                "API version mismatch. This client supports {} but server at {} supports {}. \
                 The client version may be outdated; we will continue, but you may encounter \
                 problems.",
                join_versions(preferred),
                client.host(),
                join_versions(&document.server_versions)
            ),
        }

        Ok(Self {
            links: document.links,
            client_versions: preferred.to_vec(),
            server_versions: document.server_versions,
            current: document.current,
            negotiated,
        })
    }

    /// Top-level links advertised by the document.
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// The named link, or [`BrokerError::UnsupportedOperation`].
    pub fn link(&self, name: &str) -> Result<&Link, BrokerError> {
        find_link(&self.links, name)
    }

    /// Whether the server advertises the named link.
    pub fn supports(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    /// Highest version both sides support, if any.
    pub fn api_version_negotiated(&self) -> Option<ApiVersion> {
        self.negotiated
    }

    /// Versions listed in `supported_api_versions`.
    pub fn server_api_versions(&self) -> &[ApiVersion] {
        &self.server_versions
    }

    /// Versions this client was configured to accept.
    pub fn client_api_versions(&self) -> &[ApiVersion] {
        &self.client_versions
    }

    /// The server's default version, as reported by the document.
    pub fn current_api_version(&self) -> Option<ApiVersion> {
        self.current
    }
}

struct ApiDocument {
    links: Links,
    server_versions: Vec<ApiVersion>,
    current: Option<ApiVersion>,
}

fn fetch_document(client: &Client, version: Option<ApiVersion>) -> Result<ApiDocument, BrokerError> {
    let mut options = RequestOptions::new(Method::GET, client.url().clone()).lazy_auth(true);
    if let Some(version) = version {
        options = options.api_version(version);
    }
    let response = client.request_raw(&options)?;
    let invalid = || BrokerError::GenericServerError(client.generic_error_message(client.url().as_str()));

    let envelope = Envelope::parse(&response.body).map_err(|error| {
        debug!(%error, "API document is not a valid envelope");
        invalid()
    })?;
    let links: Links = serde_json::from_value(envelope.data).map_err(|error| {
        debug!(%error, "API document links could not be decoded");
        invalid()
    })?;

    Ok(ApiDocument {
        links,
        server_versions: envelope.supported_api_versions,
        current: envelope.api_version.or(envelope.version),
    })
}

fn join_versions(versions: &[ApiVersion]) -> String {
    versions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
