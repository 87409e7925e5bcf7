use serde::Serialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;

use crate::envelope::{Envelope, Message};
use crate::resource::{
    Application, Authorization, Cartridge, Domain, GearGroup, Key, Resource, User, bind,
};
use crate::transport::RawResponse;
use crate::{BrokerError, Client};

/// A decoded response body.
///
/// Serializes as the bare resource data; `NoContent` becomes `null`.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    /// `204 No Content` or an empty body.
    NoContent,
    Domains(Vec<Domain>),
    Domain(Domain),
    Applications(Vec<Application>),
    Application(Application),
    Cartridges(Vec<Cartridge>),
    Cartridge(Cartridge),
    User(User),
    Keys(Vec<Key>),
    Key(Key),
    GearGroups(Vec<GearGroup>),
    Authorizations(Vec<Authorization>),
    Authorization(Authorization),
    /// `data` of an envelope whose `type` this client does not know.
    Raw(Value),
}

type DecodeFn = fn(&Client, Value, &[Message]) -> Result<Decoded, serde_json::Error>;

/// Envelope `type` tag and the constructor for it.
struct Decoder {
    kind: &'static str,
    decode: DecodeFn,
}

// Tags missing from this table decode to `Decoded::Raw`.
static DECODERS: &[Decoder] = &[
    Decoder {
        kind: "domains",
        decode: |client, data, _| list::<Domain>(client, data).map(Decoded::Domains),
    },
    Decoder {
        kind: "domain",
        decode: |client, data, _| one::<Domain>(client, data).map(Decoded::Domain),
    },
    Decoder {
        kind: "applications",
        decode: |client, data, _| list::<Application>(client, data).map(Decoded::Applications),
    },
    Decoder {
        kind: "application",
        decode: |client, data, messages| {
            let mut application = one::<Application>(client, data)?;
            application.add_messages(
                messages
                    .iter()
                    .filter(|message| message.is_result())
                    .map(|message| message.text().to_owned()),
            );
            Ok(Decoded::Application(application))
        },
    },
    Decoder {
        kind: "cartridges",
        decode: |client, data, _| list::<Cartridge>(client, data).map(Decoded::Cartridges),
    },
    Decoder {
        kind: "cartridge",
        decode: |client, data, _| one::<Cartridge>(client, data).map(Decoded::Cartridge),
    },
    Decoder {
        kind: "user",
        decode: |client, data, _| {
            let mut user = one::<User>(client, data)?;
            user.bind_identities(client);
            Ok(Decoded::User(user))
        },
    },
    Decoder {
        kind: "keys",
        decode: |client, data, _| list::<Key>(client, data).map(Decoded::Keys),
    },
    Decoder {
        kind: "key",
        decode: |client, data, _| one::<Key>(client, data).map(Decoded::Key),
    },
    Decoder {
        kind: "gear_groups",
        decode: |client, data, _| list::<GearGroup>(client, data).map(Decoded::GearGroups),
    },
    Decoder {
        kind: "authorizations",
        decode: |client, data, _| {
            list::<Authorization>(client, data).map(Decoded::Authorizations)
        },
    },
    Decoder {
        kind: "authorization",
        decode: |client, data, _| one::<Authorization>(client, data).map(Decoded::Authorization),
    },
];

/// Envelope `type` tags with a typed decoder.
pub fn known_kinds() -> impl Iterator<Item = &'static str> {
    DECODERS.iter().map(|decoder| decoder.kind)
}

/// Decodes a successful response into typed resources owned by `client`.
pub fn decode(client: &Client, response: &RawResponse) -> Result<Decoded, serde_json::Error> {
    if response.is_empty() {
        return Ok(Decoded::NoContent);
    }

    let envelope = Envelope::parse(&response.body)?;
    let kind = envelope
        .kind
        .ok_or_else(|| serde_json::Error::missing_field("type"))?;

    match DECODERS.iter().find(|decoder| decoder.kind == kind) {
        Some(decoder) => (decoder.decode)(client, envelope.data, &envelope.messages),
        None => Ok(Decoded::Raw(envelope.data)),
    }
}

fn one<R>(client: &Client, data: Value) -> Result<R, serde_json::Error>
where
    R: Resource + DeserializeOwned,
{
    let mut resource: R = serde_json::from_value(data)?;
    bind(&mut resource, client);
    Ok(resource)
}

fn list<R>(client: &Client, data: Value) -> Result<Vec<R>, serde_json::Error>
where
    R: Resource + DeserializeOwned,
{
    let mut resources: Vec<R> = serde_json::from_value(data)?;
    for resource in &mut resources {
        bind(resource, client);
    }
    Ok(resources)
}

impl Decoded {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoContent => "no content",
            Self::Domains(_) => "domains",
            Self::Domain(_) => "domain",
            Self::Applications(_) => "applications",
            Self::Application(_) => "application",
            Self::Cartridges(_) => "cartridges",
            Self::Cartridge(_) => "cartridge",
            Self::User(_) => "user",
            Self::Keys(_) => "keys",
            Self::Key(_) => "key",
            Self::GearGroups(_) => "gear_groups",
            Self::Authorizations(_) => "authorizations",
            Self::Authorization(_) => "authorization",
            Self::Raw(_) => "raw data",
        }
    }

    fn mismatch(self, expected: &str) -> BrokerError {
        BrokerError::GenericServerError(format!(
            "The server returned {} where {expected} was expected.",
            self.kind()
        ))
    }

    /// The domain list. Any other variant is a [`BrokerError::GenericServerError`].
    pub fn into_domains(self) -> Result<Vec<Domain>, BrokerError> {
        match self {
            Self::Domains(domains) => Ok(domains),
            other => Err(other.mismatch("domains")),
        }
    }

    /// Unwraps a domain.
    pub fn into_domain(self) -> Result<Domain, BrokerError> {
        match self {
            Self::Domain(domain) => Ok(domain),
            other => Err(other.mismatch("a domain")),
        }
    }

    /// Unwraps applications.
    pub fn into_applications(self) -> Result<Vec<Application>, BrokerError> {
        match self {
            Self::Applications(applications) => Ok(applications),
            other => Err(other.mismatch("applications")),
        }
    }

    /// Unwraps an application.
    pub fn into_application(self) -> Result<Application, BrokerError> {
        match self {
            Self::Application(application) => Ok(application),
            other => Err(other.mismatch("an application")),
        }
    }

    /// Unwraps cartridges.
    pub fn into_cartridges(self) -> Result<Vec<Cartridge>, BrokerError> {
        match self {
            Self::Cartridges(cartridges) => Ok(cartridges),
            other => Err(other.mismatch("cartridges")),
        }
    }

    /// Unwraps a cartridge.
    pub fn into_cartridge(self) -> Result<Cartridge, BrokerError> {
        match self {
            Self::Cartridge(cartridge) => Ok(cartridge),
            other => Err(other.mismatch("a cartridge")),
        }
    }

    /// Unwraps the user.
    pub fn into_user(self) -> Result<User, BrokerError> {
        match self {
            Self::User(user) => Ok(user),
            other => Err(other.mismatch("a user")),
        }
    }

    /// Unwraps keys.
    pub fn into_keys(self) -> Result<Vec<Key>, BrokerError> {
        match self {
            Self::Keys(keys) => Ok(keys),
            other => Err(other.mismatch("keys")),
        }
    }

    /// Unwraps a key.
    pub fn into_key(self) -> Result<Key, BrokerError> {
        match self {
            Self::Key(key) => Ok(key),
            other => Err(other.mismatch("a key")),
        }
    }

    /// Unwraps gear groups.
    pub fn into_gear_groups(self) -> Result<Vec<GearGroup>, BrokerError> {
        match self {
            Self::GearGroups(groups) => Ok(groups),
            other => Err(other.mismatch("gear groups")),
        }
    }

    /// Unwraps authorizations.
    pub fn into_authorizations(self) -> Result<Vec<Authorization>, BrokerError> {
        match self {
            Self::Authorizations(authorizations) => Ok(authorizations),
            other => Err(other.mismatch("authorizations")),
        }
    }

    /// Unwraps an authorization.
    pub fn into_authorization(self) -> Result<Authorization, BrokerError> {
        match self {
            Self::Authorization(authorization) => Ok(authorization),
            other => Err(other.mismatch("an authorization")),
        }
    }

    /// Data of an envelope with an unknown `type`.
    pub fn into_raw(self) -> Result<Value, BrokerError> {
        match self {
            Self::Raw(value) => Ok(value),
            other => Err(other.mismatch("raw data")),
        }
    }
}
