//! Typed snapshots of broker resources.
//!
//! Resources are built only by the response dispatcher. Each keeps a weak
//! handle to the [`Client`] that decoded it so follow-up calls reuse that
//! client's credentials; once the client is dropped those calls fail with
//! [`BrokerError::ClientClosed`].

mod application;
mod cartridge;
mod domain;
mod gear_group;
mod key;
mod user;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::Links;
use crate::client::ClientRef;
use crate::dispatch::Decoded;
use crate::{BrokerError, Client};

pub use application::{Application, ApplicationOptions};
pub use cartridge::{Cartridge, CartridgeType, Scaling};
pub use domain::{Domain, Member, Role};
pub use gear_group::{Gear, GearGroup};
pub use key::Key;
pub use user::{Authorization, Identity, User};

/// State every resource carries besides its typed fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceBase {
    #[serde(default)]
    links: Links,
    /// Attributes without a typed field.
    #[serde(flatten)]
    attributes: Map<String, Value>,
    #[serde(skip)]
    client: ClientRef,
}

/// Common capability of every decoded resource.
pub trait Resource {
    /// Identifier unique within the collection it was fetched in.
    fn id(&self) -> &str;

    /// Links, extra attributes and the owning client.
    fn base(&self) -> &ResourceBase;

    fn base_mut(&mut self) -> &mut ResourceBase;

    /// Untyped attribute by server name.
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.base().attributes.get(name)
    }

    /// All attributes without a typed field.
    fn attributes(&self) -> &Map<String, Value> {
        &self.base().attributes
    }

    /// Operations the server offers on this resource.
    fn links(&self) -> &Links {
        &self.base().links
    }

    /// Whether the named link is present.
    fn supports(&self, link: &str) -> bool {
        self.base().links.contains_key(link)
    }

    /// The client that decoded this resource.
    fn client(&self) -> Result<Client, BrokerError> {
        self.base().client.upgrade()
    }

    /// Calls one of this resource's links with the owning client.
    fn rest_method(&self, link: &str, params: &[(&str, Value)]) -> Result<Decoded, BrokerError> {
        self.client()?.rest_method(self.links(), link, params, false)
    }
}

pub(crate) fn bind<R: Resource>(resource: &mut R, client: &Client) {
    resource.base_mut().client = client.downgrade();
}
