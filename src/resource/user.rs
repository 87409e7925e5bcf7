use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{Key, Resource, ResourceBase, bind};
use crate::BrokerError;

/// The authenticated account.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub max_gears: Option<i64>,
    #[serde(default)]
    pub consumed_gears: Option<i64>,
    #[serde(default)]
    identities: Vec<Identity>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for User {
    fn id(&self) -> &str {
        &self.login
    }

    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }
}

impl User {
    /// SSH keys registered to this user.
    pub fn keys(&self) -> Result<Vec<Key>, BrokerError> {
        debug!(login = %self.login, "getting all keys");
        self.rest_method("LIST_KEYS", &[])?.into_keys()
    }

    /// Registers a public key under `name`.
    pub fn add_key(&self, name: &str, content: &str, kind: &str) -> Result<Key, BrokerError> {
        debug!(login = %self.login, key = name, kind, "adding key");
        self.rest_method(
            "ADD_KEY",
            &[
                ("name", json!(name)),
                ("type", json!(kind)),
                ("content", json!(content)),
            ],
        )?
        .into_key()
    }

    /// Key with the exact name, if registered.
    pub fn find_key(&self, name: &str) -> Result<Option<Key>, BrokerError> {
        Ok(self.keys()?.into_iter().find(|key| key.name == name))
    }

    /// Creates a scoped access token. `expires_in` is in seconds.
    pub fn add_authorization(
        &self,
        scopes: &str,
        expires_in: Option<u64>,
        note: Option<&str>,
    ) -> Result<Authorization, BrokerError> {
        debug!(login = %self.login, scopes, ?expires_in, "adding authorization");
        self.rest_method(
            "ADD_AUTHORIZATION",
            &[
                ("scopes", json!(scopes)),
                ("note", json!(note)),
                ("expires_in", json!(expires_in)),
            ],
        )?
        .into_authorization()
    }

    /// Tokens issued to this user.
    pub fn authorizations(&self) -> Result<Vec<Authorization>, BrokerError> {
        self.rest_method("LIST_AUTHORIZATIONS", &[])?.into_authorizations()
    }

    /// Federated logins linked to this user.
    ///
    /// Servers that predate identities yield a single identity whose uid is the login.
    pub fn identities(&self) -> Vec<Identity> {
        if !self.identities.is_empty() {
            return self.identities.clone();
        }
        let mut identity = Identity {
            uid: self.login.clone(),
            provider: None,
            created_at: None,
            base: ResourceBase::default(),
        };
        if let Ok(client) = self.client() {
            bind(&mut identity, &client);
        }
        vec![identity]
    }

    pub(crate) fn bind_identities(&mut self, client: &crate::Client) {
        for identity in &mut self.identities {
            bind(identity, client);
        }
    }
}

/// A federated login linked to a [`User`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Identity {
    fn id(&self) -> &str {
        &self.uid
    }

    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }
}

/// A scoped token issued to the user, with optional expiry and note.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Authorization {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub scopes: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Authorization {
    fn id(&self) -> &str {
        &self.id
    }

    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }
}

impl Authorization {
    /// Scopes split on whitespace.
    pub fn scope_list(&self) -> Vec<&str> {
        self.scopes
            .as_deref()
            .map(|scopes| scopes.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Revokes the token.
    pub fn destroy(&self) -> Result<(), BrokerError> {
        debug!(authorization = %self.id, "deleting authorization");
        self.rest_method("DELETE", &[])?;
        Ok(())
    }
}
