use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{Resource, ResourceBase};
use crate::BrokerError;

/// A public SSH key registered to a user.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Key {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Key {
    fn id(&self) -> &str {
        &self.name
    }

    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }
}

impl Key {
    /// Replaces the key type and content.
    pub fn update(&self, kind: &str, content: &str) -> Result<Key, BrokerError> {
        debug!(key = %self.name, kind, "updating key");
        self.rest_method("UPDATE", &[("type", json!(kind)), ("content", json!(content))])?
            .into_key()
    }

    /// Deletes the key on the server. This snapshot is stale afterwards.
    pub fn destroy(&self) -> Result<(), BrokerError> {
        debug!(key = %self.name, "deleting key");
        self.rest_method("DELETE", &[])?;
        Ok(())
    }
}
