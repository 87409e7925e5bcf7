use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Resource, ResourceBase};

/// One gear and its last reported state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Gear {
    pub id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
}

/// Gears that share the same set of cartridges.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GearGroup {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub gears: Vec<Gear>,
    #[serde(default)]
    cartridges: Vec<Value>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for GearGroup {
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

impl GearGroup {
    /// Names of the cartridges placed on this group's gears.
    pub fn cartridge_names(&self) -> Vec<&str> {
        self.cartridges
            .iter()
            .filter_map(|cartridge| cartridge.get("name").and_then(Value::as_str))
            .collect()
    }

    /// Gear ids paired with their state.
    pub fn gear_states(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.gears
            .iter()
            .map(|gear| (gear.id.as_str(), gear.state.as_deref()))
    }
}
