use serde::{Deserialize, Serialize};

use super::{Resource, ResourceBase};

/// Whether a cartridge runs on its own or inside another application.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CartridgeType {
    Standalone,
    Embedded,
    #[serde(other)]
    Other,
}

/// Current and allowed gear counts of a cartridge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scaling {
    pub current: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub gear_profile: Option<String>,
}

impl Scaling {
    /// A maximum of `-1` means unbounded.
    pub fn is_unbounded(&self) -> bool {
        self.max == Some(-1)
    }
}

/// A cartridge offered by the server or embedded in an application.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Cartridge {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<CartridgeType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    scales_from: Option<i64>,
    #[serde(default)]
    scales_to: Option<i64>,
    #[serde(default)]
    current_scale: Option<i64>,
    #[serde(default)]
    gear_profile: Option<String>,
    #[serde(default)]
    connection_info: Option<String>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Cartridge {
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

impl Cartridge {
    /// Display name, falling back to the name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether the cartridge can create an application on its own.
    pub fn is_standalone(&self) -> bool {
        self.kind == Some(CartridgeType::Standalone)
    }

    /// Gear counts reported for this cartridge.
    pub fn scaling(&self) -> Scaling {
        Scaling {
            current: self.current_scale,
            min: self.scales_from,
            max: self.scales_to,
            gear_profile: self.gear_profile.clone(),
        }
    }

    /// Whether the cartridge can run on more than one gear.
    pub fn is_scalable(&self) -> bool {
        self.scales_from != self.scales_to || self.scales_to == Some(-1)
    }

    /// Connection details the server reports for an embedded cartridge.
    pub fn connection_info(&self) -> Option<&str> {
        self.connection_info.as_deref()
    }
}
