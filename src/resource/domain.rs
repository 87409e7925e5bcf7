use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{Application, ApplicationOptions, Resource, ResourceBase};
use crate::BrokerError;

/// Access level granted to a domain member.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    View,
    Edit,
    Admin,
    /// Sent to the server to revoke membership.
    None,
}

/// One member grant of a domain.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub login: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub owner: bool,
}

impl Member {
    /// Whether the role is exactly `edit`.
    pub fn is_editor(&self) -> bool {
        self.role == Role::Edit
    }

    /// Whether the role is `admin`.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A namespace owning zero or more applications.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Domain {
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Domain {
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

impl Domain {
    /// Applications in this domain.
    pub fn applications(&self) -> Result<Vec<Application>, BrokerError> {
        debug!(domain = %self.id, "getting all applications");
        self.rest_method("LIST_APPLICATIONS", &[])?.into_applications()
    }

    /// Creates an application. Server messages about the creation are
    /// available through [`Application::messages`].
    pub fn add_application(
        &self,
        name: &str,
        options: &ApplicationOptions,
    ) -> Result<Application, BrokerError> {
        debug!(domain = %self.id, application = name, "adding application");
        let mut params: Vec<(&str, Value)> = vec![("name", json!(name))];
        if !options.cartridges.is_empty() {
            params.push(("cartridges", json!(options.cartridges)));
        }
        if let Some(scale) = options.scale {
            params.push(("scale", json!(scale)));
        }
        if let Some(profile) = &options.gear_profile {
            params.push(("gear_size", json!(profile)));
        }
        if let Some(url) = &options.initial_git_url {
            params.push(("initial_git_url", json!(url)));
        }
        self.rest_method("ADD_APPLICATION", &params)?.into_application()
    }

    /// Application matched case-insensitively by name, or [`BrokerError::ApplicationNotFound`].
    pub fn find_application(&self, name: &str) -> Result<Application, BrokerError> {
        debug!(domain = %self.id, application = name, "finding application");
        self.applications()?
            .into_iter()
            .find(|application| application.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                BrokerError::ApplicationNotFound(format!(
                    "Application {name} does not exist in domain {}",
                    self.id
                ))
            })
    }

    /// Renames the domain. The client's cached domain list is dropped.
    pub fn update(&self, new_id: &str) -> Result<Domain, BrokerError> {
        debug!(domain = %self.id, new_id, "updating domain");
        let client = self.client()?;
        client.invalidate_domains();
        client
            .rest_method(self.links(), "UPDATE", &[("id", json!(new_id))], false)?
            .into_domain()
    }

    /// Deletes the domain. The client's cached domain list is dropped.
    pub fn destroy(&self, force: bool) -> Result<(), BrokerError> {
        debug!(domain = %self.id, force, "deleting domain");
        let client = self.client()?;
        client.invalidate_domains();
        client.rest_method(self.links(), "DELETE", &[("force", json!(force))], false)?;
        Ok(())
    }

    /// Members as of the request that returned this domain.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Grants `role` to each login.
    pub fn add_members(&self, logins: &[&str], role: Role) -> Result<Vec<Member>, BrokerError> {
        self.update_members(logins, role)
    }

    /// Revokes membership for each login.
    pub fn remove_members(&self, logins: &[&str]) -> Result<Vec<Member>, BrokerError> {
        self.update_members(logins, Role::None)
    }

    fn update_members(&self, logins: &[&str], role: Role) -> Result<Vec<Member>, BrokerError> {
        debug!(domain = %self.id, count = logins.len(), ?role, "updating members");
        let members: Vec<Value> = logins
            .iter()
            .map(|login| json!({ "login": login, "role": role }))
            .collect();
        let client = self.client()?;
        client.invalidate_domains();
        let decoded = client.rest_method(
            self.links(),
            "UPDATE_MEMBERS",
            &[("members", Value::Array(members))],
            false,
        )?;
        let members = decoded.into_raw()?;
        serde_json::from_value(members).map_err(|error| {
            BrokerError::GenericServerError(format!("unexpected member list from server: {error}"))
        })
    }
}
