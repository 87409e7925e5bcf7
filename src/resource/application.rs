use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{Cartridge, GearGroup, Resource, ResourceBase};
use crate::BrokerError;

/// Options for [`super::Domain::add_application`].
#[derive(Clone, Debug, Default)]
pub struct ApplicationOptions {
    pub cartridges: Vec<String>,
    pub scale: Option<bool>,
    pub gear_profile: Option<String>,
    pub initial_git_url: Option<String>,
}

/// An application inside a domain.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Application {
    pub name: String,
    /// Server-assigned uuid.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub ssh_url: Option<String>,
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scalable: bool,
    #[serde(default)]
    pub gear_profile: Option<String>,
    #[serde(default)]
    aliases: Vec<Value>,
    #[serde(skip_deserializing, skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
    #[serde(flatten)]
    base: ResourceBase,
}

impl Resource for Application {
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

impl Application {
    /// Alias host names. Accepts both plain strings and `{"id": ...}` objects.
    pub fn aliases(&self) -> Vec<String> {
        self.aliases
            .iter()
            .filter_map(|alias| match alias {
                Value::String(name) => Some(name.clone()),
                Value::Object(fields) => fields.get("id").and_then(Value::as_str).map(str::to_owned),
                _ => None,
            })
            .collect()
    }

    /// `ssh://` connection string without the scheme, as shown to users.
    pub fn ssh_string(&self) -> Option<String> {
        let url = self.ssh_url.as_deref()?;
        Some(url.strip_prefix("ssh://").unwrap_or(url).trim_end_matches('/').to_owned())
    }

    /// Messages the server emitted while creating or changing this application.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub(crate) fn add_messages(&mut self, messages: impl IntoIterator<Item = String>) {
        self.messages.extend(messages);
    }

    /// Cartridges embedded in this application.
    pub fn cartridges(&self) -> Result<Vec<Cartridge>, BrokerError> {
        debug!(application = %self.name, "getting all cartridges");
        self.rest_method("LIST_CARTRIDGES", &[])?.into_cartridges()
    }

    /// Embeds the named cartridge.
    pub fn add_cartridge(&self, name: &str) -> Result<Cartridge, BrokerError> {
        debug!(application = %self.name, cartridge = name, "adding cartridge");
        self.rest_method("ADD_CARTRIDGE", &[("name", json!(name))])?
            .into_cartridge()
    }

    /// Gear groups with per-gear state.
    pub fn gear_groups(&self) -> Result<Vec<GearGroup>, BrokerError> {
        debug!(application = %self.name, "getting all gear groups");
        self.rest_method("GET_GEAR_GROUPS", &[])?.into_gear_groups()
    }

    /// Sends the `start` event.
    pub fn start(&self) -> Result<Application, BrokerError> {
        self.send_event("START", "start")
    }

    /// Sends `stop`, or `force-stop` through `FORCE_STOP` when `force` is set.
    pub fn stop(&self, force: bool) -> Result<Application, BrokerError> {
        if force {
            self.send_event("FORCE_STOP", "force-stop")
        } else {
            self.send_event("STOP", "stop")
        }
    }

    /// Sends the `restart` event.
    pub fn restart(&self) -> Result<Application, BrokerError> {
        self.send_event("RESTART", "restart")
    }

    /// Deletes the application.
    pub fn destroy(&self) -> Result<(), BrokerError> {
        debug!(application = %self.name, "deleting application");
        self.rest_method("DELETE", &[])?;
        Ok(())
    }

    fn send_event(&self, link: &str, event: &str) -> Result<Application, BrokerError> {
        debug!(application = %self.name, event, "sending application event");
        self.rest_method(link, &[("event", json!(event))])?
            .into_application()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::{Value, json};
    use test_case::test_case;
    use url::Url;

    use super::Application;
    use crate::testing::{END_POINT, ScriptedTransport, application_json, client_with, envelope};
    use crate::{Client, RequestOptions};

    fn fetch_application(transport: &ScriptedTransport) -> (Client, Application) {
        transport.respond(200, &envelope("application", application_json("web")));
        let client = client_with(transport);
        let url = Url::parse(&format!("{END_POINT}/domains/foo/applications/web")).expect("valid url");
        let application = client
            .request(&RequestOptions::new(Method::GET, url))
            .and_then(crate::Decoded::into_application)
            .expect("application fetched");
        (client, application)
    }

    fn events_url() -> String {
        format!("{END_POINT}/domains/foo/applications/web/events")
    }

    #[test]
    fn reads_aliases_in_both_server_shapes() {
        let application: Application = serde_json::from_value(json!({
            "name": "web",
            "aliases": ["www.example.com", { "id": "shop.example.com", "has_private_ssl_certificate": false }],
            "creation_time": "2013-02-01T12:30:00Z",
            "ssh_url": "ssh://5a1@web-foo.example.com"
        }))
        .expect("valid application");

        assert_eq!(application.aliases(), vec!["www.example.com", "shop.example.com"]);
        assert_eq!(
            application.ssh_string().as_deref(),
            Some("5a1@web-foo.example.com")
        );
        assert!(application.creation_time.is_some());
        assert!(application.messages().is_empty());
    }

    #[test_case(Application::start, "start" ; "start")]
    #[test_case(|app: &Application| app.stop(false), "stop" ; "stop")]
    #[test_case(|app: &Application| app.stop(true), "force-stop" ; "force stop")]
    #[test_case(Application::restart, "restart" ; "restart")]
    fn lifecycle_events_post_to_events_link(
        send: fn(&Application) -> Result<Application, crate::BrokerError>,
        event: &str,
    ) {
        let transport = ScriptedTransport::new();
        let (_client, application) = fetch_application(&transport);
        transport.respond(200, &envelope("application", application_json("web")));

        let updated = send(&application).expect("event accepted");
        assert_eq!(updated.name, "web");
        let sent = transport.requests().pop().expect("request sent");
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.url.as_str(), events_url());
        assert_eq!(sent.body, Some(json!({ "event": event })));
    }

    #[test]
    fn destroy_sends_delete() {
        let transport = ScriptedTransport::new();
        let (_client, application) = fetch_application(&transport);
        transport.respond(204, &Value::Null);

        application.destroy().expect("application deleted");
        let sent = transport.requests().pop().expect("request sent");
        assert_eq!(sent.method, Method::DELETE);
        assert_eq!(
            sent.url.as_str(),
            format!("{END_POINT}/domains/foo/applications/web")
        );
        assert!(sent.query.is_empty());
    }

    #[test]
    fn add_cartridge_posts_name() {
        let transport = ScriptedTransport::new();
        let (_client, application) = fetch_application(&transport);
        transport.respond(201, &envelope("cartridge", json!({ "name": "mysql-5.1", "type": "embedded" })));

        let cartridge = application.add_cartridge("mysql-5.1").expect("cartridge added");
        assert_eq!(cartridge.name, "mysql-5.1");
        let sent = transport.requests().pop().expect("request sent");
        assert_eq!(sent.method, Method::POST);
        assert!(sent.url.as_str().ends_with("/applications/web/cartridges"));
        assert_eq!(sent.body, Some(json!({ "name": "mysql-5.1" })));
    }

    #[test]
    fn lists_cartridges_and_gear_groups() {
        let transport = ScriptedTransport::new();
        let (_client, application) = fetch_application(&transport);
        transport
            .respond(200, &envelope("cartridges", json!([{ "name": "ruby-1.9" }, { "name": "mysql-5.1" }])))
            .respond(
                200,
                &envelope("gear_groups", json!([{ "id": "g1", "gears": [{ "id": "gear-1", "state": "idle" }] }])),
            );

        let names: Vec<_> = application
            .cartridges()
            .expect("cartridges listed")
            .into_iter()
            .map(|cartridge| cartridge.name)
            .collect();
        assert_eq!(names, ["ruby-1.9", "mysql-5.1"]);

        let groups = application.gear_groups().expect("gear groups listed");
        assert_eq!(groups[0].gears[0].state.as_deref(), Some("idle"));

        let urls: Vec<_> = transport
            .requests()
            .iter()
            .skip(1)
            .map(|request| (request.method.clone(), request.url.path().to_owned()))
            .collect();
        assert_eq!(
            urls,
            [
                (Method::GET, "/broker/rest/api/domains/foo/applications/web/cartridges".to_owned()),
                (Method::GET, "/broker/rest/api/domains/foo/applications/web/gear_groups".to_owned()),
            ]
        );
    }

    #[test]
    fn missing_link_fails_without_a_request() {
        let transport = ScriptedTransport::new();
        transport.respond(200, &envelope("application", json!({ "name": "web" })));
        let client = client_with(&transport);
        let url = Url::parse(&format!("{END_POINT}/domains/foo/applications/web")).expect("valid url");
        let application = client
            .request(&RequestOptions::new(Method::GET, url))
            .and_then(crate::Decoded::into_application)
            .expect("application fetched");

        assert!(matches!(
            application.start(),
            Err(crate::BrokerError::UnsupportedOperation(ref link)) if link == "START"
        ));
        assert_eq!(transport.request_count(), 1);
    }
}
