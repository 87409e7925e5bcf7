//! In-memory stand-ins for the network and the operator, used by unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};

use crate::auth::Prompter;
use crate::transport::{RawResponse, Request, Transport, TransportError};
use crate::{Client, ClientOptions};

pub const END_POINT: &str = "https://broker.example.com/broker/rest/api";

/// Replays canned outcomes in order and records every request it sees.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    outcomes: Rc<RefCell<VecDeque<Result<RawResponse, TransportError>>>>,
    requests: Rc<RefCell<Vec<Request>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<RawResponse, TransportError>) -> &Self {
        self.outcomes.borrow_mut().push_back(outcome);
        self
    }

    pub fn respond(&self, status: u16, body: &Value) -> &Self {
        self.push(Ok(json_response(status, body)))
    }

    pub fn fail(&self, error: TransportError) -> &Self {
        self.push(Err(error))
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes.borrow().len()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &Request) -> Result<RawResponse, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {} {}", request.method, request.url))
    }
}

/// Answers prompts from a fixed list and remembers what was asked.
#[derive(Clone, Default)]
pub struct ScriptedPrompter {
    answers: Rc<RefCell<VecDeque<String>>>,
    questions: Rc<RefCell<Vec<String>>>,
    secret_questions: Rc<RefCell<Vec<String>>>,
    warnings: Rc<RefCell<Vec<String>>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Rc::new(RefCell::new(
                answers.iter().map(|answer| (*answer).to_owned()).collect(),
            )),
            ..Self::default()
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }

    /// Prompts that went through [`Prompter::ask_secret`].
    pub fn secret_questions(&self) -> Vec<String> {
        self.secret_questions.borrow().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    fn next(&mut self, prompt: &str) -> io::Result<String> {
        self.questions.borrow_mut().push(prompt.to_owned());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer"))
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        self.next(prompt)
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
        self.secret_questions.borrow_mut().push(prompt.to_owned());
        self.next(prompt)
    }

    fn warn(&mut self, message: &str) {
        self.warnings.borrow_mut().push(message.to_owned());
    }
}

pub fn json_response(status: u16, body: &Value) -> RawResponse {
    RawResponse {
        status: StatusCode::from_u16(status).expect("valid status"),
        headers: HeaderMap::new(),
        body: if body.is_null() {
            String::new()
        } else {
            body.to_string()
        },
    }
}

pub fn text_response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status: StatusCode::from_u16(status).expect("valid status"),
        headers: HeaderMap::new(),
        body: body.to_owned(),
    }
}

pub fn link(method: &str, href: &str) -> Value {
    json!({
        "rel": href,
        "method": method,
        "href": format!("{END_POINT}/{href}"),
        "required_params": [],
        "optional_params": []
    })
}

pub fn link_with_params(method: &str, href: &str, required: &[&str]) -> Value {
    let mut value = link(method, href);
    value["required_params"] = required
        .iter()
        .map(|name| json!({ "name": name, "type": "string" }))
        .collect();
    value
}

/// API document advertising the top-level operations used across tests.
pub fn api_document() -> Value {
    json!({
        "type": "links",
        "api_version": 1.3,
        "supported_api_versions": [1.0, 1.1, 1.2, 1.3],
        "data": {
            "LIST_DOMAINS": link("GET", "domains"),
            "ADD_DOMAIN": link_with_params("POST", "domains", &["id"]),
            "LIST_CARTRIDGES": link("GET", "cartridges"),
            "GET_USER": link("GET", "user"),
        },
        "messages": []
    })
}

pub fn envelope(kind: &str, data: Value) -> Value {
    json!({ "type": kind, "data": data, "messages": [] })
}

pub fn domain_json(id: &str) -> Value {
    json!({
        "id": id,
        "owner": "alice",
        "members": [{ "id": "u1", "login": "alice", "role": "admin", "owner": true }],
        "links": {
            "LIST_APPLICATIONS": link("GET", &format!("domains/{id}/applications")),
            "ADD_APPLICATION": link_with_params("POST", &format!("domains/{id}/applications"), &["name"]),
            "UPDATE": link_with_params("PUT", &format!("domains/{id}"), &["id"]),
            "DELETE": link("DELETE", &format!("domains/{id}")),
            "UPDATE_MEMBERS": link("PATCH", &format!("domains/{id}/members")),
        }
    })
}

pub fn user_json() -> Value {
    json!({
        "login": "alice",
        "id": "u1",
        "links": {
            "LIST_KEYS": link("GET", "user/keys"),
            "ADD_KEY": link_with_params("POST", "user/keys", &["name", "type", "content"]),
            "LIST_AUTHORIZATIONS": link("GET", "user/authorizations"),
            "ADD_AUTHORIZATION": link("POST", "user/authorizations"),
        }
    })
}

pub fn key_json(name: &str) -> Value {
    json!({
        "name": name,
        "type": "ssh-rsa",
        "content": "AAAAB3Nza",
        "fingerprint": "0f:ce:86",
        "links": {
            "UPDATE": link("PUT", &format!("user/keys/{name}")),
            "DELETE": link("DELETE", &format!("user/keys/{name}")),
        }
    })
}

pub fn application_json(name: &str) -> Value {
    let base = format!("domains/foo/applications/{name}");
    json!({
        "name": name,
        "id": "5a1",
        "domain_id": "foo",
        "links": {
            "START": link_with_params("POST", &format!("{base}/events"), &["event"]),
            "STOP": link_with_params("POST", &format!("{base}/events"), &["event"]),
            "FORCE_STOP": link_with_params("POST", &format!("{base}/events"), &["event"]),
            "RESTART": link_with_params("POST", &format!("{base}/events"), &["event"]),
            "DELETE": link("DELETE", &base),
            "ADD_CARTRIDGE": link_with_params("POST", &format!("{base}/cartridges"), &["name"]),
            "LIST_CARTRIDGES": link("GET", &format!("{base}/cartridges")),
            "GET_GEAR_GROUPS": link("GET", &format!("{base}/gear_groups")),
        }
    })
}

pub fn authorization_json(id: &str) -> Value {
    json!({
        "id": id,
        "token": "t0k",
        "scopes": "session",
        "links": {
            "DELETE": link("DELETE", &format!("user/authorizations/{id}")),
        }
    })
}

/// Client wired to `transport`, with no authenticator.
pub fn client_with(transport: &ScriptedTransport) -> Client {
    Client::new(ClientOptions::new().url(END_POINT).transport(transport.clone()))
        .expect("client builds")
}
