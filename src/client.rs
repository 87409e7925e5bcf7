use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::api::{Api, ApiVersion, CLIENT_API_VERSIONS, Links, find_link};
use crate::auth::{Authenticator, BasicAuth, NonInteractive, TokenAuth};
use crate::classify::{ErrorContext, classify_response, classify_transport, generic_error_message};
use crate::dispatch::{Decoded, decode};
use crate::resource::{Application, Cartridge, CartridgeType, Domain, Key, User};
use crate::transport::{
    DEFAULT_TIMEOUT, HttpTransport, RawResponse, Request, SslVerify, Transport, TransportConfig,
    TransportError,
};
use crate::BrokerError;

/// A `GET` answered with bad gateway is sent at most this many times.
const MAX_GET_ATTEMPTS: u32 = 2;

/// User agent sent with every request.
pub fn user_agent() -> String {
    format!(
        "broker-client/{} (rust; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Construction options for [`Client`].
///
/// Values set here always win over the client's built-in defaults.
#[derive(Default)]
pub struct ClientOptions {
    url: Option<String>,
    server: Option<String>,
    user: Option<String>,
    password: Option<String>,
    token: Option<String>,
    auth: Option<Box<dyn Authenticator>>,
    headers: HeaderMap,
    debug: bool,
    preferred_api_versions: Option<Vec<ApiVersion>>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    verify_ssl: SslVerify,
    ssl_ca_file: Option<PathBuf>,
    proxy: Option<String>,
    transport: Option<Box<dyn Transport>>,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("server", &self.server)
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("debug", &self.debug)
            .field("timeout", &self.timeout)
            .field("verify_ssl", &self.verify_ssl)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    /// Empty options. A URL or server must be set before [`Client::new`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Full URL of the API document.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Host name; expands to `https://<server>/broker/rest/api`. Ignored when a URL is set.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Login for basic authentication. No prompting happens for a client
    /// built this way; use [`ClientOptions::auth`] for interactive login.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Password sent with [`ClientOptions::user`].
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Bearer token. Takes precedence over user and password.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Explicit authenticator. Takes precedence over `token` and `user`.
    #[must_use]
    pub fn auth(mut self, auth: impl Authenticator + 'static) -> Self {
        self.auth = Some(Box::new(auth));
        self
    }

    /// Extra default headers; these override the built-in ones.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Traces raw requests and responses (credentials excluded).
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Versions to negotiate from, in ascending order of preference.
    #[must_use]
    pub fn preferred_api_versions(mut self, versions: Vec<ApiVersion>) -> Self {
        self.preferred_api_versions = Some(versions);
        self
    }

    /// Overall request timeout. Defaults to eight seconds.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Connect timeout. The lesser of this and the overall timeout bounds each request.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Certificate verification policy.
    #[must_use]
    pub fn verify_ssl(mut self, verify: SslVerify) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// PEM file with an extra trusted CA.
    #[must_use]
    pub fn ssl_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca_file = Some(path.into());
        self
    }

    /// HTTP proxy. Also named in connectivity error messages.
    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Replaces the HTTP transport.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    fn end_point(&self) -> Result<Url, BrokerError> {
        let raw = match (&self.url, &self.server) {
            (Some(url), _) => url.clone(),
            (None, Some(server)) => format!("https://{server}/broker/rest/api"),
            (None, None) => {
                return Err(BrokerError::InvalidEndpoint(
                    "no server or URL configured".to_owned(),
                ));
            }
        };
        Url::parse(&raw).map_err(|_| BrokerError::InvalidEndpoint(raw))
    }

    /// Lesser of the connect and overall timeouts, or the default.
    fn effective_timeout(&self) -> Duration {
        match (self.connect_timeout, self.timeout) {
            (Some(connect), Some(overall)) => connect.min(overall),
            (Some(timeout), None) | (None, Some(timeout)) => timeout,
            (None, None) => DEFAULT_TIMEOUT,
        }
    }
}

/// Per-call request description, merged over the client defaults.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    method: Method,
    url: Url,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: HeaderMap,
    timeout: Option<Duration>,
    lazy_auth: bool,
    api_version: Option<ApiVersion>,
}

impl RequestOptions {
    /// Request for `method` on `url` with no query, body or extra headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            lazy_auth: false,
            api_version: None,
        }
    }

    /// Query pairs, replacing any set before.
    #[must_use]
    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// JSON request body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Header for this request only. Overrides the client default of the same name.
    #[must_use]
    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Timeout for this request only.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Lazy requests go out without prompting for missing credentials.
    #[must_use]
    pub fn lazy_auth(mut self, lazy: bool) -> Self {
        self.lazy_auth = lazy;
        self
    }

    /// Pins the `Accept` version instead of the negotiated one.
    #[must_use]
    pub fn api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self
    }
}

/// Filter for [`Client::find_cartridges`].
#[derive(Clone, Debug, Default)]
pub struct CartridgeQuery {
    pub name: Option<String>,
    pub regex: Option<Regex>,
    pub kind: Option<CartridgeType>,
}

impl CartridgeQuery {
    /// Matches one exact cartridge name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Matches cartridge names against `pattern`.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Some(Regex::new(pattern)?),
            ..Self::default()
        })
    }

    /// Keeps only cartridges of `kind`.
    #[must_use]
    pub fn of_kind(mut self, kind: CartridgeType) -> Self {
        self.kind = Some(kind);
        self
    }

    fn matches(&self, cartridge: &Cartridge) -> bool {
        let name_matches = match (&self.regex, &self.name) {
            (Some(regex), _) => regex.is_match(&cartridge.name),
            (None, Some(name)) => cartridge.name == *name,
            (None, None) => true,
        };
        name_matches && self.kind.is_none_or(|kind| cartridge.kind == Some(kind))
    }

    fn describe(&self) -> String {
        match (&self.regex, &self.name) {
            (Some(regex), _) => format!("matching /{}/", regex.as_str()),
            (None, Some(name)) => name.clone(),
            (None, None) => "of the requested type".to_owned(),
        }
    }
}

struct ClientState {
    end_point: Url,
    headers: HeaderMap,
    timeout: Duration,
    debug: bool,
    proxy: Option<String>,
    preferred_api_versions: Vec<ApiVersion>,
    transport: Box<dyn Transport>,
    auth: RefCell<Option<Box<dyn Authenticator>>>,
    api: RefCell<Option<Rc<Api>>>,
    domains: RefCell<Option<Vec<Domain>>>,
    cartridges: RefCell<Option<Vec<Cartridge>>>,
    user: RefCell<Option<User>>,
}

/// Facade over the broker REST API.
///
/// Cloning is cheap and yields a handle to the same session. Calls are
/// synchronous and strictly sequential; the client is not thread-safe.
/// The `domains`, `cartridges` and `user` collections are cached for the
/// lifetime of the client and dropped by any call that changes them.
#[derive(Clone)]
pub struct Client {
    state: Rc<ClientState>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("end_point", &self.state.end_point.as_str())
            .field("debug", &self.state.debug)
            .finish_non_exhaustive()
    }
}

/// Weak handle from a resource back to the client that decoded it.
#[derive(Clone, Debug, Default)]
pub struct ClientRef(Weak<ClientState>);

impl ClientRef {
    /// The client, or [`BrokerError::ClientClosed`] once it has been dropped.
    pub fn upgrade(&self) -> Result<Client, BrokerError> {
        self.0
            .upgrade()
            .map(|state| Client { state })
            .ok_or(BrokerError::ClientClosed)
    }
}

impl Client {
    /// Builds a client. No request is sent until the first call.
    pub fn new(options: ClientOptions) -> Result<Self, BrokerError> {
        let end_point = options.end_point()?;
        let timeout = options.effective_timeout();
        let host = end_point.host_str().unwrap_or_default().to_owned();

        let auth: Option<Box<dyn Authenticator>> = match (options.auth, options.token, options.user) {
            (Some(auth), _, _) => Some(auth),
            (None, Some(token), _) => Some(Box::new(TokenAuth::new(token))),
            (None, None, Some(user)) => Some(Box::new(
                BasicAuth::new(Some(user), options.password)
                    .with_server(host)
                    .with_prompter(NonInteractive),
            )),
            (None, None, None) => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let agent = user_agent();
        if let Ok(value) = HeaderValue::from_str(&agent) {
            headers.insert(header::USER_AGENT, value);
        }
        headers.extend(options.headers);

        let transport: Box<dyn Transport> = match options.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::new(&TransportConfig {
                user_agent: Some(agent),
                verify_ssl: options.verify_ssl,
                ssl_ca_file: options.ssl_ca_file,
                proxy: options.proxy.clone(),
                connect_timeout: options.connect_timeout,
            })?),
        };

        debug!(end_point = %end_point, "connecting");
        Ok(Self {
            state: Rc::new(ClientState {
                end_point,
                headers,
                timeout,
                debug: options.debug,
                proxy: options.proxy,
                preferred_api_versions: options
                    .preferred_api_versions
                    .unwrap_or_else(|| CLIENT_API_VERSIONS.to_vec()),
                transport,
                auth: RefCell::new(auth),
                api: RefCell::new(None),
                domains: RefCell::new(None),
                cartridges: RefCell::new(None),
                user: RefCell::new(None),
            }),
        })
    }

    /// End point URL of the API document.
    pub fn url(&self) -> &Url {
        &self.state.end_point
    }

    /// Host part of the end point.
    pub fn host(&self) -> &str {
        self.state.end_point.host_str().unwrap_or_default()
    }

    /// Whether raw requests and responses are traced.
    pub fn is_debug(&self) -> bool {
        self.state.debug
    }

    pub(crate) fn downgrade(&self) -> ClientRef {
        ClientRef(Rc::downgrade(&self.state))
    }

    pub(crate) fn generic_error_message(&self, url: &str) -> String {
        generic_error_message(&ErrorContext {
            url,
            proxy: self.state.proxy.as_deref(),
        })
    }

    /// Sends a request and decodes the response envelope.
    pub fn request(&self, options: &RequestOptions) -> Result<Decoded, BrokerError> {
        let response = self.request_raw(options)?;
        decode(self, &response).map_err(|error| {
            debug!(%error, url = %options.url, "response could not be decoded");
            BrokerError::GenericServerError(self.generic_error_message(options.url.as_str()))
        })
    }

    /// Sends a request with authentication and retry handling, returning the
    /// successful response undecoded.
    ///
    /// A `401` is retried once when the authenticator refreshes credentials.
    /// A bad gateway is retried once for `GET` only.
    pub fn request_raw(&self, options: &RequestOptions) -> Result<RawResponse, BrokerError> {
        let mut attempt = 0;
        let mut bad_gateways = 0;
        let mut auth_retried = false;

        loop {
            attempt += 1;
            let request = self.build_request(options)?;
            self.trace_request(&request, attempt);

            let context = ErrorContext {
                url: request.url.as_str(),
                proxy: self.state.proxy.as_deref(),
            };
            match self.state.transport.execute(&request) {
                Ok(response) => {
                    self.trace_response(&response);
                    if self.auth_wants_retry(&response, &mut auth_retried)? {
                        debug!(attempt, url = %request.url, "retrying with refreshed credentials");
                        continue;
                    }
                    if response.status.is_success() {
                        return Ok(response);
                    }
                    return Err(classify_response(&response, &context));
                }
                Err(TransportError::BadGateway)
                    if request.method == Method::GET && bad_gateways + 1 < MAX_GET_ATTEMPTS =>
                {
                    bad_gateways += 1;
                    debug!(attempt, url = %request.url, "received bad gateway from server, retrying GET");
                }
                Err(error) => {
                    debug!(attempt, url = %request.url, %error, "request failed");
                    return Err(classify_transport(error, &context));
                }
            }
        }
    }

    /// Merges per-call options over the client defaults and attaches credentials.
    fn build_request(&self, options: &RequestOptions) -> Result<Request, BrokerError> {
        let mut request = Request::new(options.method.clone(), options.url.clone());
        request.headers = self.state.headers.clone();

        let version = options.api_version.or_else(|| {
            self.state
                .api
                .borrow()
                .as_ref()
                .and_then(|api| api.api_version_negotiated())
        });
        if let Some(version) = version {
            let accept = format!("application/json; version={version}");
            if let Ok(value) = HeaderValue::from_str(&accept) {
                request.headers.insert(header::ACCEPT, value);
            }
        }

        for (name, value) in &options.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        request.query.clone_from(&options.query);
        request.body.clone_from(&options.body);
        request.timeout = options.timeout.unwrap_or(self.state.timeout);
        request.lazy_auth = options.lazy_auth;

        if let Some(auth) = self.state.auth.borrow_mut().as_mut() {
            auth.attach(&mut request)?;
        }
        Ok(request)
    }

    fn auth_wants_retry(
        &self,
        response: &RawResponse,
        auth_retried: &mut bool,
    ) -> Result<bool, BrokerError> {
        let mut auth = self.state.auth.borrow_mut();
        let Some(auth) = auth.as_mut() else {
            return Ok(false);
        };
        if response.status == StatusCode::UNAUTHORIZED && *auth_retried {
            return Ok(false);
        }
        let retry = auth.should_retry(response)?;
        if retry {
            *auth_retried = true;
        }
        Ok(retry)
    }

    fn trace_request(&self, request: &Request, attempt: u32) {
        if self.state.debug {
            debug!(
                attempt,
                method = %request.method,
                url = %request.url,
                headers = ?request.redacted_headers(),
                query = ?request.query,
                body = ?request.body,
                user = ?request.basic_auth.as_ref().map(|credentials| &credentials.username),
                "request"
            );
        }
    }

    fn trace_response(&self, response: &RawResponse) {
        if self.state.debug {
            debug!(
                status = %response.status,
                headers = ?response.redacted_headers(),
                body = %response.body,
                "response"
            );
        }
    }

    /// Resolves a link href against the end point.
    fn resolve(&self, href: &str) -> Result<Url, BrokerError> {
        self.state
            .end_point
            .join(href)
            .map_err(|_| BrokerError::InvalidEndpoint(href.to_owned()))
    }

    /// Calls the named link from `links`.
    ///
    /// `GET` and `DELETE` send `params` as query pairs; other methods send a
    /// JSON object body. `null` parameters are omitted.
    pub fn rest_method(
        &self,
        links: &Links,
        name: &str,
        params: &[(&str, Value)],
        lazy_auth: bool,
    ) -> Result<Decoded, BrokerError> {
        let link = find_link(links, name)?;
        link.check_required(name, params)?;
        let method = link.http_method(name)?;
        let url = self.resolve(&link.href)?;

        let present = params.iter().filter(|(_, value)| !value.is_null());
        let mut options = RequestOptions::new(method.clone(), url).lazy_auth(lazy_auth);
        if method == Method::GET || method == Method::DELETE {
            options = options.query(
                present
                    .map(|(key, value)| ((*key).to_owned(), query_value(value)))
                    .collect(),
            );
        } else {
            let body: serde_json::Map<String, Value> = present
                .map(|(key, value)| ((*key).to_owned(), value.clone()))
                .collect();
            options = options.body(Value::Object(body));
        }
        self.request(&options)
    }

    /// The negotiated API document, fetched on first use.
    pub fn api(&self) -> Result<Rc<Api>, BrokerError> {
        if let Some(api) = self.state.api.borrow().as_ref() {
            return Ok(Rc::clone(api));
        }
        let api = Rc::new(Api::fetch(self, &self.state.preferred_api_versions)?);
        *self.state.api.borrow_mut() = Some(Rc::clone(&api));
        Ok(api)
    }

    /// Negotiated version, fetching the API document if needed.
    pub fn api_version_negotiated(&self) -> Result<Option<ApiVersion>, BrokerError> {
        Ok(self.api()?.api_version_negotiated())
    }

    fn api_method(
        &self,
        name: &str,
        params: &[(&str, Value)],
        lazy_auth: bool,
    ) -> Result<Decoded, BrokerError> {
        let api = self.api()?;
        self.rest_method(api.links(), name, params, lazy_auth)
    }

    /// Creates a domain. The cached domain list is dropped.
    pub fn add_domain(&self, id: &str) -> Result<Domain, BrokerError> {
        debug!(domain = id, "adding domain");
        self.invalidate_domains();
        self.api_method("ADD_DOMAIN", &[("id", json!(id))], false)?
            .into_domain()
    }

    /// Domains of the current user. Cached until a domain changes.
    pub fn domains(&self) -> Result<Vec<Domain>, BrokerError> {
        if let Some(domains) = self.state.domains.borrow().as_ref() {
            return Ok(domains.clone());
        }
        debug!("getting all domains");
        let domains = self.api_method("LIST_DOMAINS", &[], false)?.into_domains()?;
        *self.state.domains.borrow_mut() = Some(domains.clone());
        Ok(domains)
    }

    /// Cartridges offered by the server. Requested lazily, so anonymous
    /// access is tried before prompting.
    pub fn cartridges(&self) -> Result<Vec<Cartridge>, BrokerError> {
        if let Some(cartridges) = self.state.cartridges.borrow().as_ref() {
            return Ok(cartridges.clone());
        }
        debug!("getting all cartridges");
        let cartridges = self
            .api_method("LIST_CARTRIDGES", &[], true)?
            .into_cartridges()?;
        *self.state.cartridges.borrow_mut() = Some(cartridges.clone());
        Ok(cartridges)
    }

    /// The authenticated user, cached after the first call.
    pub fn user(&self) -> Result<User, BrokerError> {
        if let Some(user) = self.state.user.borrow().as_ref() {
            return Ok(user.clone());
        }
        debug!("getting user info");
        let user = self.api_method("GET_USER", &[], false)?.into_user()?;
        *self.state.user.borrow_mut() = Some(user.clone());
        Ok(user)
    }

    /// SSH keys of the current user. Always fetched.
    pub fn sshkeys(&self) -> Result<Vec<Key>, BrokerError> {
        self.user()?.keys()
    }

    /// Uploads a public key for the current user.
    pub fn add_key(&self, name: &str, content: &str, kind: &str) -> Result<Key, BrokerError> {
        self.user()?.add_key(name, content, kind)
    }

    /// Deletes the named key; fails with [`BrokerError::KeyNotFound`] when absent.
    pub fn delete_key(&self, name: &str) -> Result<(), BrokerError> {
        debug!(key = name, "deleting key");
        self.find_key(name)?.destroy()
    }

    /// Domain with the exact id, or [`BrokerError::DomainNotFound`].
    pub fn find_domain(&self, id: &str) -> Result<Domain, BrokerError> {
        debug!(domain = id, "finding domain");
        self.domains()?
            .into_iter()
            .find(|domain| domain.id == id)
            .ok_or_else(|| BrokerError::DomainNotFound(format!("Domain {id} does not exist")))
    }

    /// Application `name` in domain `domain`, matched case-insensitively.
    pub fn find_application(&self, domain: &str, name: &str) -> Result<Application, BrokerError> {
        self.find_domain(domain)?.find_application(name)
    }

    /// Cartridges matching `query`; fails when none match.
    pub fn find_cartridges(&self, query: &CartridgeQuery) -> Result<Vec<Cartridge>, BrokerError> {
        debug!(query = %query.describe(), "finding cartridges");
        let matches: Vec<Cartridge> = self
            .cartridges()?
            .into_iter()
            .filter(|cartridge| query.matches(cartridge))
            .collect();
        if matches.is_empty() {
            return Err(BrokerError::CartridgeNotFound(format!(
                "Cartridge {} does not exist",
                query.describe()
            )));
        }
        Ok(matches)
    }

    /// Key with the exact name, or [`BrokerError::KeyNotFound`].
    pub fn find_key(&self, name: &str) -> Result<Key, BrokerError> {
        debug!(key = name, "finding key");
        self.user()?
            .find_key(name)?
            .ok_or_else(|| BrokerError::KeyNotFound(format!("Key {name} does not exist")))
    }

    /// Drops the session cookie and cached collections. No server call is made.
    pub fn logout(&self) {
        debug!("logout/close client");
        if let Some(auth) = self.state.auth.borrow_mut().as_mut() {
            auth.reset();
        }
        self.invalidate_domains();
        self.state.cartridges.borrow_mut().take();
        self.state.user.borrow_mut().take();
    }

    pub(crate) fn invalidate_domains(&self) {
        self.state.domains.borrow_mut().take();
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
