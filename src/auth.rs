use std::fmt;
use std::io::{self, BufRead, Write};

use reqwest::StatusCode;
use reqwest::header::{self, HeaderValue};
use tracing::{debug, error};

use crate::BrokerError;
use crate::transport::{BasicCredentials, RawResponse, Request};

/// Name of the session cookie issued by the broker after a successful login.
pub const SESSION_COOKIE: &str = "rh_sso";

const TOKEN_EXPIRED: &str = "Your access token has expired. Run 'broker-cli setup' again.";

/// Attaches credentials to outgoing requests and decides whether a response
/// warrants a retry with refreshed credentials.
pub trait Authenticator {
    /// Adds credentials to `request`. May prompt, unless the request is lazy.
    fn attach(&mut self, request: &mut Request) -> Result<(), BrokerError>;

    /// Inspects a response. `Ok(true)` asks the caller to rebuild and resend.
    ///
    /// Returns an error when the failure is fatal for this strategy.
    fn should_retry(&mut self, response: &RawResponse) -> Result<bool, BrokerError>;

    /// Forgets any session state.
    fn reset(&mut self) {}
}

/// Source of interactive operator input.
pub trait Prompter {
    /// Reads one line of visible input.
    fn ask(&mut self, prompt: &str) -> io::Result<String>;

    /// Reads one line without echoing it.
    fn ask_secret(&mut self, prompt: &str) -> io::Result<String>;

    /// Shows a message that needs no answer.
    fn warn(&mut self, message: &str);

    /// Returns `false` when no operator is available to answer.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Prompts on stderr and reads answers from stdin.
///
/// Secret answers are read from the terminal with echo turned off.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_answer(prompt: &str) -> io::Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before an answer was given",
            ));
        }
        Ok(answer.trim_end_matches(['\r', '\n']).to_owned())
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        Self::read_answer(prompt)
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }

    fn warn(&mut self, message: &str) {
        eprintln!("{message}");
    }
}

/// Prompter for unattended use: every question fails.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn ask(&mut self, _prompt: &str) -> io::Result<String> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "interactive input is disabled",
        ))
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
        self.ask(prompt)
    }

    fn warn(&mut self, message: &str) {
        error!("{message}");
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, Default)]
struct SessionCookie(Option<String>);

impl SessionCookie {
    fn attach(&self, request: &mut Request) {
        let Some(value) = &self.0 else {
            return;
        };
        match HeaderValue::from_str(&format!("{SESSION_COOKIE}={value}")) {
            Ok(mut cookie) => {
                cookie.set_sensitive(true);
                request.headers.insert(header::COOKIE, cookie);
            }
            Err(_) => debug!("ignoring session cookie with invalid characters"),
        }
    }

    fn capture(&mut self, response: &RawResponse) {
        if self.0.is_none() {
            self.0 = response.cookie(SESSION_COOKIE);
        }
    }

    fn clear(&mut self) {
        self.0 = None;
    }
}

/// Username/password strategy with session cookie reuse.
///
/// Missing credentials are requested from the [`Prompter`] unless the
/// request is marked lazy. A `401` clears the session and asks for a new
/// password before the caller retries.
pub struct BasicAuth {
    username: Option<String>,
    password: Option<String>,
    server: Option<String>,
    cookie: SessionCookie,
    prompter: Box<dyn Prompter>,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("server", &self.server)
            .field("session", &self.cookie.0.is_some())
            .finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// Creates a strategy that prompts on the terminal for missing values.
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username: username.filter(|value| !value.is_empty()),
            password,
            server: None,
            cookie: SessionCookie::default(),
            prompter: Box::new(TerminalPrompter),
        }
    }

    /// Replaces the source of interactive input.
    #[must_use]
    pub fn with_prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    /// Server name shown in the login prompt.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Login known so far, given or prompted.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Whether a session cookie is held.
    pub fn has_session(&self) -> bool {
        self.cookie.0.is_some()
    }

    fn ask_username(&mut self) -> Result<String, BrokerError> {
        let prompt = match &self.server {
            Some(server) => format!("Login to {server}: "),
            None => "Login: ".to_owned(),
        };
        let username = self.prompter.ask(&prompt)?;
        self.username = Some(username.clone()).filter(|value| !value.is_empty());
        Ok(username)
    }

    fn ask_password(&mut self) -> Result<String, BrokerError> {
        let password = self.prompter.ask_secret("Password: ")?;
        self.password = Some(password.clone());
        Ok(password)
    }
}

impl Authenticator for BasicAuth {
    fn attach(&mut self, request: &mut Request) -> Result<(), BrokerError> {
        self.cookie.attach(request);
        if request.basic_auth.is_some() {
            return Ok(());
        }

        let may_prompt = !request.lazy_auth && self.prompter.is_interactive();
        let username = match self.username.clone() {
            Some(username) => Some(username),
            None if may_prompt => Some(self.ask_username()?),
            None => None,
        };

        if let Some(username) = username.filter(|value| !value.is_empty()) {
            let password = match self.password.clone() {
                Some(password) => Some(password),
                None if may_prompt => Some(self.ask_password()?),
                None => None,
            };
            request.basic_auth = Some(BasicCredentials { username, password });
        }
        Ok(())
    }

    fn should_retry(&mut self, response: &RawResponse) -> Result<bool, BrokerError> {
        if response.status != StatusCode::UNAUTHORIZED {
            self.cookie.capture(response);
            return Ok(false);
        }

        self.cookie.clear();
        if !self.prompter.is_interactive() {
            return Ok(false);
        }

        if self.username.is_none() {
            self.ask_username()?;
        }
        if self.password.is_some() {
            self.prompter.warn("Username or password is not correct");
        }
        self.ask_password()?;
        Ok(true)
    }

    fn reset(&mut self) {
        self.cookie.clear();
    }
}

/// Bearer token strategy. Never prompts and never retries.
pub struct TokenAuth {
    token: String,
    cookie: SessionCookie,
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuth")
            .field("token", &"[redacted]")
            .field("session", &self.cookie.0.is_some())
            .finish()
    }
}

impl TokenAuth {
    /// Authenticates every request with `Authorization: Bearer <token>`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            cookie: SessionCookie::default(),
        }
    }
}

impl Authenticator for TokenAuth {
    fn attach(&mut self, request: &mut Request) -> Result<(), BrokerError> {
        self.cookie.attach(request);
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token)).map_err(|_| {
            BrokerError::InvalidConfiguration("access token contains invalid characters".to_owned())
        })?;
        value.set_sensitive(true);
        request.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }

    fn should_retry(&mut self, response: &RawResponse) -> Result<bool, BrokerError> {
        if response.status == StatusCode::UNAUTHORIZED {
            self.cookie.clear();
            error!("access token rejected by the server");
            return Err(BrokerError::NotAuthenticated(TOKEN_EXPIRED.to_owned()));
        }
        self.cookie.capture(response);
        Ok(false)
    }

    fn reset(&mut self) {
        self.cookie.clear();
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{self, HeaderMap, HeaderValue};
    use reqwest::{Method, StatusCode};

    use super::{Authenticator, BasicAuth, NonInteractive, TokenAuth};
    use crate::BrokerError;
    use crate::testing::ScriptedPrompter;
    use crate::transport::{RawResponse, Request};

    fn request(lazy: bool) -> Request {
        let url = url::Url::parse("https://broker.example.com/broker/rest/api").expect("valid url");
        let mut request = Request::new(Method::GET, url);
        request.lazy_auth = lazy;
        request
    }

    fn response(status: StatusCode, cookie: Option<&'static str>) -> RawResponse {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert(header::SET_COOKIE, HeaderValue::from_static(cookie));
        }
        RawResponse {
            status,
            headers,
            body: String::new(),
        }
    }

    #[test]
    fn lazy_requests_never_prompt() {
        let prompter = ScriptedPrompter::new(&[]);
        let mut auth = BasicAuth::new(None, None).with_prompter(prompter.clone());
        let mut request = request(true);

        auth.attach(&mut request).expect("attach succeeds");
        assert!(request.basic_auth.is_none());
        assert!(prompter.questions().is_empty());
    }

    #[test]
    fn prompts_for_missing_username_and_password() {
        let prompter = ScriptedPrompter::new(&["alice", "secret"]);
        let mut auth = BasicAuth::new(None, None)
            .with_server("broker.example.com")
            .with_prompter(prompter.clone());
        let mut request = request(false);

        auth.attach(&mut request).expect("attach succeeds");
        let credentials = request.basic_auth.expect("credentials attached");
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password.as_deref(), Some("secret"));
        assert_eq!(
            prompter.questions(),
            vec!["Login to broker.example.com: ", "Password: "]
        );
        assert_eq!(prompter.secret_questions(), vec!["Password: "]);
    }

    #[test]
    fn unauthorized_with_known_password_warns_and_asks_again() {
        let prompter = ScriptedPrompter::new(&["new-secret"]);
        let mut auth = BasicAuth::new(Some("alice".to_owned()), Some("old".to_owned()))
            .with_prompter(prompter.clone());

        let retry = auth
            .should_retry(&response(StatusCode::UNAUTHORIZED, None))
            .expect("retry decision");
        assert!(retry);
        assert_eq!(prompter.warnings(), vec!["Username or password is not correct"]);

        let mut request = request(false);
        auth.attach(&mut request).expect("attach succeeds");
        let credentials = request.basic_auth.expect("credentials attached");
        assert_eq!(credentials.password.as_deref(), Some("new-secret"));
        assert_eq!(prompter.secret_questions(), vec!["Password: "]);
    }

    #[test]
    fn captures_session_cookie_and_drops_it_on_unauthorized() {
        let prompter = ScriptedPrompter::new(&["again"]);
        let mut auth = BasicAuth::new(Some("alice".to_owned()), Some("pw".to_owned()))
            .with_prompter(prompter);

        let retry = auth
            .should_retry(&response(StatusCode::OK, Some("rh_sso=session-1; Path=/")))
            .expect("retry decision");
        assert!(!retry);
        assert!(auth.has_session());

        let mut request = request(false);
        auth.attach(&mut request).expect("attach succeeds");
        assert_eq!(
            request.headers.get(header::COOKIE).and_then(|v| v.to_str().ok()),
            Some("rh_sso=session-1")
        );

        auth.should_retry(&response(StatusCode::UNAUTHORIZED, None))
            .expect("retry decision");
        assert!(!auth.has_session());
    }

    #[test]
    fn non_interactive_basic_auth_does_not_retry() {
        let mut auth = BasicAuth::new(Some("alice".to_owned()), Some("pw".to_owned()))
            .with_prompter(NonInteractive);
        let retry = auth
            .should_retry(&response(StatusCode::UNAUTHORIZED, None))
            .expect("retry decision");
        assert!(!retry);
    }

    #[test]
    fn token_sets_bearer_header_and_skips_basic_credentials() {
        let mut auth = TokenAuth::new("abc");
        let mut request = request(false);
        auth.attach(&mut request).expect("attach succeeds");

        assert_eq!(
            request
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        assert!(request.basic_auth.is_none());
    }

    #[test]
    fn expired_token_is_fatal() {
        let mut auth = TokenAuth::new("abc");
        let error = auth
            .should_retry(&response(StatusCode::UNAUTHORIZED, None))
            .expect_err("token rejection is fatal");
        match error {
            BrokerError::NotAuthenticated(message) => assert!(message.contains("expired")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
