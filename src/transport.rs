use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::BrokerError;

/// Timeout applied when neither the caller nor the client configures one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Username and optional password sent as HTTP basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// A fully built request, ready to hand to a [`Transport`].
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub basic_auth: Option<BasicCredentials>,
    pub timeout: Duration,
    /// Authenticators must not prompt for missing credentials on lazy requests.
    pub lazy_auth: bool,
}

impl Request {
    /// Request with no headers, query or body and the default timeout.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            basic_auth: None,
            timeout: DEFAULT_TIMEOUT,
            lazy_auth: false,
        }
    }

    /// Header names and values safe to write to a debug trace.
    pub fn redacted_headers(&self) -> Vec<(String, String)> {
        redact(&self.headers)
    }
}

/// Status, headers and body of a completed HTTP exchange.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    /// Value of the named cookie from the response `Set-Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().to_owned())
    }

    /// Returns `true` for `204 No Content` or an empty body.
    pub fn is_empty(&self) -> bool {
        self.status == StatusCode::NO_CONTENT || self.body.trim().is_empty()
    }

    /// Header names and values safe to write to a debug trace.
    pub fn redacted_headers(&self) -> Vec<(String, String)> {
        redact(&self.headers)
    }
}

/// Why certificate verification failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateFailure {
    UnknownIssuer,
    Other,
}

/// Transport-level failures, before any HTTP status is available.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    TimedOut,

    #[error("{0}")]
    ConnectionInterrupted(String),

    /// The server (or a proxy in front of it) answered `502 Bad Gateway`.
    #[error("502 Bad Gateway")]
    BadGateway,

    #[error("{message}")]
    CertificateUnverified {
        reason: CertificateFailure,
        message: String,
    },

    #[error("{0}")]
    ProtocolRejected(String),

    /// DNS lookup or socket connect failed.
    #[error("{0}")]
    NameResolutionFailed(String),

    #[error("{source}")]
    Other {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Executes one HTTP request. Implementations never retry.
pub trait Transport {
    fn execute(&self, request: &Request) -> Result<RawResponse, TransportError>;
}

/// Certificate verification policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SslVerify {
    #[default]
    Peer,
    /// Accept any certificate. Data may be visible to third parties.
    None,
}

/// Settings that shape the underlying HTTP connection.
#[derive(Clone, Debug, Default)]
pub struct TransportConfig {
    pub user_agent: Option<String>,
    pub verify_ssl: SslVerify,
    pub ssl_ca_file: Option<PathBuf>,
    pub proxy: Option<String>,
    pub connect_timeout: Option<Duration>,
}

/// Blocking [`Transport`] backed by `reqwest`.
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Builds the HTTP client. Fails on an unreadable CA file or a bad proxy URL.
    pub fn new(config: &TransportConfig) -> Result<Self, BrokerError> {
        let mut builder = reqwest::blocking::Client::builder();

        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }

        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if config.verify_ssl == SslVerify::None {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(path) = &config.ssl_ca_file {
            let pem = std::fs::read(path).map_err(|error| {
                BrokerError::InvalidConfiguration(format!(
                    "unable to read CA file '{}': {error}",
                    path.display()
                ))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|error| {
                BrokerError::InvalidConfiguration(format!(
                    "CA file '{}' is not a PEM certificate: {error}",
                    path.display()
                ))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|error| {
                BrokerError::InvalidConfiguration(format!("invalid proxy '{proxy}': {error}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|error| BrokerError::InvalidConfiguration(error.to_string()))?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(credentials) = &request.basic_auth {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }

        if let Some(json_body) = &request.body {
            builder = builder.json(json_body);
        }

        let response = builder.send().map_err(classify_reqwest_error)?;
        let status = response.status();
        if status == StatusCode::BAD_GATEWAY {
            return Err(TransportError::BadGateway);
        }

        let headers = response.headers().clone();
        let body = response.text().map_err(classify_reqwest_error)?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Sorts a `reqwest` failure into a [`TransportError`].
///
/// `reqwest` does not expose TLS or resolver failures as types, so the
/// `source()` chain text is matched instead.
fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::TimedOut;
    }

    let chain = error_chain_text(&error);
    match classify_chain(chain, error.is_body(), error.is_connect()) {
        Some(classified) => classified,
        None => TransportError::Other {
            source: Box::new(error),
        },
    }
}

/// Maps the rendered error chain onto a failure kind. `None` leaves the
/// error unclassified.
fn classify_chain(chain: String, is_body: bool, is_connect: bool) -> Option<TransportError> {
    let lowered = chain.to_ascii_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

    let classified = if mentions(&[
        "protocolversion",
        "protocol version",
        "peer is incompatible",
        "peerincompatible",
        "handshakefailure",
        "no cipher",
    ]) {
        TransportError::ProtocolRejected(chain)
    } else if mentions(&[
        "unknownissuer",
        "unknown issuer",
        "unable to get local issuer certificate",
    ]) {
        TransportError::CertificateUnverified {
            reason: CertificateFailure::UnknownIssuer,
            message: chain,
        }
    } else if mentions(&["certificate"]) {
        TransportError::CertificateUnverified {
            reason: CertificateFailure::Other,
            message: chain,
        }
    } else if mentions(&[
        "dns error",
        "failed to lookup address",
        "name or service not known",
    ]) {
        TransportError::NameResolutionFailed(chain)
    } else if is_body
        || mentions(&[
            "connection reset",
            "connection closed",
            "broken pipe",
            "end of file before message length reached",
        ])
    {
        TransportError::ConnectionInterrupted(chain)
    } else if is_connect {
        TransportError::NameResolutionFailed(chain)
    } else {
        return None;
    };
    Some(classified)
}

fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn redact(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if name == header::AUTHORIZATION
                || name == header::COOKIE
                || name == header::SET_COOKIE
            {
                "[redacted]".to_owned()
            } else {
                value.to_str().unwrap_or("[binary]").to_owned()
            };
            (name.as_str().to_owned(), shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use reqwest::StatusCode;
    use reqwest::header::{self, HeaderMap, HeaderValue};
    use reqwest::Method;
    use test_case::test_case;
    use thiserror::Error;
    use url::Url;

    use super::{
        BasicCredentials, CertificateFailure, HttpTransport, RawResponse, Request, Transport,
        TransportConfig, TransportError, classify_chain, error_chain_text,
    };
    use crate::classify::{ErrorContext, classify_transport};

    /// Accepts one connection on a local port and hands it to `serve`.
    fn serve_once(
        serve: impl FnOnce(TcpStream) + Send + 'static,
    ) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local port");
        let addr = listener.local_addr().expect("local address");
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream);
            }
        });
        (addr, handle)
    }

    fn read_some(stream: &mut TcpStream) {
        let mut buf = [0_u8; 4096];
        let _ = stream.read(&mut buf);
    }

    fn send(url: &str, timeout: Duration) -> Result<RawResponse, TransportError> {
        let transport = HttpTransport::new(&TransportConfig::default()).expect("transport builds");
        let mut request = Request::new(Method::GET, Url::parse(url).expect("valid url"));
        request.timeout = timeout;
        transport.execute(&request)
    }

    fn response_with_cookies(cookies: &[&'static str]) -> RawResponse {
        let mut headers = HeaderMap::new();
        for cookie in cookies {
            headers.append(header::SET_COOKIE, HeaderValue::from_static(cookie));
        }
        RawResponse {
            status: StatusCode::OK,
            headers,
            body: String::new(),
        }
    }

    #[test]
    fn reads_named_cookie_among_several() {
        let response =
            response_with_cookies(&["other=1; Path=/", "rh_sso=abc123; Path=/; Secure"]);
        assert_eq!(response.cookie("rh_sso").as_deref(), Some("abc123"));
        assert_eq!(response.cookie("missing"), None);
    }

    #[test]
    fn no_content_and_blank_bodies_are_empty() {
        let mut response = response_with_cookies(&[]);
        assert!(response.is_empty());
        response.body = "{}".to_owned();
        assert!(!response.is_empty());
        response.status = StatusCode::NO_CONTENT;
        assert!(response.is_empty());
    }

    #[test]
    fn redacts_credentials_from_traces() {
        let url = url::Url::parse("https://broker.example.com/broker/rest/api").expect("valid url");
        let mut request = Request::new(Method::GET, url);
        request
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        request
            .headers
            .insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        request.basic_auth = Some(BasicCredentials {
            username: "alice".to_owned(),
            password: Some("hunter2".to_owned()),
        });

        let traced = format!("{:?} {:?}", request.redacted_headers(), request.basic_auth);
        assert!(!traced.contains("secret"));
        assert!(!traced.contains("hunter2"));
        assert!(traced.contains("application/json"));
        assert!(traced.contains("alice"));
    }

    #[test_case("error sending request: received fatal alert: ProtocolVersion" ; "protocol version alert")]
    #[test_case("client error (Connect): peer is incompatible: Tls12NotOffered" ; "peer incompatible")]
    #[test_case("received fatal alert: HandshakeFailure" ; "handshake failure alert")]
    fn protocol_failures_are_rejected(chain: &str) {
        let classified = classify_chain(chain.to_owned(), false, true);
        assert!(matches!(classified, Some(TransportError::ProtocolRejected(ref m)) if m == chain));
    }

    #[test_case("invalid peer certificate: UnknownIssuer", CertificateFailure::UnknownIssuer ; "unknown issuer")]
    #[test_case("invalid peer certificate: NotValidForName", CertificateFailure::Other ; "wrong host name")]
    #[test_case("invalid peer certificate: Expired", CertificateFailure::Other ; "expired")]
    fn certificate_failures_keep_reason(chain: &str, expected: CertificateFailure) {
        let classified = classify_chain(chain.to_owned(), false, true);
        assert!(matches!(
            classified,
            Some(TransportError::CertificateUnverified { reason, .. }) if reason == expected
        ));
    }

    #[test]
    fn resolver_and_connect_failures_are_name_resolution() {
        let dns = classify_chain(
            "client error (Connect): dns error: failed to lookup address information".to_owned(),
            false,
            true,
        );
        assert!(matches!(dns, Some(TransportError::NameResolutionFailed(_))));

        let refused = classify_chain(
            "client error (Connect): tcp connect error: Connection refused (os error 111)".to_owned(),
            false,
            true,
        );
        assert!(matches!(refused, Some(TransportError::NameResolutionFailed(_))));
    }

    #[test_case("connection closed before message completed", false ; "closed before response")]
    #[test_case("connection reset by peer", false ; "reset")]
    #[test_case("error decoding response body", true ; "body error")]
    fn interrupted_connections(chain: &str, is_body: bool) {
        let classified = classify_chain(chain.to_owned(), is_body, false);
        assert!(matches!(classified, Some(TransportError::ConnectionInterrupted(_))));
    }

    #[test]
    fn unrecognised_failures_stay_unclassified() {
        assert!(classify_chain("builder error".to_owned(), false, false).is_none());
    }

    #[derive(Debug, Error)]
    #[error("handshake aborted")]
    struct Inner;

    #[derive(Debug, Error)]
    #[error("client error (Connect)")]
    struct Outer(#[source] Inner);

    #[test]
    fn chain_text_joins_every_source() {
        assert_eq!(
            error_chain_text(&Outer(Inner)),
            "client error (Connect): handshake aborted"
        );
    }

    #[test_case(0x46 ; "protocol version")]
    #[test_case(0x28 ; "handshake failure")]
    fn tls_alert_from_server_is_protocol_rejected(alert: u8) {
        let (addr, server) = serve_once(move |mut stream| {
            read_some(&mut stream);
            let _ = stream.write_all(&[0x15, 0x03, 0x03, 0x00, 0x02, 0x02, alert]);
            let _ = stream.flush();
        });

        let error = send(&format!("https://{addr}/"), Duration::from_secs(5))
            .expect_err("handshake must fail");
        server.join().expect("server thread");

        assert!(matches!(error, TransportError::ProtocolRejected(_)), "{error:?}");
        let url = format!("https://{addr}/");
        let context = ErrorContext {
            url: &url,
            proxy: None,
        };
        let classified = classify_transport(error, &context);
        assert_eq!(classified.exit_code(), 145);
    }

    #[test]
    fn connection_closed_before_response_is_interrupted() {
        let (addr, server) = serve_once(|mut stream| {
            read_some(&mut stream);
        });

        let error =
            send(&format!("http://{addr}/"), Duration::from_secs(5)).expect_err("no response");
        server.join().expect("server thread");
        assert!(matches!(error, TransportError::ConnectionInterrupted(_)), "{error:?}");
    }

    #[test]
    fn body_cut_short_is_interrupted() {
        let (addr, server) = serve_once(|mut stream| {
            read_some(&mut stream);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 64\r\n\r\n{\"type\":");
            let _ = stream.flush();
        });

        let error =
            send(&format!("http://{addr}/"), Duration::from_secs(5)).expect_err("short body");
        server.join().expect("server thread");
        assert!(matches!(error, TransportError::ConnectionInterrupted(_)), "{error:?}");
    }

    #[test]
    fn refused_connection_is_name_resolution_failure() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind local port");
            listener.local_addr().expect("local address")
        };

        let error =
            send(&format!("http://{addr}/"), Duration::from_secs(5)).expect_err("refused");
        assert!(matches!(error, TransportError::NameResolutionFailed(_)), "{error:?}");
    }

    #[test]
    fn silent_server_times_out() {
        let (release, held) = mpsc::channel::<()>();
        let (addr, server) = serve_once(move |mut stream| {
            read_some(&mut stream);
            let _ = held.recv_timeout(Duration::from_secs(10));
        });

        let error = send(&format!("http://{addr}/"), Duration::from_millis(200))
            .expect_err("no reply in time");
        drop(release);
        server.join().expect("server thread");
        assert!(matches!(error, TransportError::TimedOut), "{error:?}");
    }
}
