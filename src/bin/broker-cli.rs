use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use broker_client::{
    BasicAuth, BrokerError, CartridgeQuery, CartridgeType, Client, ClientOptions, NonInteractive,
    SslVerify,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "broker-cli",
    version,
    about = "Small CLI for the platform broker REST API"
)]
struct Cli {
    /// Broker host name. Expands to `https://<server>/broker/rest/api`.
    #[arg(long, env = "BROKER_SERVER")]
    server: Option<String>,

    /// Full URL of the API document. Takes precedence over `--server`.
    #[arg(long, env = "BROKER_URL")]
    url: Option<String>,

    /// Login name for basic authentication.
    #[arg(short = 'l', long, env = "BROKER_LOGIN")]
    rhlogin: Option<String>,

    /// Password for basic authentication. Prompted for when missing.
    #[arg(short, long, env = "BROKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Access token; takes precedence over login and password.
    #[arg(long, env = "BROKER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Never prompt; fail when credentials are missing or rejected.
    #[arg(long)]
    noprompt: bool,

    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure: bool,

    /// CA bundle used to verify the server certificate.
    #[arg(long, value_name = "PATH")]
    ssl_ca_file: Option<PathBuf>,

    /// Request timeout in seconds. Must be at least 1.
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// HTTP proxy for all requests.
    #[arg(long, env = "http_proxy")]
    proxy: Option<String>,

    /// Trace raw requests and responses on stderr.
    #[arg(short, long)]
    debug: bool,

    /// Emit compact JSON instead of pretty-printed output.
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the negotiated API version and the advertised links.
    Api,
    /// List domains.
    Domains,
    /// Show one domain.
    Domain { id: String },
    /// Create a domain.
    AddDomain { id: String },
    /// List the applications of a domain.
    Apps { domain: String },
    /// List cartridges offered by the server.
    Cartridges(CartridgeArgs),
    /// List SSH keys of the current user.
    Keys,
    /// Upload a public SSH key.
    AddKey(AddKeyArgs),
    /// Delete an SSH key by name.
    DeleteKey { name: String },
    /// List authorization tokens of the current user.
    Authorizations,
    /// Call a link from the API document by name.
    Request(RequestArgs),
}

#[derive(Debug, Args)]
struct CartridgeArgs {
    /// Exact cartridge name.
    #[arg(long, conflicts_with = "regex")]
    name: Option<String>,

    /// Regular expression matched against cartridge names.
    #[arg(long)]
    regex: Option<String>,

    #[arg(long = "type", value_enum)]
    kind: Option<KindArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Standalone,
    Embedded,
}

impl From<KindArg> for CartridgeType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Standalone => Self::Standalone,
            KindArg::Embedded => Self::Embedded,
        }
    }
}

#[derive(Debug, Args)]
struct AddKeyArgs {
    /// Name for the key on the server.
    name: String,

    /// Public key file in OpenSSH format (`<type> <content> [comment]`).
    file: PathBuf,

    /// Key type, overriding the one read from the file.
    #[arg(long = "type")]
    kind: Option<String>,
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// Link name from the API document (for example: `LIST_DOMAINS`).
    link: String,

    /// Link parameter in form key=value. Repeat as needed.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    param: Vec<String>,
}

/// Entry point for the CLI.
///
/// Broker errors exit with their stable exit code; other failures exit with 1.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error:#}");
            let code = error
                .downcast_ref::<BrokerError>()
                .map_or(1, BrokerError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "broker_client=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let client = Client::new(client_options(cli)).context("failed to create client")?;

    let output = match &cli.command {
        Command::Api => {
            let api = client.api()?;
            json!({
                "api_version": api.api_version_negotiated(),
                "server_api_versions": api.server_api_versions(),
                "client_api_versions": api.client_api_versions(),
                "links": api.links(),
            })
        }
        Command::Domains => to_json(&client.domains()?)?,
        Command::Domain { id } => to_json(&client.find_domain(id)?)?,
        Command::AddDomain { id } => to_json(&client.add_domain(id)?)?,
        Command::Apps { domain } => to_json(&client.find_domain(domain)?.applications()?)?,
        Command::Cartridges(args) => list_cartridges(&client, args)?,
        Command::Keys => to_json(&client.sshkeys()?)?,
        Command::AddKey(args) => add_key(&client, args)?,
        Command::DeleteKey { name } => {
            client.delete_key(name)?;
            json!({ "deleted": name })
        }
        Command::Authorizations => to_json(&client.user()?.authorizations()?)?,
        Command::Request(args) => send_request(&client, args)?,
    };

    print_json(&output, cli.compact).context("failed to print JSON output")?;
    Ok(())
}

fn client_options(cli: &Cli) -> ClientOptions {
    let mut options = ClientOptions::new().debug(cli.debug);
    if let Some(url) = &cli.url {
        options = options.url(url);
    }
    if let Some(server) = &cli.server {
        options = options.server(server);
    }
    if let Some(token) = &cli.token {
        options = options.token(token);
    } else {
        let mut auth = BasicAuth::new(cli.rhlogin.clone(), cli.password.clone());
        if let Some(server) = &cli.server {
            auth = auth.with_server(server);
        }
        if cli.noprompt {
            auth = auth.with_prompter(NonInteractive);
        }
        options = options.auth(auth);
    }
    if cli.insecure {
        options = options.verify_ssl(SslVerify::None);
    }
    if let Some(path) = &cli.ssl_ca_file {
        options = options.ssl_ca_file(path);
    }
    if let Some(seconds) = cli.timeout {
        options = options.timeout(Duration::from_secs(seconds));
    }
    if let Some(proxy) = &cli.proxy {
        options = options.proxy(proxy);
    }
    options
}

fn list_cartridges(client: &Client, args: &CartridgeArgs) -> Result<Value> {
    let mut query = match (&args.regex, &args.name) {
        (Some(pattern), _) => CartridgeQuery::regex(pattern)
            .with_context(|| format!("invalid --regex '{pattern}'"))?,
        (None, Some(name)) => CartridgeQuery::name(name),
        (None, None) => CartridgeQuery::default(),
    };
    if let Some(kind) = args.kind {
        query = query.of_kind(kind.into());
    }
    to_json(&client.find_cartridges(&query)?)
}

fn add_key(client: &Client, args: &AddKeyArgs) -> Result<Value> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read key file '{}'", args.file.display()))?;
    let (file_kind, content) = parse_public_key(&raw)
        .with_context(|| format!("invalid public key in '{}'", args.file.display()))?;
    let kind = args.kind.as_deref().unwrap_or(file_kind);
    to_json(&client.add_key(&args.name, content, kind)?)
}

/// Splits an OpenSSH public key line into its type and base64 content.
fn parse_public_key(raw: &str) -> Result<(&str, &str)> {
    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(kind), Some(content)) => Ok((kind, content)),
        _ => bail!("expected '<type> <content> [comment]'"),
    }
}

fn send_request(client: &Client, args: &RequestArgs) -> Result<Value> {
    let params = parse_pairs(&args.param, "--param").context("failed to parse --param arguments")?;
    let borrowed: Vec<(&str, Value)> = params
        .iter()
        .map(|(key, value)| (key.as_str(), Value::String(value.clone())))
        .collect();

    let api = client.api()?;
    let decoded = client
        .rest_method(api.links(), &args.link, &borrowed, false)
        .with_context(|| format!("link '{}' returned an error", args.link))?;
    to_json(&decoded)
}

/// Parses repeated `key=value` arguments into owned key/value pairs.
///
/// Returns an error when a value does not include `=` or has an empty key.
fn parse_pairs(values: &[String], flag_name: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::with_capacity(values.len());
    for item in values {
        let Some((key, value)) = item.split_once('=') else {
            bail!("invalid {flag_name} value '{item}': expected key=value");
        };
        if key.is_empty() {
            bail!("invalid {flag_name} value '{item}': empty key");
        }
        pairs.push((key.to_owned(), value.to_owned()));
    }
    Ok(pairs)
}

fn to_json(value: &impl Serialize) -> Result<Value> {
    serde_json::to_value(value).context("failed to convert response to JSON")
}

/// Prints a JSON value either compact or pretty-formatted.
fn print_json(value: &Value, compact: bool) -> Result<()> {
    if compact {
        println!(
            "{}",
            serde_json::to_string(value).context("Failed to render JSON")?
        );
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to render JSON")?
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, parse_pairs, parse_public_key};

    #[test]
    fn splits_openssh_public_key() {
        let (kind, content) =
            parse_public_key("ssh-ed25519 AAAAC3Nza alice@laptop\n").expect("valid key");
        assert_eq!(kind, "ssh-ed25519");
        assert_eq!(content, "AAAAC3Nza");
        assert!(parse_public_key("AAAAC3Nza").is_err());
    }

    #[test]
    fn pairs_require_a_key() {
        let pairs = parse_pairs(&["id=foo".to_owned(), "note=a=b".to_owned()], "--param")
            .expect("valid pairs");
        assert_eq!(pairs[1], ("note".to_owned(), "a=b".to_owned()));
        assert!(parse_pairs(&["=x".to_owned()], "--param").is_err());
        assert!(parse_pairs(&["x".to_owned()], "--param").is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let error = Cli::try_parse_from(["broker-cli", "--timeout", "0", "domains"])
            .expect_err("zero timeout");
        assert_eq!(error.kind(), clap::error::ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["broker-cli", "--timeout", "30", "domains"])
            .expect("valid timeout");
        assert_eq!(cli.timeout, Some(30));
    }
}
