use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Certificate, Client, Identity, Method, Request};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::handler::ResponseHandler;
use crate::mock_server::MockServerConfig;
use crate::typhoon::Typhoon;

/// Typhoon - HTTP load generator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load-test a target URL
    Run(RunArgs),

    /// Start a local mock server and load-test it
    Standalone(StandaloneArgs),
}

/// Options shared by every mode
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Number of concurrent workers
    #[arg(
        short = 't',
        long,
        env = "TYPHOON_THREADS",
        default_value = "10",
        allow_negative_numbers = true
    )]
    pub threads: i64,

    /// Duration of the test, e.g. 2s, 1m30s, 1h
    #[arg(short = 'd', long, env = "TYPHOON_DURATION", default_value = "2s")]
    pub duration: String,

    /// Runtime worker threads (0 = one per core)
    #[arg(long, env = "TYPHOON_CPU", default_value = "0")]
    pub cpu: i64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl LoadArgs {
    /// Override the load shape of `config` with these options
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        config.num_thread = self.threads.max(1) as usize;
        config.num_cpu = self.cpu.max(0) as usize;
        config.duration = parse_duration(&self.duration)?;
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Target URL
    pub target: Option<String>,

    /// JSON configuration file (overrides all other request options)
    #[arg(long)]
    pub conf: Option<PathBuf>,

    #[command(flatten)]
    pub load: LoadArgs,

    /// HTTP request method
    #[arg(short = 'm', long, default_value = "GET")]
    pub method: String,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookie header value
    #[arg(long)]
    pub cookie: Option<String>,

    /// User-Agent header value
    #[arg(long)]
    pub user_agent: Option<String>,

    /// File whose contents are sent as the request body
    #[arg(long)]
    pub body: Option<PathBuf>,

    /// Do not request compressed responses
    #[arg(long)]
    pub no_compression: bool,

    /// Reuse connections between requests
    #[arg(long)]
    pub keep_alive: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// PEM encoded CA certificate file
    #[arg(long)]
    pub ca: Option<PathBuf>,

    /// PEM encoded client certificate file
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM encoded client private key file
    #[arg(long)]
    pub key: Option<PathBuf>,
}

impl RunArgs {
    /// Resolve into a config file description (from `--conf` or the flags)
    pub fn config_file(&self) -> Result<ConfigFile> {
        if let Some(path) = &self.conf {
            return ConfigFile::read(path);
        }

        let target = self
            .target
            .clone()
            .ok_or_else(|| Error::Config("a target URL or --conf is required".to_string()))?;

        let mut header = BTreeMap::new();
        for line in &self.headers {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("malformed header: {}", line)))?;
            header.insert(name.trim().to_string(), value.trim().to_string());
        }

        Ok(ConfigFile {
            target,
            num_cpu: self.load.cpu,
            num_thread: self.load.threads,
            duration: self.load.duration.clone(),
            method: self.method.clone(),
            header,
            cookie: self.cookie.clone().unwrap_or_default(),
            user_agent: self.user_agent.clone().unwrap_or_default(),
            body_file: path_string(&self.body),
            disable_compression: self.no_compression,
            keep_alive: self.keep_alive,
            skip_tls_verify: self.insecure,
            server_cert_file: path_string(&self.ca),
            client_cert_file: path_string(&self.cert),
            client_key_file: path_string(&self.key),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct StandaloneArgs {
    #[command(flatten)]
    pub load: LoadArgs,

    /// Status code returned by the mock server
    #[arg(long, default_value = "200")]
    pub status: u16,

    /// Body returned by the mock server
    #[arg(long, default_value = "Hello World")]
    pub body: String,

    /// Simulated server latency in milliseconds
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,

    /// Fraction of requests answered with 500 (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    pub error_rate: f64,
}

impl StandaloneArgs {
    pub fn mock_config(&self) -> MockServerConfig {
        MockServerConfig {
            port: 0,
            status: self.status,
            body: self.body.clone(),
            latency_ms: self.latency_ms,
            error_rate: self.error_rate,
            echo: false,
        }
    }
}

fn path_string(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// On-disk JSON configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "NumCPU")]
    pub num_cpu: i64,
    #[serde(rename = "NumThread")]
    pub num_thread: i64,
    #[serde(rename = "Duration")]
    pub duration: String,

    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Header")]
    pub header: BTreeMap<String, String>,
    #[serde(rename = "Cookie")]
    pub cookie: String,
    #[serde(rename = "UserAgent")]
    pub user_agent: String,
    #[serde(rename = "BodyFile")]
    pub body_file: String,

    #[serde(rename = "DisableCompression")]
    pub disable_compression: bool,
    #[serde(rename = "KeepAlive")]
    pub keep_alive: bool,
    #[serde(rename = "SkipTLSVerify")]
    pub skip_tls_verify: bool,
    #[serde(rename = "ServerCertFile")]
    pub server_cert_file: String,
    #[serde(rename = "ClientCertFile")]
    pub client_cert_file: String,
    #[serde(rename = "ClientKeyFile")]
    pub client_key_file: String,
}

impl ConfigFile {
    /// Load a configuration file
    pub fn read(path: &Path) -> Result<Self> {
        let content = read_file(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Resolve the file into a ready configuration, reading referenced files
    pub fn into_config(self) -> Result<Config> {
        let duration = parse_duration(&self.duration)?;
        let method = parse_method(&self.method)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.header {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Config(format!("invalid header name: {}", name)))?;
            headers.append(name, header_value(value)?);
        }

        let body = match self.body_file.as_str() {
            "" => Bytes::new(),
            path => Bytes::from(read_file(Path::new(path))?),
        };

        let ca_pem = match self.server_cert_file.as_str() {
            "" => None,
            path => Some(read_file(Path::new(path))?),
        };

        let client_pem = if !self.client_cert_file.is_empty() && !self.client_key_file.is_empty() {
            let mut pem = read_file(Path::new(&self.client_cert_file))?;
            pem.push(b'\n');
            pem.extend(read_file(Path::new(&self.client_key_file))?);
            Some(pem)
        } else {
            None
        };

        Ok(Config {
            target: self.target,
            num_cpu: self.num_cpu.max(0) as usize,
            num_thread: self.num_thread.max(1) as usize,
            duration,
            method,
            headers,
            cookie: non_empty(self.cookie),
            user_agent: non_empty(self.user_agent),
            body,
            no_compression: self.disable_compression,
            keep_alive: self.keep_alive,
            skip_tls_verify: self.skip_tls_verify,
            ca_pem,
            client_pem,
        })
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Resolved load-test configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub target: String,
    /// Runtime worker threads, 0 for the runtime default
    pub num_cpu: usize,
    pub num_thread: usize,
    pub duration: Duration,

    pub method: Method,
    pub headers: HeaderMap,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub body: Bytes,

    pub no_compression: bool,
    pub keep_alive: bool,
    pub skip_tls_verify: bool,
    /// PEM encoded CA certificate trusted in addition to the built-in roots
    pub ca_pem: Option<Vec<u8>>,
    /// PEM encoded client certificate followed by its private key
    pub client_pem: Option<Vec<u8>>,
}

impl Config {
    /// Defaults for `target`: one GET worker for one second
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            num_cpu: 0,
            num_thread: 1,
            duration: Duration::from_secs(1),
            method: Method::GET,
            headers: HeaderMap::new(),
            cookie: None,
            user_agent: None,
            body: Bytes::new(),
            no_compression: false,
            keep_alive: false,
            skip_tls_verify: false,
            ca_pem: None,
            client_pem: None,
        }
    }

    /// Build the HTTP client shared by all workers
    pub fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(self.skip_tls_verify)
            .gzip(!self.no_compression);

        if !self.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }

        if let Some(pem) = &self.ca_pem {
            let cert = Certificate::from_pem(pem)
                .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(pem) = &self.client_pem {
            let identity = Identity::from_pem(pem)
                .map_err(|e| Error::Tls(format!("invalid client certificate or key: {}", e)))?;
            builder = builder.identity(identity);
        }

        Ok(builder.build()?)
    }

    /// Build the request template replayed by the workers
    pub fn build_request(&self, client: &Client) -> Result<Request> {
        if self.target.is_empty() {
            return Err(Error::Config("target URL is required".to_string()));
        }

        let mut headers = self.headers.clone();
        if let Some(user_agent) = &self.user_agent {
            headers.append(USER_AGENT, header_value(user_agent)?);
        }
        if let Some(cookie) = &self.cookie {
            headers.append(COOKIE, header_value(cookie)?);
        }

        let mut builder = client
            .request(self.method.clone(), &self.target)
            .headers(headers);
        if !self.body.is_empty() {
            builder = builder.body(self.body.clone());
        }
        Ok(builder.build()?)
    }

    /// Build an engine for this configuration
    pub fn typhoon(&self) -> Result<Typhoon> {
        let client = self.build_client()?;
        let request = self.build_request(&client)?;
        Ok(Typhoon::new(self.num_thread, self.duration, client, request))
    }

    /// Build an engine with a response handler attached
    pub fn typhoon_with_handler<H: ResponseHandler>(&self, handler: H) -> Result<Typhoon> {
        Ok(self.typhoon()?.with_handler(handler))
    }
}

/// Parse a duration such as "300ms", "2s", "1m30s" or "1.5h".
///
/// Units: ns, us (or µs), ms, s, m, h. A bare "0" is accepted.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let input = s.trim();
    let invalid = || Error::InvalidDuration(s.to_string());

    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err(invalid());
    }

    let mut nanos: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: f64 = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        nanos += (value * unit_nanos).round() as u128;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (nanos % 1_000_000_000) as u32))
}

fn parse_method(s: &str) -> Result<Method> {
    if s.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(s.to_uppercase().as_bytes())
        .map_err(|_| Error::Config(format!("invalid HTTP method: {}", s)))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("invalid header value: {}", value)))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("typhoon-{}-{}", std::process::id(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
        assert_eq!(parse_duration(" 0 ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "10", "2x", "s", "-1s", "1..5s", "1m30"] {
            assert!(
                matches!(parse_duration(bad), Err(Error::InvalidDuration(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("").unwrap(), Method::GET);
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method("DELETE").unwrap(), Method::DELETE);
        assert!(parse_method("BAD METHOD").is_err());
    }

    #[test]
    fn test_config_file_field_names() {
        let json = r#"{
            "Target": "http://127.0.0.1:8080/",
            "NumCPU": 2,
            "NumThread": 16,
            "Duration": "5s",
            "Method": "POST",
            "Header": {"X-Trace": "abc"},
            "UserAgent": "typhoon-test",
            "SkipTLSVerify": true
        }"#;
        let file: ConfigFile = serde_json::from_str(json).unwrap();

        assert_eq!(file.target, "http://127.0.0.1:8080/");
        assert_eq!(file.num_cpu, 2);
        assert_eq!(file.num_thread, 16);
        assert_eq!(file.header.get("X-Trace").map(String::as_str), Some("abc"));
        assert!(file.skip_tls_verify);
        assert!(!file.keep_alive);
        assert!(file.to_string().contains("\"NumCPU\": 2"));
    }

    #[test]
    fn test_into_config_coerces_counts() {
        let file = ConfigFile {
            target: "http://localhost/".to_string(),
            num_cpu: -3,
            num_thread: -1,
            duration: "1s".to_string(),
            ..Default::default()
        };
        let config = file.into_config().unwrap();

        assert_eq!(config.num_thread, 1);
        assert_eq!(config.num_cpu, 0);
        assert_eq!(config.method, Method::GET);
        assert!(config.body.is_empty());
        assert!(config.cookie.is_none());
    }

    #[test]
    fn test_into_config_reads_body_file() {
        let path = temp_file("body.txt", b"Hello World");
        let file = ConfigFile {
            target: "http://localhost/".to_string(),
            duration: "1s".to_string(),
            body_file: path.to_string_lossy().to_string(),
            ..Default::default()
        };
        let config = file.into_config().unwrap();
        assert_eq!(config.body, Bytes::from_static(b"Hello World"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_into_config_missing_file() {
        let file = ConfigFile {
            target: "http://localhost/".to_string(),
            duration: "1s".to_string(),
            body_file: "/nonexistent/typhoon/body".to_string(),
            ..Default::default()
        };
        assert!(matches!(file.into_config(), Err(Error::Io { .. })));
    }

    #[test]
    fn test_into_config_requires_duration() {
        let file = ConfigFile {
            target: "http://localhost/".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            file.into_config(),
            Err(Error::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_build_request_appends_headers() {
        let mut config = Config::new("http://127.0.0.1:8080/path");
        config.method = Method::PUT;
        config.user_agent = Some("typhoon-test".to_string());
        config.cookie = Some("session=1".to_string());
        config.body = Bytes::from_static(b"payload");
        config
            .headers
            .insert("x-trace", HeaderValue::from_static("abc"));

        let client = config.build_client().unwrap();
        let request = config.build_request(&client).unwrap();

        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url().path(), "/path");
        assert_eq!(request.headers()[USER_AGENT], "typhoon-test");
        assert_eq!(request.headers()[COOKIE], "session=1");
        assert_eq!(request.headers()["x-trace"], "abc");
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&b"payload"[..])
        );
        // bytes bodies can be replayed
        assert!(request.try_clone().is_some());
    }

    #[test]
    fn test_build_request_errors() {
        let client = Client::new();
        assert!(matches!(
            Config::new("").build_request(&client),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::new("not a url").build_request(&client),
            Err(Error::Http(_))
        ));

        let mut config = Config::new("http://localhost/");
        config.user_agent = Some("bad\nvalue".to_string());
        assert!(matches!(
            config.build_request(&client),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_typhoon_from_config() {
        let mut config = Config::new("http://localhost/");
        config.num_thread = 4;
        config.duration = Duration::from_millis(500);
        let typhoon = config.typhoon().unwrap();

        assert_eq!(typhoon.num_thread(), 4);
        assert_eq!(typhoon.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_client_identity() {
        let mut config = Config::new("http://localhost/");
        config.client_pem = Some(b"not a pem".to_vec());
        assert!(config.build_client().is_err());
    }

    #[test]
    fn test_cli_run_args() {
        let cli = Cli::try_parse_from([
            "typhoon",
            "run",
            "-t",
            "4",
            "-d",
            "3s",
            "-m",
            "post",
            "-H",
            "X-Trace: abc",
            "--keep-alive",
            "http://127.0.0.1:8080/",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        let file = args.config_file().unwrap();
        assert_eq!(file.target, "http://127.0.0.1:8080/");
        assert_eq!(file.num_thread, 4);
        assert_eq!(file.duration, "3s");
        assert!(file.keep_alive);
        assert_eq!(file.header.get("X-Trace").map(String::as_str), Some("abc"));

        let config = file.into_config().unwrap();
        assert_eq!(config.method, Method::POST);
    }

    #[test]
    fn test_cli_run_requires_target() {
        let cli = Cli::try_parse_from(["typhoon", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert!(matches!(args.config_file(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_conf_file() {
        let path = temp_file(
            "conf.json",
            br#"{"Target": "http://localhost:9000/", "NumThread": 3, "Duration": "1s"}"#,
        );
        let cli = Cli::try_parse_from(["typhoon", "run", "--conf", path.to_str().unwrap()])
            .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        let file = args.config_file().unwrap();
        assert_eq!(file.target, "http://localhost:9000/");
        assert_eq!(file.num_thread, 3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_args_apply_to() {
        let load = LoadArgs {
            threads: 0,
            duration: "250ms".to_string(),
            cpu: 2,
            json: false,
        };
        let mut config = Config::new("http://localhost/");
        load.apply_to(&mut config).unwrap();

        assert_eq!(config.num_thread, 1);
        assert_eq!(config.num_cpu, 2);
        assert_eq!(config.duration, Duration::from_millis(250));
    }

    #[test]
    fn test_cli_standalone_args() {
        let cli = Cli::try_parse_from([
            "typhoon",
            "standalone",
            "--status",
            "500",
            "--latency-ms",
            "5",
        ])
        .unwrap();
        let Command::Standalone(args) = cli.command else {
            panic!("expected standalone subcommand");
        };
        let mock = args.mock_config();
        assert_eq!(mock.status, 500);
        assert_eq!(mock.latency_ms, 5);
        assert_eq!(mock.body, "Hello World");
        assert_eq!(args.load.threads, 10);
    }
}
