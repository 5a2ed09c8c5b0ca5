use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use super::diagnostics::format_diagnostics;
use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::ValidationError;
use super::partial::PartialConfig;
use crate::remote::http::DEFAULT_BASE_URL;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_API_PORT: u16 = 8565;

#[derive(Debug)]
pub struct Config {
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
    pub credentials: Credentials,
    pub api: ApiConfig,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"homectl::remote" = "debug"`.
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Subscriber filter for this configuration.
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: Url,
    /// House to control. Without it the first owned house is used.
    pub house_id: Option<u32>,
    pub request_timeout: Duration,
    pub command_timeout: Duration,
}

/// How to obtain a session token.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Login { login: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(..)"),
            Credentials::Login { login, .. } => f
                .debug_struct("Login")
                .field("login", login)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub listen: IpAddr,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_API_PORT,
        }
    }
}

impl ApiConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Files are merged first-wins; every merge conflict and validation
    /// failure is reported together. On success the returned diagnostics hold
    /// warnings only.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), LoadError> {
        let configs = PartialConfig::load_with_imports(paths)?;
        let (partial, diagnostics) = PartialConfig::merge(configs);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), LoadError> {
        let mut errors = Vec::new();
        let invalid = |field_path: &str, message: String| ValidationError {
            field_path: field_path.to_string(),
            message,
            location: partial.locations.get(field_path).cloned(),
        };

        let logging = match partial.logging {
            Some(logging) => LoggingConfig {
                level: logging.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            },
            None => LoggingConfig::default(),
        };

        let remote = partial.remote.unwrap_or_default();
        let base_url = match remote.base_url.map(|s| s.into_inner()) {
            Some(raw) => match Url::parse(&raw) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
                Ok(_) => {
                    errors.push(invalid(
                        "remote.base_url",
                        format!("'{}' is not an http(s) URL", raw),
                    ));
                    None
                }
                Err(e) => {
                    errors.push(invalid(
                        "remote.base_url",
                        format!("'{}' is not a valid URL: {}", raw, e),
                    ));
                    None
                }
            },
            None => Url::parse(DEFAULT_BASE_URL).ok(),
        };

        let mut timeout = |field_path: &str, value: Option<toml::Spanned<u64>>| {
            let secs = value.map(|s| s.into_inner()).unwrap_or(DEFAULT_TIMEOUT_SECS);
            if secs == 0 {
                errors.push(invalid(field_path, "must be greater than 0".to_string()));
            }
            Duration::from_secs(secs)
        };
        let request_timeout = timeout("remote.request_timeout_secs", remote.request_timeout_secs);
        let command_timeout = timeout("remote.command_timeout_secs", remote.command_timeout_secs);

        let credentials = partial.credentials.unwrap_or_default();
        let credentials = match (
            credentials.token.map(|s| s.into_inner()),
            credentials.login.map(|s| s.into_inner()),
            credentials.password.map(|s| s.into_inner()),
        ) {
            (Some(token), _, _) => Some(Credentials::Token(token)),
            (None, Some(login), Some(password)) => Some(Credentials::Login { login, password }),
            (None, Some(_), None) => {
                errors.push(invalid(
                    "credentials.login",
                    "login requires credentials.password".to_string(),
                ));
                None
            }
            (None, None, _) => {
                errors.push(invalid(
                    "credentials",
                    "either credentials.token or credentials.login and credentials.password must be set"
                        .to_string(),
                ));
                None
            }
        };

        let api = partial.api.unwrap_or_default();
        let api = ApiConfig {
            listen: api
                .listen
                .map(|s| s.into_inner())
                .unwrap_or(ApiConfig::default().listen),
            port: api.port.map(|s| s.into_inner()).unwrap_or(DEFAULT_API_PORT),
        };

        diagnostics.extend(
            errors
                .into_iter()
                .map(|e| Diagnostic::Error(Error::Validation(e))),
        );

        if diagnostics.iter().any(|d| d.is_error()) {
            return Err(LoadError::Invalid(format_diagnostics(&diagnostics)));
        }

        match (base_url, credentials) {
            (Some(base_url), Some(credentials)) => Ok((
                Config {
                    logging,
                    remote: RemoteConfig {
                        base_url,
                        house_id: remote.house_id.map(|s| s.into_inner()),
                        request_timeout,
                        command_timeout,
                    },
                    credentials,
                    api,
                },
                diagnostics,
            )),
            _ => Err(LoadError::Invalid(format_diagnostics(&diagnostics))),
        }
    }
}
