//! Configuration for a benchmark run.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `KVBENCH__`)
//! 3. YAML configuration file (specified via `-C` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `KVBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `KVBENCH__ENDPOINT=http://10.0.0.1:2379` sets the store endpoint
//! - `KVBENCH__CONCURRENCY=16` sets the number of writer tasks
//! - `KVBENCH__LOGGING__FORMAT=json` sets the log format
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! endpoint: http://10.0.0.1:2379
//! concurrency: 16
//!
//! logging:
//!   format: json
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use kvbench_client::{ClientOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KVBENCH__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Log output format.
///
/// The format can be explicitly specified or auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2025-06-04T12:10:32Z  INFO kvbench::harness: writers started concurrency=4
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, leaving stdout to the benchmark report.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Valid levels in increasing severity: TRACE, DEBUG, INFO, WARN, ERROR, OFF. The `RUST_LOG`
    /// environment variable takes precedence if set.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`].
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// An invalid combination of settings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one writer task is required.
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    /// Puts and watches need a key.
    #[error("key must not be empty")]
    EmptyKey,
    /// A password is only sent along with a username.
    #[error("password is set but username is empty")]
    PasswordWithoutUsername,
}

/// Main configuration struct for a benchmark run.
///
/// Once loaded and validated, the configuration is not modified and is passed by reference into
/// all parts of the run.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Address of the store.
    ///
    /// Endpoints without a scheme are contacted over plain `http://`.
    ///
    /// # Default
    ///
    /// `http://localhost:2379`
    pub endpoint: String,

    /// Number of concurrent writer tasks.
    ///
    /// # Default
    ///
    /// `1`
    pub concurrency: usize,

    /// Number of sequential puts issued by each writer task.
    ///
    /// # Default
    ///
    /// `800`
    pub request_count: u64,

    /// Runs the watch consumer alongside the writers.
    ///
    /// The consumer waits for `request_count × concurrency` events. Without puts, it waits
    /// forever unless that target is zero.
    pub enable_watch: bool,

    /// Runs the writer tasks.
    pub enable_put: bool,

    /// User to authenticate as. Authentication is skipped when empty.
    pub username: String,

    /// Password of [`username`](Self::username). Redacted in all output.
    ///
    /// An empty password counts as unset.
    pub password: Option<SecretBox<ConfigSecret>>,

    /// Key that all writers put and the consumer watches.
    ///
    /// # Default
    ///
    /// `foo`
    pub key: String,

    /// Value written by every put.
    ///
    /// # Default
    ///
    /// `bar`
    pub value: String,

    /// Timeout for establishing the connection to the store.
    ///
    /// # Default
    ///
    /// `2s`
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for each individual put, get or authenticate call.
    ///
    /// # Default
    ///
    /// `3s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:2379".to_owned(),
            concurrency: 1,
            request_count: 800,
            enable_watch: false,
            enable_put: false,
            username: String::new(),
            password: None,
            key: "foo".to_owned(),
            value: "bar".to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            logging: Logging::default(),
        }
    }
}

/// Settings given on the command line.
///
/// Only fields that are set override the lower layers of configuration.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Config::endpoint`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// See [`Config::concurrency`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    /// See [`Config::request_count`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    /// See [`Config::enable_watch`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_watch: Option<bool>,
    /// See [`Config::enable_put`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_put: Option<bool>,
    /// See [`Config::username`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// See [`Config::password`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// See [`Config::key`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// See [`Config::value`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Config {
    /// Loads and validates the configuration.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `KVBENCH__`)
    /// 4. Command line `overrides`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - The merged settings fail [`validate`](Self::validate)
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let mut config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        if config.password().is_none() {
            config.password = None;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks settings that cannot be expressed through types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        if self.username.is_empty() && self.password().is_some() {
            return Err(ConfigError::PasswordWithoutUsername);
        }
        Ok(())
    }

    /// Returns the password, unless it is unset or empty.
    pub fn password(&self) -> Option<&str> {
        self.password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
            .filter(|password| !password.is_empty())
    }

    /// Options for connecting a store client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new(self.endpoint.as_str())
            .connect_timeout(self.connect_timeout)
            .request_timeout(self.request_timeout)
    }

    /// Number of watch events the consumer waits for.
    pub fn watch_target(&self) -> u64 {
        self.request_count.saturating_mul(self.concurrency as u64)
    }
}
