use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notify::RetryPolicy;

/// Config file names searched, in order, when no explicit path is given.
pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["kahawa.toml", "config/kahawa.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sms: SmsConfig,
    pub server: ServerConfig,
    pub verification: VerificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub enabled: bool,
    pub provider_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub sender_id: String,
    pub country_code: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
}

impl SmsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.retry_base_secs),
            max_delay: Duration::from_secs(self.retry_max_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub dispatch_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct VerificationConfig {
    pub public_base_url: String,
    pub qr_service_url: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub server_port: Option<u16>,
    pub sms_enabled: Option<bool>,
    pub sms_provider_url: Option<String>,
    pub sms_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://kahawa.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            sms: SmsConfig {
                enabled: false,
                provider_url: None,
                api_key: None,
                sender_id: "KAHAWA".to_string(),
                country_code: crate::notify::DEFAULT_COUNTRY_CODE.to_string(),
                timeout_secs: 10,
                max_attempts: 5,
                retry_base_secs: 30,
                retry_max_secs: 1800,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                dispatch_interval_secs: 15,
            },
            verification: VerificationConfig {
                public_base_url: "http://127.0.0.1:8080".to_string(),
                qr_service_url: "https://api.qrserver.com/v1/create-qr-code/".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(sms) = patch.sms {
            if let Some(enabled) = sms.enabled {
                self.sms.enabled = enabled;
            }
            if let Some(provider_url) = sms.provider_url {
                self.sms.provider_url = Some(provider_url);
            }
            if let Some(api_key) = sms.api_key {
                self.sms.api_key = Some(secret_value(api_key));
            }
            if let Some(sender_id) = sms.sender_id {
                self.sms.sender_id = sender_id;
            }
            if let Some(country_code) = sms.country_code {
                self.sms.country_code = country_code;
            }
            if let Some(timeout_secs) = sms.timeout_secs {
                self.sms.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = sms.max_attempts {
                self.sms.max_attempts = max_attempts;
            }
            if let Some(retry_base_secs) = sms.retry_base_secs {
                self.sms.retry_base_secs = retry_base_secs;
            }
            if let Some(retry_max_secs) = sms.retry_max_secs {
                self.sms.retry_max_secs = retry_max_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(dispatch_interval_secs) = server.dispatch_interval_secs {
                self.server.dispatch_interval_secs = dispatch_interval_secs;
            }
        }

        if let Some(verification) = patch.verification {
            if let Some(public_base_url) = verification.public_base_url {
                self.verification.public_base_url = public_base_url;
            }
            if let Some(qr_service_url) = verification.qr_service_url {
                self.verification.qr_service_url = qr_service_url;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("KAHAWA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("KAHAWA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("KAHAWA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("KAHAWA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("KAHAWA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KAHAWA_SMS_ENABLED") {
            self.sms.enabled = parse_bool("KAHAWA_SMS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("KAHAWA_SMS_PROVIDER_URL") {
            self.sms.provider_url = Some(value);
        }
        if let Some(value) = read_env("KAHAWA_SMS_API_KEY") {
            self.sms.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KAHAWA_SMS_SENDER_ID") {
            self.sms.sender_id = value;
        }
        if let Some(value) = read_env("KAHAWA_SMS_COUNTRY_CODE") {
            self.sms.country_code = value;
        }
        if let Some(value) = read_env("KAHAWA_SMS_TIMEOUT_SECS") {
            self.sms.timeout_secs = parse_u64("KAHAWA_SMS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("KAHAWA_SMS_MAX_ATTEMPTS") {
            self.sms.max_attempts = parse_u32("KAHAWA_SMS_MAX_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("KAHAWA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("KAHAWA_SERVER_PORT") {
            self.server.port = parse_u16("KAHAWA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("KAHAWA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("KAHAWA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("KAHAWA_SERVER_DISPATCH_INTERVAL_SECS") {
            self.server.dispatch_interval_secs =
                parse_u64("KAHAWA_SERVER_DISPATCH_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("KAHAWA_VERIFICATION_PUBLIC_BASE_URL") {
            self.verification.public_base_url = value;
        }
        if let Some(value) = read_env("KAHAWA_VERIFICATION_QR_SERVICE_URL") {
            self.verification.qr_service_url = value;
        }

        let log_level = read_env("KAHAWA_LOGGING_LEVEL").or_else(|| read_env("KAHAWA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KAHAWA_LOGGING_FORMAT").or_else(|| read_env("KAHAWA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.sms_enabled {
            self.sms.enabled = enabled;
        }
        if let Some(provider_url) = overrides.sms_provider_url {
            self.sms.provider_url = Some(provider_url);
        }
        if let Some(api_key) = overrides.sms_api_key {
            self.sms.api_key = Some(secret_value(api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_sms(&self.sms)?;
        validate_server(&self.server)?;
        validate_verification(&self.verification)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The config file `load` would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_sms(sms: &SmsConfig) -> Result<(), ConfigError> {
    let country_code = sms.country_code.trim().trim_start_matches('+');
    if country_code.is_empty()
        || country_code.len() > 3
        || !country_code.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ConfigError::Validation(
            "sms.country_code must be 1-3 digits, for example `256`".to_string(),
        ));
    }

    if sms.max_attempts == 0 || sms.max_attempts > 20 {
        return Err(ConfigError::Validation(
            "sms.max_attempts must be in range 1..=20".to_string(),
        ));
    }

    if sms.timeout_secs == 0 || sms.timeout_secs > 120 {
        return Err(ConfigError::Validation("sms.timeout_secs must be in range 1..=120".to_string()));
    }

    if sms.retry_base_secs == 0 || sms.retry_base_secs > sms.retry_max_secs {
        return Err(ConfigError::Validation(
            "sms.retry_base_secs must be greater than zero and at most sms.retry_max_secs"
                .to_string(),
        ));
    }

    if let Some(provider_url) = &sms.provider_url {
        if !is_http_url(provider_url) {
            return Err(ConfigError::Validation(
                "sms.provider_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if sms.enabled {
        if sms.provider_url.is_none() {
            return Err(ConfigError::Validation(
                "sms.enabled is true but sms.provider_url is not set. Use the messaging endpoint from your SMS provider dashboard".to_string(),
            ));
        }
        let missing_key = sms
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "sms.enabled is true but sms.api_key is empty. Set KAHAWA_SMS_API_KEY".to_string(),
            ));
        }
        if sms.sender_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sms.sender_id must not be empty when sms is enabled".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.dispatch_interval_secs == 0 || server.dispatch_interval_secs > 3600 {
        return Err(ConfigError::Validation(
            "server.dispatch_interval_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_verification(verification: &VerificationConfig) -> Result<(), ConfigError> {
    if !is_http_url(&verification.public_base_url) {
        return Err(ConfigError::Validation(
            "verification.public_base_url must start with http:// or https://".to_string(),
        ));
    }
    if !is_http_url(&verification.qr_service_url) {
        return Err(ConfigError::Validation(
            "verification.qr_service_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    sms: Option<SmsPatch>,
    server: Option<ServerPatch>,
    verification: Option<VerificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SmsPatch {
    enabled: Option<bool>,
    provider_url: Option<String>,
    api_key: Option<String>,
    sender_id: Option<String>,
    country_code: Option<String>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_secs: Option<u64>,
    retry_max_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    dispatch_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VerificationPatch {
    public_base_url: Option<String>,
    qr_service_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
