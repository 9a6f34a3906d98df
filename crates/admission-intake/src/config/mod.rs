use chrono::Duration;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admission: AdmissionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let admission = AdmissionConfig::from_env(environment)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            admission,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

const DEFAULT_RETENTION_HOURS: i64 = 72;
const DEFAULT_CODE_PREFIX: &str = "REG";
const DEFAULT_CODE_LENGTH: usize = 5;
const DEFAULT_CODE_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEFAULT_CODE_ATTEMPTS: u32 = 8;
const DEFAULT_COOKIE_NAME: &str = "draft_token";
const DEFAULT_FLOW_START: &str = "/daftar";
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3600;

/// Draft lifecycle settings: retention, code format, and cookie policy.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub retention_window: Duration,
    pub code: CodeFormat,
    pub cookie: CookiePolicy,
    /// Where gated endpoints redirect when the resume credential is rejected.
    pub flow_start: String,
    pub prune_interval: std::time::Duration,
    pub data_path: Option<PathBuf>,
}

impl AdmissionConfig {
    fn from_env(environment: AppEnvironment) -> Result<Self, ConfigError> {
        let retention_hours = parse_var("ADMISSION_RETENTION_HOURS", DEFAULT_RETENTION_HOURS)?;
        let retention_window = Duration::try_hours(retention_hours)
            .filter(|_| retention_hours > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "ADMISSION_RETENTION_HOURS",
                value: retention_hours.to_string(),
            })?;

        let code = CodeFormat::new(
            env::var("ADMISSION_CODE_PREFIX").unwrap_or_else(|_| DEFAULT_CODE_PREFIX.to_string()),
            parse_var("ADMISSION_CODE_LENGTH", DEFAULT_CODE_LENGTH)?,
            &env::var("ADMISSION_CODE_CHARSET")
                .unwrap_or_else(|_| DEFAULT_CODE_CHARSET.to_string()),
            parse_var("ADMISSION_CODE_ATTEMPTS", DEFAULT_CODE_ATTEMPTS)?,
        )?;

        let secure = match env::var("ADMISSION_COOKIE_SECURE") {
            Ok(raw) => parse_flag("ADMISSION_COOKIE_SECURE", &raw)?,
            Err(_) => environment.is_production(),
        };

        let cookie = CookiePolicy {
            name: env::var("ADMISSION_COOKIE_NAME")
                .unwrap_or_else(|_| DEFAULT_COOKIE_NAME.to_string()),
            secure,
        };

        let flow_start =
            env::var("ADMISSION_FLOW_START").unwrap_or_else(|_| DEFAULT_FLOW_START.to_string());
        let prune_interval = std::time::Duration::from_secs(parse_var(
            "ADMISSION_PRUNE_INTERVAL_SECS",
            DEFAULT_PRUNE_INTERVAL_SECS,
        )?);
        let data_path = env::var("ADMISSION_DATA_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            retention_window,
            code,
            cookie,
            flow_start,
            prune_interval,
            data_path,
        })
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            retention_window: Duration::hours(DEFAULT_RETENTION_HOURS),
            code: CodeFormat::default(),
            cookie: CookiePolicy {
                name: DEFAULT_COOKIE_NAME.to_string(),
                secure: false,
            },
            flow_start: DEFAULT_FLOW_START.to_string(),
            prune_interval: std::time::Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS),
            data_path: None,
        }
    }
}

/// Shape of the public registration code: `<prefix>-<year>-<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFormat {
    prefix: String,
    suffix_length: usize,
    charset: Vec<char>,
    max_attempts: u32,
}

impl CodeFormat {
    pub fn new(
        prefix: String,
        suffix_length: usize,
        charset: &str,
        max_attempts: u32,
    ) -> Result<Self, ConfigError> {
        let mut chars: Vec<char> = charset.chars().filter(|c| !c.is_whitespace()).collect();
        chars.sort_unstable();
        chars.dedup();

        if prefix.trim().is_empty() || prefix.contains('-') {
            return Err(ConfigError::InvalidCodeFormat(
                "prefix must be non-empty and must not contain '-'",
            ));
        }
        if suffix_length == 0 {
            return Err(ConfigError::InvalidCodeFormat("suffix length must be positive"));
        }
        if chars.len() < 2 {
            return Err(ConfigError::InvalidCodeFormat(
                "charset must contain at least two distinct characters",
            ));
        }
        if max_attempts == 0 {
            return Err(ConfigError::InvalidCodeFormat("attempt budget must be positive"));
        }

        Ok(Self {
            prefix: prefix.trim().to_string(),
            suffix_length,
            charset: chars,
            max_attempts,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix_length(&self) -> usize {
        self.suffix_length
    }

    pub fn charset(&self) -> &[char] {
        &self.charset
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `code` has the `<prefix>-<year>-<suffix>` shape this format produces.
    pub fn matches(&self, code: &str) -> bool {
        let mut parts = code.splitn(3, '-');
        let (Some(prefix), Some(year), Some(suffix)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        prefix == self.prefix
            && year.len() == 4
            && year.chars().all(|c| c.is_ascii_digit())
            && suffix.chars().count() == self.suffix_length
            && suffix.chars().all(|c| self.charset.contains(&c))
    }
}

impl Default for CodeFormat {
    fn default() -> Self {
        let mut charset: Vec<char> = DEFAULT_CODE_CHARSET.chars().collect();
        charset.sort_unstable();
        Self {
            prefix: DEFAULT_CODE_PREFIX.to_string(),
            suffix_length: DEFAULT_CODE_LENGTH,
            charset,
            max_attempts: DEFAULT_CODE_ATTEMPTS,
        }
    }
}

/// Attributes for the resume-credential cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    pub name: String,
    pub secure: bool,
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
    InvalidCodeFormat(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
            ConfigError::InvalidCodeFormat(reason) => {
                write!(f, "registration code format is invalid: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidValue { .. }
            | ConfigError::InvalidCodeFormat(_) => None,
        }
    }
}
