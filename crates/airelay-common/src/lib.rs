use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RelayConfigError {
    #[error("invalid relay config: {0}")]
    Invalid(&'static str),
}

/// Failover policy selected for the whole process.
///
/// `Blacklist` keeps retrying the same provider until its failure threshold
/// trips a blacklist entry; `Fallback` advances to the next provider on the
/// first failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    Blacklist,
    #[default]
    Fallback,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blacklist => "blacklist",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for RelayMode {
    type Err = RelayConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "blacklist" => Ok(Self::Blacklist),
            "fallback" => Ok(Self::Fallback),
            _ => Err(RelayConfigError::Invalid("mode must be blacklist|fallback")),
        }
    }
}

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 18100;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RETRY_WAIT_SECONDS: u32 = 1;
pub const DEFAULT_BLACKLIST_SECONDS: u64 = 60;

/// Final, merged runtime configuration for the relay process.
///
/// Merge order: CLI > ENV > settings file, then defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for the request_log table.
    pub dsn: String,
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,
    /// Consecutive failures before a provider is blacklisted (>= 1).
    pub failure_threshold: u32,
    /// Sleep between retries against the same provider.
    pub retry_wait_seconds: u32,
    /// How long a tripped provider stays blacklisted.
    pub blacklist_seconds: u64,
    pub mode: RelayMode,
}

impl RelayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional layer used when merging config sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RelayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub failure_threshold: Option<u32>,
    pub retry_wait_seconds: Option<u32>,
    pub blacklist_seconds: Option<u64>,
    pub mode: Option<RelayMode>,
}

impl RelayConfigPatch {
    pub fn overlay(&mut self, other: RelayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.failure_threshold.is_some() {
            self.failure_threshold = other.failure_threshold;
        }
        if other.retry_wait_seconds.is_some() {
            self.retry_wait_seconds = other.retry_wait_seconds;
        }
        if other.blacklist_seconds.is_some() {
            self.blacklist_seconds = other.blacklist_seconds;
        }
        if other.mode.is_some() {
            self.mode = other.mode;
        }
    }

    pub fn into_config(self) -> Result<RelayConfig, RelayConfigError> {
        let failure_threshold = self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD);
        if failure_threshold == 0 {
            return Err(RelayConfigError::Invalid("failure_threshold must be >= 1"));
        }
        Ok(RelayConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_LISTEN_PORT),
            dsn: self
                .dsn
                .ok_or(RelayConfigError::Invalid("dsn is required"))?,
            proxy: self.proxy,
            failure_threshold,
            retry_wait_seconds: self.retry_wait_seconds.unwrap_or(DEFAULT_RETRY_WAIT_SECONDS),
            blacklist_seconds: self.blacklist_seconds.unwrap_or(DEFAULT_BLACKLIST_SECONDS),
            mode: self.mode.unwrap_or_default(),
        })
    }
}

impl From<RelayConfig> for RelayConfigPatch {
    fn from(value: RelayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            failure_threshold: Some(value.failure_threshold),
            retry_wait_seconds: Some(value.retry_wait_seconds),
            blacklist_seconds: Some(value.blacklist_seconds),
            mode: Some(value.mode),
        }
    }
}
