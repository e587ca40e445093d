use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "airelay",
    version,
    about = "Multi-provider AI relay gateway with failover"
)]
pub(crate) struct CliArgs {
    /// Settings file carrying providers and relay policy.
    #[arg(long, env = "AIRELAY_SETTINGS", default_value = "airelay.json")]
    pub(crate) settings: String,

    /// Database DSN for the request_log table.
    #[arg(long, env = "AIRELAY_DSN")]
    pub(crate) dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "AIRELAY_HOST")]
    pub(crate) host: Option<String>,

    /// Bind port.
    #[arg(long, env = "AIRELAY_PORT")]
    pub(crate) port: Option<u16>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "AIRELAY_PROXY")]
    pub(crate) proxy: Option<String>,

    /// Consecutive failures before a provider is blacklisted.
    #[arg(long, env = "AIRELAY_FAILURE_THRESHOLD")]
    pub(crate) failure_threshold: Option<u32>,

    /// Sleep between retries against the same provider.
    #[arg(long, env = "AIRELAY_RETRY_WAIT_SECONDS")]
    pub(crate) retry_wait_seconds: Option<u32>,

    /// How long a tripped provider stays blacklisted.
    #[arg(long, env = "AIRELAY_BLACKLIST_SECONDS")]
    pub(crate) blacklist_seconds: Option<u64>,

    /// Failover mode: blacklist | fallback.
    #[arg(long, env = "AIRELAY_MODE")]
    pub(crate) mode: Option<String>,
}
