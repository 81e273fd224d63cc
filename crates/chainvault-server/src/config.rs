//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;

use crate::chain::Network;
use crate::crypto::EncryptionTier;
use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default upload size limit (1 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Default ledger URL for local development.
pub const DEFAULT_LEDGER_URL: &str = "sqlite://chainvault.db";

/// Default maximum ledger connections in the pool.
pub const DEFAULT_LEDGER_MAX_CONNECTIONS: u32 = 8;

/// Default ledger connection timeout in seconds.
pub const DEFAULT_LEDGER_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Default number of jobs allowed in CPU-bound stages at once.
pub const DEFAULT_PIPELINE_WORKERS: usize = 4;

/// Default number of orchestrator retries after a ledger version conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Default number of automatic resubmission rounds for a failed anchor.
pub const DEFAULT_AUTO_RETRY_LIMIT: u32 = 3;

/// Default delay before an automatic resubmission.
pub const DEFAULT_AUTO_RETRY_COOLDOWN_SECS: u64 = 60;

/// Default directory for wrapped data keys.
pub const DEFAULT_KEY_DIR: &str = "./data/keys";

/// Default JSON-RPC request timeout in seconds.
pub const DEFAULT_CHAIN_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub crypto: CryptoConfig,
    pub chain: ChainConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    pub max_upload_bytes: u64,
}

/// Ledger (SQLite) configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// What happens to jobs that fail while anchoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedJobPolicy {
    /// Stay failed until resubmitted through `POST /blockchain/store`
    #[default]
    Manual,
    /// Resubmitted by the orchestrator after a cooldown, a bounded number of times
    Auto,
}

impl FromStr for FailedJobPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(FailedJobPolicy::Manual),
            "auto" => Ok(FailedJobPolicy::Auto),
            other => anyhow::bail!("unknown failed job policy '{}' (expected manual|auto)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Spool size above which uploads and artifacts spill to disk
    pub memory_threshold_bytes: usize,
    pub max_statement_bytes: usize,
    pub default_network: Network,
    pub default_tier: EncryptionTier,
    pub failed_job_policy: FailedJobPolicy,
    pub auto_retry_limit: u32,
    pub auto_retry_cooldown_secs: u64,
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStoreKind {
    #[default]
    Memory,
    File,
}

impl FromStr for KeyStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(KeyStoreKind::Memory),
            "file" => Ok(KeyStoreKind::File),
            other => anyhow::bail!("unknown key store '{}' (expected memory|file)", other),
        }
    }
}

#[derive(Clone)]
pub struct CryptoConfig {
    pub key_store: KeyStoreKind,
    pub key_dir: PathBuf,
    /// Hex-encoded 32-byte master key wrapping stored data keys
    pub master_key: Option<String>,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("key_store", &self.key_store)
            .field("key_dir", &self.key_dir)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainBackendKind {
    Rpc,
    #[default]
    Simulated,
}

impl FromStr for ChainBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(ChainBackendKind::Rpc),
            "simulated" | "sim" => Ok(ChainBackendKind::Simulated),
            other => anyhow::bail!("unknown chain backend '{}' (expected rpc|simulated)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub enabled: bool,
    pub rpc_url: Option<String>,
    pub sender_address: Option<String>,
    pub anchor_address: Option<String>,
    /// Overrides the network's default confirmation threshold
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub backend: ChainBackendKind,
    pub retry_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub rate_limit_per_second: u32,
    pub poll_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub networks: Vec<NetworkConfig>,
}

impl ChainConfig {
    pub fn network(&self, network: Network) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.network == network)
    }

    pub fn is_enabled(&self, network: Network) -> bool {
        self.network(network).map(|n| n.enabled).unwrap_or(false)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Like [`env_parse`] but a present, unparseable value is an error
fn env_choice<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let chain_backend = env_choice("CHAIN_BACKEND", ChainBackendKind::default())?;
        let networks = Network::ALL
            .iter()
            .map(|&network| {
                let prefix = network.env_prefix();
                let rpc_url = env_opt(&format!("{}_RPC_URL", prefix));
                let enabled_by_default =
                    chain_backend == ChainBackendKind::Simulated || rpc_url.is_some();
                NetworkConfig {
                    network,
                    enabled: env_parse(&format!("{}_ENABLED", prefix), enabled_by_default),
                    rpc_url,
                    sender_address: env_opt(&format!("{}_SENDER_ADDRESS", prefix)),
                    anchor_address: env_opt(&format!("{}_ANCHOR_ADDRESS", prefix)),
                    confirmations: env_opt(&format!("{}_CONFIRMATIONS", prefix))
                        .and_then(|s| s.parse().ok()),
                }
            })
            .collect();

        let defaults = Config::default();
        let config = Config {
            server: ServerConfig {
                host: std::env::var("CHAINVAULT_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("CHAINVAULT_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_parse(
                    "CHAINVAULT_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
                max_upload_bytes: env_parse("CHAINVAULT_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            },
            ledger: LedgerConfig {
                url: std::env::var("LEDGER_URL").unwrap_or_else(|_| DEFAULT_LEDGER_URL.to_string()),
                max_connections: env_parse("LEDGER_MAX_CONNECTIONS", DEFAULT_LEDGER_MAX_CONNECTIONS),
                connect_timeout_secs: env_parse(
                    "LEDGER_CONNECT_TIMEOUT",
                    DEFAULT_LEDGER_CONNECT_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_parse("CORS_ALLOW_CREDENTIALS", true),
            },
            storage: StorageConfig::from_env()?,
            pipeline: PipelineConfig {
                workers: env_parse("PIPELINE_WORKERS", defaults.pipeline.workers),
                memory_threshold_bytes: env_parse(
                    "PIPELINE_MEMORY_THRESHOLD_BYTES",
                    defaults.pipeline.memory_threshold_bytes,
                ),
                max_statement_bytes: env_parse(
                    "PIPELINE_MAX_STATEMENT_BYTES",
                    defaults.pipeline.max_statement_bytes,
                ),
                default_network: env_choice("PIPELINE_DEFAULT_NETWORK", Network::Ethereum)?,
                default_tier: env_choice("PIPELINE_DEFAULT_TIER", EncryptionTier::High)?,
                failed_job_policy: env_choice(
                    "PIPELINE_FAILED_JOB_POLICY",
                    FailedJobPolicy::default(),
                )?,
                auto_retry_limit: env_parse("PIPELINE_AUTO_RETRY_LIMIT", DEFAULT_AUTO_RETRY_LIMIT),
                auto_retry_cooldown_secs: env_parse(
                    "PIPELINE_AUTO_RETRY_COOLDOWN_SECS",
                    DEFAULT_AUTO_RETRY_COOLDOWN_SECS,
                ),
                conflict_retries: env_parse("PIPELINE_CONFLICT_RETRIES", DEFAULT_CONFLICT_RETRIES),
            },
            crypto: CryptoConfig {
                key_store: env_choice("CRYPTO_KEY_STORE", KeyStoreKind::default())?,
                key_dir: std::env::var("CRYPTO_KEY_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_KEY_DIR)),
                master_key: env_opt("CRYPTO_MASTER_KEY"),
            },
            chain: ChainConfig {
                backend: chain_backend,
                retry_attempts: env_parse("CHAIN_RETRY_ATTEMPTS", defaults.chain.retry_attempts),
                base_backoff_ms: env_parse("CHAIN_BASE_BACKOFF_MS", defaults.chain.base_backoff_ms),
                max_backoff_ms: env_parse("CHAIN_MAX_BACKOFF_MS", defaults.chain.max_backoff_ms),
                rate_limit_per_second: env_parse(
                    "CHAIN_RATE_LIMIT_PER_SECOND",
                    defaults.chain.rate_limit_per_second,
                ),
                poll_interval_ms: env_parse(
                    "CHAIN_POLL_INTERVAL_MS",
                    defaults.chain.poll_interval_ms,
                ),
                confirmation_timeout_secs: env_parse(
                    "CHAIN_CONFIRMATION_TIMEOUT_SECS",
                    defaults.chain.confirmation_timeout_secs,
                ),
                request_timeout_secs: env_parse(
                    "CHAIN_REQUEST_TIMEOUT_SECS",
                    DEFAULT_CHAIN_REQUEST_TIMEOUT_SECS,
                ),
                networks,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.server.max_upload_bytes == 0 {
            anyhow::bail!("Maximum upload size must be greater than 0");
        }

        if self.ledger.url.is_empty() {
            anyhow::bail!("Ledger URL cannot be empty");
        }

        if self.ledger.max_connections == 0 {
            anyhow::bail!("Ledger max_connections must be greater than 0");
        }

        self.storage.validate()?;

        if self.pipeline.workers == 0 {
            anyhow::bail!("Pipeline workers must be greater than 0");
        }

        if self.pipeline.max_statement_bytes == 0 {
            anyhow::bail!("Maximum SQL statement size must be greater than 0");
        }

        if self.crypto.key_store == KeyStoreKind::File {
            let master_key = self
                .crypto
                .master_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("CRYPTO_MASTER_KEY is required for the file key store"))?;
            crate::crypto::FileKeyStore::decode_master_key(master_key)?;
        }

        let chain = &self.chain;
        if chain.retry_attempts == 0 {
            anyhow::bail!("Chain retry attempts must be at least 1");
        }
        if chain.rate_limit_per_second == 0 {
            anyhow::bail!("Chain rate limit must be greater than 0");
        }
        if chain.poll_interval_ms == 0 {
            anyhow::bail!("Chain poll interval must be greater than 0");
        }
        if chain.base_backoff_ms > chain.max_backoff_ms {
            anyhow::bail!(
                "Chain base backoff ({}ms) cannot be greater than max backoff ({}ms)",
                chain.base_backoff_ms,
                chain.max_backoff_ms
            );
        }

        let enabled: Vec<_> = chain.networks.iter().filter(|n| n.enabled).collect();
        if enabled.is_empty() {
            anyhow::bail!("At least one blockchain network must be enabled");
        }

        if chain.backend == ChainBackendKind::Rpc {
            for net in &enabled {
                let prefix = net.network.env_prefix();
                if net.rpc_url.is_none() {
                    anyhow::bail!("{}_RPC_URL is required when {} is enabled", prefix, net.network);
                }
                if net.sender_address.is_none() || net.anchor_address.is_none() {
                    anyhow::bail!(
                        "{p}_SENDER_ADDRESS and {p}_ANCHOR_ADDRESS are required when {} is enabled",
                        net.network,
                        p = prefix
                    );
                }
            }
        }

        if !chain.is_enabled(self.pipeline.default_network) {
            anyhow::bail!(
                "Default network '{}' is not enabled",
                self.pipeline.default_network
            );
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            ledger: LedgerConfig {
                url: DEFAULT_LEDGER_URL.to_string(),
                max_connections: DEFAULT_LEDGER_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_LEDGER_CONNECT_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            storage: StorageConfig::default(),
            pipeline: PipelineConfig {
                workers: DEFAULT_PIPELINE_WORKERS,
                memory_threshold_bytes: chainvault_convert::spool::DEFAULT_MEMORY_THRESHOLD,
                max_statement_bytes: chainvault_convert::parser::DEFAULT_MAX_STATEMENT_BYTES,
                default_network: Network::Ethereum,
                default_tier: EncryptionTier::High,
                failed_job_policy: FailedJobPolicy::Manual,
                auto_retry_limit: DEFAULT_AUTO_RETRY_LIMIT,
                auto_retry_cooldown_secs: DEFAULT_AUTO_RETRY_COOLDOWN_SECS,
                conflict_retries: DEFAULT_CONFLICT_RETRIES,
            },
            crypto: CryptoConfig {
                key_store: KeyStoreKind::Memory,
                key_dir: PathBuf::from(DEFAULT_KEY_DIR),
                master_key: None,
            },
            chain: ChainConfig {
                backend: ChainBackendKind::Simulated,
                retry_attempts: crate::chain::adapter::DEFAULT_MAX_ATTEMPTS,
                base_backoff_ms: crate::chain::adapter::DEFAULT_BASE_BACKOFF_MS,
                max_backoff_ms: crate::chain::adapter::DEFAULT_MAX_BACKOFF_MS,
                rate_limit_per_second: crate::chain::adapter::DEFAULT_RATE_LIMIT_PER_SECOND,
                poll_interval_ms: crate::chain::adapter::DEFAULT_POLL_INTERVAL_MS,
                confirmation_timeout_secs: crate::chain::adapter::DEFAULT_CONFIRMATION_TIMEOUT_SECS,
                request_timeout_secs: DEFAULT_CHAIN_REQUEST_TIMEOUT_SECS,
                networks: Network::ALL
                    .iter()
                    .map(|&network| NetworkConfig {
                        network,
                        enabled: true,
                        rpc_url: None,
                        sender_address: None,
                        anchor_address: None,
                        confirmations: None,
                    })
                    .collect(),
            },
        }
    }
}
