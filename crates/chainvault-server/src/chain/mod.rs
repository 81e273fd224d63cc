//! Chain adapters
//!
//! One [`ChainAdapter`] per enabled [`Network`], each backed by either an EVM
//! JSON-RPC node or an in-process [`SimulatedChain`].

pub mod adapter;
pub mod error;
pub mod network;
pub mod payload;
pub mod rpc;
pub mod simulated;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use adapter::{AdapterSettings, ChainAdapter, Receipt, RetryPolicy, Submission, TxStatus};
pub use error::{ChainError, ChainSubmissionError, ChainTimeoutError, ConfirmationError};
pub use network::{Network, UnknownNetwork};
pub use payload::PayloadRef;
pub use rpc::RpcClient;
pub use simulated::SimulatedChain;

use crate::config::{ChainBackendKind, ChainConfig};

/// Tagged dispatch over the supported backends
#[derive(Debug)]
pub enum ChainBackend {
    Rpc(RpcClient),
    Simulated(SimulatedChain),
}

impl ChainBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainBackend::Rpc(_) => "rpc",
            ChainBackend::Simulated(_) => "simulated",
        }
    }

    pub async fn send_anchor(&self, data: &[u8]) -> Result<String, ChainError> {
        match self {
            ChainBackend::Rpc(client) => client.send_anchor(data).await,
            ChainBackend::Simulated(chain) => chain.send_anchor(data).await,
        }
    }

    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        match self {
            ChainBackend::Rpc(client) => client.receipt(tx_hash).await,
            ChainBackend::Simulated(chain) => chain.receipt(tx_hash).await,
        }
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        match self {
            ChainBackend::Rpc(client) => client.block_number().await,
            ChainBackend::Simulated(chain) => chain.block_number().await,
        }
    }

    pub async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, ChainError> {
        match self {
            ChainBackend::Rpc(client) => client.transaction_input(tx_hash).await,
            ChainBackend::Simulated(chain) => chain.transaction_input(tx_hash).await,
        }
    }
}

/// Enabled adapters keyed by network
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    adapters: BTreeMap<Network, Arc<ChainAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, adapter: ChainAdapter) -> &mut Self {
        self.adapters.insert(adapter.network(), Arc::new(adapter));
        self
    }

    pub fn get(&self, network: Network) -> Option<Arc<ChainAdapter>> {
        self.adapters.get(&network).cloned()
    }

    pub fn is_enabled(&self, network: Network) -> bool {
        self.adapters.contains_key(&network)
    }

    pub fn networks(&self) -> impl Iterator<Item = Network> + '_ {
        self.adapters.keys().copied()
    }

    /// Build adapters for every enabled network in `config`
    pub fn from_config(config: &ChainConfig) -> Result<Self, ChainError> {
        let mut registry = Self::new();
        for net in config.networks.iter().filter(|n| n.enabled) {
            let settings = AdapterSettings {
                confirmations: net
                    .confirmations
                    .unwrap_or_else(|| net.network.default_confirmations()),
                retry: RetryPolicy {
                    max_attempts: config.retry_attempts,
                    base_backoff: Duration::from_millis(config.base_backoff_ms),
                    max_backoff: Duration::from_millis(config.max_backoff_ms),
                },
                rate_limit_per_second: config.rate_limit_per_second,
                poll_interval: Duration::from_millis(config.poll_interval_ms),
                confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            };

            let backend = match config.backend {
                ChainBackendKind::Simulated => ChainBackend::Simulated(SimulatedChain::new()),
                ChainBackendKind::Rpc => {
                    // validate() guarantees these are present for enabled rpc networks
                    let url = net.rpc_url.clone().unwrap_or_default();
                    let from = net.sender_address.clone().unwrap_or_default();
                    let to = net.anchor_address.clone().unwrap_or_default();
                    ChainBackend::Rpc(RpcClient::new(
                        url,
                        from,
                        to,
                        Duration::from_secs(config.request_timeout_secs),
                    )?)
                },
            };

            info!(
                network = %net.network,
                backend = backend.kind(),
                confirmations = settings.confirmations,
                "Chain adapter enabled"
            );
            registry.insert(ChainAdapter::new(net.network, backend, settings));
        }
        Ok(registry)
    }
}
