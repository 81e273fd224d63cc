use serde::Serialize;

use crate::chain::Network;
use crate::pipeline::{Orchestrator, PipelineError};

/// `GET /blockchain/networks`
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworksQuery;

/// One row of the analytics panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkView {
    pub network: Network,
    pub name: &'static str,
    pub chain_id: u64,
    pub native_symbol: &'static str,
    pub enabled: bool,
    pub confirmations: u64,
    pub transactions: i64,
    pub confirmed: i64,
    pub failed: i64,
    pub bytes_stored: i64,
}

/// Every supported network, enabled or not, with its usage so far
#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &Orchestrator,
    _query: NetworksQuery,
) -> Result<Vec<NetworkView>, PipelineError> {
    let usage = orchestrator.ledger().network_usage().await?;
    let chains = orchestrator.chains();

    Ok(Network::ALL
        .iter()
        .map(|&network| {
            let stats = usage.iter().find(|u| u.network == network);
            let confirmations = chains
                .get(network)
                .map(|adapter| adapter.required_confirmations())
                .unwrap_or_else(|| network.default_confirmations());
            NetworkView {
                network,
                name: network.display_name(),
                chain_id: network.chain_id(),
                native_symbol: network.native_symbol(),
                enabled: chains.is_enabled(network),
                confirmations,
                transactions: stats.map(|s| s.transactions).unwrap_or_default(),
                confirmed: stats.map(|s| s.confirmed).unwrap_or_default(),
                failed: stats.map(|s| s.failed).unwrap_or_default(),
                bytes_stored: stats.map(|s| s.bytes_stored).unwrap_or_default(),
            }
        })
        .collect())
}
