//! In-process chain for development and tests
//!
//! Every `eth_blockNumber`-equivalent call mines `blocks_per_poll` blocks so
//! confirmation depth grows while callers poll. Failures can be injected
//! ahead of time: outages, rejections, reverts and dropped transactions that
//! are accepted but never mined.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ChainError, Receipt};

pub const DEFAULT_BLOCKS_PER_POLL: u64 = 4;

#[derive(Debug)]
struct SimulatedTx {
    data: Vec<u8>,
    block: u64,
    reverted: bool,
}

#[derive(Debug)]
struct SimState {
    block: u64,
    nonce: u64,
    txs: HashMap<String, SimulatedTx>,
    fail_next: u32,
    reject_next: bool,
    revert_next: bool,
    drop_next: bool,
    blocks_per_poll: u64,
    send_attempts: u64,
}

/// Cheap to clone; clones share the same chain
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self::with_blocks_per_poll(DEFAULT_BLOCKS_PER_POLL)
    }

    pub fn with_blocks_per_poll(blocks_per_poll: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                block: 1_000,
                nonce: 0,
                txs: HashMap::new(),
                fail_next: 0,
                reject_next: false,
                revert_next: false,
                drop_next: false,
                blocks_per_poll,
                send_attempts: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` submissions with a transient transport error
    pub fn fail_next(&self, n: u32) {
        self.state().fail_next = n;
    }

    /// Reject the next submission with a non-retryable RPC error
    pub fn reject_next(&self) {
        self.state().reject_next = true;
    }

    /// Mine the next submission as a reverted transaction
    pub fn revert_next(&self) {
        self.state().revert_next = true;
    }

    /// Accept the next submission but never mine it
    pub fn drop_next(&self) {
        self.state().drop_next = true;
    }

    /// Stop (0) or resume block production
    pub fn set_blocks_per_poll(&self, blocks: u64) {
        self.state().blocks_per_poll = blocks;
    }

    /// Submission calls seen, failed ones included
    pub fn send_attempts(&self) -> u64 {
        self.state().send_attempts
    }

    /// Mined transactions
    pub fn transaction_count(&self) -> usize {
        self.state().txs.len()
    }

    pub async fn send_anchor(&self, data: &[u8]) -> Result<String, ChainError> {
        let mut state = self.state();
        state.send_attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ChainError::Transport("simulated outage".to_string()));
        }
        if std::mem::take(&mut state.reject_next) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "simulated rejection".to_string(),
            });
        }

        state.nonce += 1;
        let mut hasher = Sha256::new();
        hasher.update(state.nonce.to_be_bytes());
        hasher.update(data);
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        if std::mem::take(&mut state.drop_next) {
            return Ok(tx_hash);
        }

        state.block += 1;
        let block = state.block;
        let reverted = std::mem::take(&mut state.revert_next);
        state.txs.insert(
            tx_hash.clone(),
            SimulatedTx {
                data: data.to_vec(),
                block,
                reverted,
            },
        );
        Ok(tx_hash)
    }

    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state().txs.get(tx_hash).map(|tx| Receipt {
            block_number: tx.block,
            success: !tx.reverted,
        }))
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let mut state = self.state();
        state.block += state.blocks_per_poll;
        Ok(state.block)
    }

    pub async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, ChainError> {
        self.state()
            .txs
            .get(tx_hash)
            .map(|tx| tx.data.clone())
            .ok_or_else(|| ChainError::NotFound(tx_hash.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_then_success() {
        let chain = SimulatedChain::new();
        chain.fail_next(2);

        assert!(chain.send_anchor(b"a").await.unwrap_err().is_transient());
        assert!(chain.send_anchor(b"a").await.unwrap_err().is_transient());
        let tx = chain.send_anchor(b"a").await.unwrap();

        assert_eq!(chain.send_attempts(), 3);
        assert_eq!(chain.transaction_input(&tx).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_same_data_gets_distinct_hashes() {
        let chain = SimulatedChain::new();
        let a = chain.send_anchor(b"x").await.unwrap();
        let b = chain.send_anchor(b"x").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(chain.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_blocks_advance_on_poll() {
        let chain = SimulatedChain::with_blocks_per_poll(3);
        let tx = chain.send_anchor(b"x").await.unwrap();
        let mined = chain.receipt(&tx).await.unwrap().unwrap().block_number;
        assert_eq!(chain.block_number().await.unwrap(), mined + 3);
    }

    #[tokio::test]
    async fn test_dropped_transaction_never_mines() {
        let chain = SimulatedChain::new();
        chain.drop_next();
        let dropped = chain.send_anchor(b"x").await.unwrap();
        for _ in 0..3 {
            chain.block_number().await.unwrap();
        }

        assert!(chain.receipt(&dropped).await.unwrap().is_none());
        assert!(matches!(
            chain.transaction_input(&dropped).await,
            Err(ChainError::NotFound(_))
        ));
        assert_eq!(chain.transaction_count(), 0);

        let mined = chain.send_anchor(b"x").await.unwrap();
        assert!(chain.receipt(&mined).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejection_is_not_transient() {
        let chain = SimulatedChain::new();
        chain.reject_next();
        assert!(!chain.send_anchor(b"x").await.unwrap_err().is_transient());
        assert!(chain.send_anchor(b"x").await.is_ok());
    }
}
