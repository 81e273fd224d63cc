//! Per-network chain adapter
//!
//! Wraps a backend with the network's confirmation threshold, a retry policy
//! for submissions and a rate limiter shared by every call to that network.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    ChainBackend, ChainError, ChainSubmissionError, ChainTimeoutError, ConfirmationError, Network,
    PayloadRef,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Confirmation depth that counts as final
    pub confirmations: u64,
    pub retry: RetryPolicy,
    pub rate_limit_per_second: u32,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl AdapterSettings {
    pub fn for_network(network: Network) -> Self {
        Self {
            confirmations: network.default_confirmations(),
            retry: RetryPolicy::default(),
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }
}

/// Inclusion data for a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending { confirmations: u64 },
    Confirmed { confirmations: u64 },
    Failed,
}

pub struct ChainAdapter {
    network: Network,
    backend: ChainBackend,
    settings: AdapterSettings,
    limiter: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for ChainAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAdapter")
            .field("network", &self.network)
            .field("backend", &self.backend.kind())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChainAdapter {
    pub fn new(network: Network, backend: ChainBackend, settings: AdapterSettings) -> Self {
        let per_second = NonZeroU32::new(settings.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            network,
            backend,
            settings,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn backend(&self) -> &ChainBackend {
        &self.backend
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn required_confirmations(&self) -> u64 {
        self.settings.confirmations
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    /// Submit `payload` as an anchor transaction, retrying transient failures
    #[instrument(skip(self, payload, cancel), fields(network = %self.network, job_id = %payload.job_id))]
    pub async fn submit(
        &self,
        payload: &PayloadRef,
        cancel: &CancellationToken,
    ) -> Result<Submission, ChainSubmissionError> {
        let data = payload.to_bytes();
        let retry = self.settings.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChainSubmissionError::Cancelled),
                result = async {
                    self.throttle().await;
                    self.backend.send_anchor(&data).await
                } => result,
            };

            match result {
                Ok(tx_hash) => {
                    info!(tx_hash = %tx_hash, attempt, "Anchor transaction submitted");
                    return Ok(Submission {
                        tx_hash,
                        attempts: attempt,
                    });
                },
                Err(err) if !err.is_transient() => {
                    warn!(error = %err, attempt, "Anchor transaction rejected");
                    return Err(ChainSubmissionError::Rejected {
                        network: self.network,
                        reason: err.to_string(),
                    });
                },
                Err(err) if attempt >= retry.max_attempts => {
                    warn!(error = %err, attempt, "Anchor submission retries exhausted");
                    return Err(ChainSubmissionError::Exhausted {
                        network: self.network,
                        attempts: attempt,
                        last: err.to_string(),
                    });
                },
                Err(err) => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient submission failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ChainSubmissionError::Cancelled),
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }

    /// Current inclusion state and confirmation depth of `tx_hash`
    pub async fn status(&self, tx_hash: &str) -> Result<TxStatus, ChainError> {
        self.throttle().await;
        let receipt = match self.backend.receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(TxStatus::Pending { confirmations: 0 }),
        };
        if !receipt.success {
            return Ok(TxStatus::Failed);
        }

        self.throttle().await;
        let head = self.backend.block_number().await?;
        let confirmations = head.saturating_sub(receipt.block_number) + 1;
        if confirmations >= self.settings.confirmations {
            Ok(TxStatus::Confirmed { confirmations })
        } else {
            Ok(TxStatus::Pending { confirmations })
        }
    }

    /// Read the payload reference back out of an anchor transaction
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn retrieve(&self, tx_hash: &str) -> Result<PayloadRef, ChainError> {
        self.throttle().await;
        let input = self.backend.transaction_input(tx_hash).await?;
        PayloadRef::from_bytes(&input)
    }

    /// Poll `status` until the confirmation threshold is reached.
    ///
    /// `on_progress` sees every new confirmation count below the threshold.
    /// Transient errors while polling are logged and polling continues.
    #[instrument(skip(self, cancel, on_progress), fields(network = %self.network))]
    pub async fn wait_for_confirmation<F>(
        &self,
        tx_hash: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64, ConfirmationError>
    where
        F: FnMut(u64) + Send,
    {
        let started = tokio::time::Instant::now();
        let deadline = started + self.settings.confirmation_timeout;
        let mut last_seen = None;

        loop {
            match self.status(tx_hash).await {
                Ok(TxStatus::Confirmed { confirmations }) => {
                    info!(tx_hash, confirmations, "Anchor confirmed");
                    return Ok(confirmations);
                },
                Ok(TxStatus::Failed) => {
                    return Err(ConfirmationError::Reverted {
                        tx_hash: tx_hash.to_string(),
                    })
                },
                Ok(TxStatus::Pending { confirmations }) => {
                    if last_seen != Some(confirmations) {
                        debug!(tx_hash, confirmations, "Waiting for confirmations");
                        on_progress(confirmations);
                        last_seen = Some(confirmations);
                    }
                },
                Err(err) if err.is_transient() => {
                    warn!(tx_hash, error = %err, "Status poll failed, will retry");
                },
                Err(err) => return Err(err.into()),
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(ChainTimeoutError {
                    network: self.network,
                    tx_hash: tx_hash.to_string(),
                    waited: now - started,
                }
                .into());
            }

            let sleep_for = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConfirmationError::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {},
            }
        }
    }
}
