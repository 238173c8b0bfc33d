//! Fixed-delay retry for height-addressed queries.

use crate::chain::client::ClientError;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

const DEFAULT_RETRY_BUDGET: u32 = 10;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt of a single query.
    pub budget: u32,
    pub tx_delay: Duration,
    pub claims_delay: Duration,
    pub block_delay: Duration,
    pub supply_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_budget(DEFAULT_RETRY_BUDGET)
    }
}

impl RetryPolicy {
    pub fn with_budget(budget: u32) -> Self {
        Self {
            budget,
            tx_delay: Duration::from_secs(1),
            claims_delay: Duration::from_secs(5),
            block_delay: Duration::from_secs(5),
            supply_delay: Duration::from_secs(5),
        }
    }

    /// Same budget, no sleeping between attempts.
    pub fn immediate(budget: u32) -> Self {
        Self {
            budget,
            tx_delay: Duration::ZERO,
            claims_delay: Duration::ZERO,
            block_delay: Duration::ZERO,
            supply_delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds or has failed `budget + 1` times, sleeping `delay`
/// between attempts. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    what: &'static str,
    height: u64,
    budget: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut retries: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if retries < budget => {
                retries += 1;
                warn!(what, height, retry = retries, budget, error = %err, "rpc failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(what, height, budget, error = %err, "retries exhausted");
                return Err(err);
            }
        }
    }
}
