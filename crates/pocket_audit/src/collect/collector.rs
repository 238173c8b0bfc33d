//! Walks a height range and gathers block transactions, claims and supply.

use crate::chain::{with_retry, ChainClient, Claim, ClientError, RetryPolicy, TxBatch};
use crate::timeline::HeightRange;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("unable to get block-txs for height {height}: {source}")]
    BlockTxs {
        height: u64,
        #[source]
        source: ClientError,
    },
    #[error("unable to get claims for height {height}: {source}")]
    Claims {
        height: u64,
        #[source]
        source: ClientError,
    },
    #[error("unable to get the supply at height {height}: {source}")]
    Supply {
        height: u64,
        #[source]
        source: ClientError,
    },
}

impl CollectError {
    /// The client failure that exhausted the retry budget.
    pub fn client_error(&self) -> &ClientError {
        match self {
            CollectError::BlockTxs { source, .. }
            | CollectError::Claims { source, .. }
            | CollectError::Supply { source, .. } => source,
        }
    }
}

/// Everything the aggregator needs, keyed by height.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainData {
    pub txs: BTreeMap<u64, TxBatch>,
    /// Claims visible at the end of `height - 1`, stored under `height`.
    pub claims: BTreeMap<u64, Vec<Claim>>,
    pub supply_start: i64,
    pub supply_end: i64,
}

pub struct Collector<'a, C: ChainClient + ?Sized> {
    client: &'a C,
    retry: RetryPolicy,
}

impl<'a, C: ChainClient + ?Sized> Collector<'a, C> {
    pub fn new(client: &'a C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub async fn collect(&self, range: HeightRange) -> Result<ChainData, CollectError> {
        let mut data = ChainData::default();
        self.collect_into(range, &mut data).await?;
        Ok(data)
    }

    /// Fill `data` for `range`, fetching only heights not already present.
    pub async fn collect_into(
        &self,
        range: HeightRange,
        data: &mut ChainData,
    ) -> Result<(), CollectError> {
        let total = range.len();
        let budget = self.retry.budget;
        info!(
            min_height = range.min_height,
            max_height = range.max_height,
            "begin transactions / claims retrieval"
        );
        for height in range.heights() {
            let done = height - range.min_height;
            if !data.txs.contains_key(&height) {
                let batch = with_retry("blocktxs", height, budget, self.retry.tx_delay, || {
                    self.client.block_txs(height)
                })
                .await
                .map_err(|source| CollectError::BlockTxs { height, source })?;
                info!(height, done, total, txs = batch.txs.len(), "block-txs retrieved");
                data.txs.insert(height, batch);
            }

            // No claim can be settled in the first two blocks.
            if height < 2 {
                continue;
            }
            if !data.claims.contains_key(&height) {
                let claims = with_retry("claims", height, budget, self.retry.claims_delay, || {
                    self.client.claims(height - 1)
                })
                .await
                .map_err(|source| CollectError::Claims { height, source })?;
                info!(height, done, total, claims = claims.len(), "claims retrieved");
                data.claims.insert(height, claims);
            }
        }

        data.supply_start = self.supply(range.min_height).await?;
        data.supply_end = self.supply(range.max_height).await?;
        info!(
            supply_start = data.supply_start,
            supply_end = data.supply_end,
            "supply retrieved"
        );
        Ok(())
    }

    async fn supply(&self, height: u64) -> Result<i64, CollectError> {
        with_retry("supply", height, self.retry.budget, self.retry.supply_delay, || {
            self.client.supply(height)
        })
        .await
        .map_err(|source| CollectError::Supply { height, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        Address, EvidenceType, MemoryChain, Query, SessionHeader, Transaction, TxMessage,
    };
    use time::macros::datetime;
    use time::Duration;

    fn claim(addr: &str) -> Claim {
        Claim {
            from_address: Address::new(addr),
            session_header: SessionHeader {
                app_public_key: "00".repeat(32),
                chain: "0001".into(),
                session_height: 97,
            },
            evidence_type: EvidenceType::Relay,
            total_proofs: 5,
        }
    }

    fn batch(height: u64) -> TxBatch {
        TxBatch {
            txs: vec![Transaction {
                hash: format!("tx{height}"),
                height,
                index: 0,
                code: 0,
                message: TxMessage::Other {
                    kind: "pos/Send".into(),
                },
            }],
            total_count: 1,
        }
    }

    fn chain() -> MemoryChain {
        MemoryChain::evenly_spaced(200, datetime!(2021-01-27 12:00 UTC), Duration::minutes(15))
            .with_txs(99, batch(99))
            .with_txs(100, batch(100))
            .with_claims(99, vec![claim("aa")])
            .with_supply(98, 1000)
            .with_supply(101, 1100)
    }

    fn range(min: u64, max: u64) -> HeightRange {
        HeightRange {
            min_height: min,
            max_height: max,
        }
    }

    #[tokio::test]
    async fn claims_are_read_from_previous_height() {
        let c = chain();
        let data = Collector::new(&c, RetryPolicy::immediate(0))
            .collect(range(98, 101))
            .await
            .unwrap();
        assert_eq!(data.txs.keys().copied().collect::<Vec<_>>(), vec![98, 99, 100]);
        assert!(data.claims[&99].is_empty());
        assert_eq!(data.claims[&100], vec![claim("aa")]);
        assert_eq!(data.txs[&100].txs[0].hash, "tx100");
        assert_eq!((data.supply_start, data.supply_end), (1000, 1100));
    }

    #[tokio::test]
    async fn first_two_heights_have_no_claims() {
        let c = chain().with_supply(0, 0).with_supply(3, 0);
        let data = Collector::new(&c, RetryPolicy::immediate(0))
            .collect(range(0, 3))
            .await
            .unwrap();
        assert_eq!(data.txs.len(), 3);
        assert_eq!(data.claims.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(c.calls(Query::Claims), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_per_query() {
        let c = chain()
            .fail(Query::BlockTxs, 99, 2)
            .fail(Query::Claims, 99, 2);
        let data = Collector::new(&c, RetryPolicy::immediate(2))
            .collect(range(98, 101))
            .await
            .unwrap();
        assert_eq!(data.txs[&99], batch(99));
        assert_eq!(data.claims[&100], vec![claim("aa")]);
        assert_eq!(c.calls(Query::BlockTxs), 3 + 2);
    }

    #[tokio::test]
    async fn exhausted_budget_aborts() {
        let c = chain().fail(Query::BlockTxs, 100, 3);
        let err = Collector::new(&c, RetryPolicy::immediate(2))
            .collect(range(98, 101))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::BlockTxs { height: 100, .. }));
        assert!(matches!(
            err.client_error(),
            ClientError::HttpStatus { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn missing_supply_is_fatal() {
        let c = chain();
        let err = Collector::new(&c, RetryPolicy::immediate(1))
            .collect(range(98, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Supply { height: 100, .. }));
        assert_eq!(c.calls(Query::Supply), 1 + 2);
    }

    #[tokio::test]
    async fn resume_fetches_only_missing_heights() {
        let c = chain();
        let mut data = ChainData::default();
        data.txs.insert(98, batch(98));
        data.txs.insert(99, batch(99));
        data.claims.insert(99, vec![]);
        Collector::new(&c, RetryPolicy::immediate(0))
            .collect_into(range(98, 101), &mut data)
            .await
            .unwrap();
        assert_eq!(c.calls(Query::BlockTxs), 1);
        assert_eq!(c.calls(Query::Claims), 2);
        assert_eq!(data.txs.len(), 3);
    }

    #[tokio::test]
    async fn empty_range_reads_only_supply() {
        let c = chain().with_supply(50, 7);
        let data = Collector::new(&c, RetryPolicy::immediate(0))
            .collect(range(50, 50))
            .await
            .unwrap();
        assert!(data.txs.is_empty() && data.claims.is_empty());
        assert_eq!((data.supply_start, data.supply_end), (7, 7));
        assert_eq!(c.calls(Query::BlockTxs), 0);
    }
}
