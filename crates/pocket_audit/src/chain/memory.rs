//! In-memory chain for offline replay and tests, with failure injection.

use crate::chain::client::{ChainClient, ClientError};
use crate::chain::types::{Block, Claim, TxBatch};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

/// Which query an injected failure applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Query {
    LatestHeight,
    Block,
    BlockTxs,
    Claims,
    Supply,
}

#[derive(Default)]
pub struct MemoryChain {
    latest_height: u64,
    blocks: BTreeMap<u64, Block>,
    txs: BTreeMap<u64, TxBatch>,
    claims: BTreeMap<u64, Vec<Claim>>,
    supply: BTreeMap<u64, i64>,
    failures: Mutex<HashMap<(Query, u64), u32>>,
    calls: Mutex<HashMap<Query, u64>>,
    block_probes: AtomicU64,
}

impl MemoryChain {
    /// Chain of `latest_height + 1` blocks spaced `spacing` apart, ending at `latest_time`.
    pub fn evenly_spaced(latest_height: u64, latest_time: OffsetDateTime, spacing: Duration) -> Self {
        let blocks = (0..=latest_height)
            .map(|h| {
                let behind = (latest_height - h) as i32;
                (
                    h,
                    Block {
                        height: h,
                        time: latest_time - spacing * behind,
                    },
                )
            })
            .collect();
        Self {
            latest_height,
            blocks,
            ..Default::default()
        }
    }

    pub fn with_txs(mut self, height: u64, batch: TxBatch) -> Self {
        self.txs.insert(height, batch);
        self
    }

    /// Claims visible in the state at `state_height`.
    pub fn with_claims(mut self, state_height: u64, claims: Vec<Claim>) -> Self {
        self.claims.insert(state_height, claims);
        self
    }

    pub fn with_supply(mut self, height: u64, total: i64) -> Self {
        self.supply.insert(height, total);
        self
    }

    /// Make the next `times` calls of `query` at `height` fail with HTTP 500.
    pub fn fail(self, query: Query, height: u64, times: u32) -> Self {
        if let Ok(mut f) = self.failures.lock() {
            f.insert((query, height), times);
        }
        self
    }

    /// Number of calls made for `query`, failed ones included.
    pub fn calls(&self, query: Query) -> u64 {
        self.calls
            .lock()
            .map(|c| c.get(&query).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Successful block fetches, i.e. binary-search probes plus the latest block.
    pub fn block_probes(&self) -> u64 {
        self.block_probes.load(Ordering::Relaxed)
    }

    fn enter(&self, query: Query, height: u64) -> Result<(), ClientError> {
        if let Ok(mut c) = self.calls.lock() {
            *c.entry(query).or_default() += 1;
        }
        let mut failures = match self.failures.lock() {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        match failures.get_mut(&(query, height)) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(ClientError::HttpStatus {
                    status: 500,
                    body: format!("injected {query:?} failure at {height}"),
                })
            }
            _ => Ok(()),
        }
    }

    fn missing(what: &str, height: u64) -> ClientError {
        ClientError::HttpStatus {
            status: 404,
            body: format!("no {what} at height {height}"),
        }
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn latest_height(&self) -> Result<u64, ClientError> {
        self.enter(Query::LatestHeight, 0)?;
        Ok(self.latest_height)
    }

    async fn block(&self, height: u64) -> Result<Block, ClientError> {
        self.enter(Query::Block, height)?;
        let block = self
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| Self::missing("block", height))?;
        self.block_probes.fetch_add(1, Ordering::Relaxed);
        Ok(block)
    }

    async fn block_txs(&self, height: u64) -> Result<TxBatch, ClientError> {
        self.enter(Query::BlockTxs, height)?;
        Ok(self.txs.get(&height).cloned().unwrap_or_default())
    }

    async fn claims(&self, height: u64) -> Result<Vec<Claim>, ClientError> {
        self.enter(Query::Claims, height)?;
        Ok(self.claims.get(&height).cloned().unwrap_or_default())
    }

    async fn supply(&self, height: u64) -> Result<i64, ClientError> {
        self.enter(Query::Supply, height)?;
        self.supply
            .get(&height)
            .copied()
            .ok_or_else(|| Self::missing("supply", height))
    }
}
