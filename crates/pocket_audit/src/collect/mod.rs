//! Per-height retrieval of transactions, claims, and supply.

mod collector;

pub use collector::{ChainData, CollectError, Collector};
