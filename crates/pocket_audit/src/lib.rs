//! pocket_audit — relay and supply audit for Pocket-style chains.
//!
//! Resolves a time or height window to block heights, collects block transactions
//! and claims over it, matches proofs to claims, and reports relays per node, per
//! app and per chain along with net minting. Read-only; no keys; no signing.

pub mod aggregate;
pub mod chain;
pub mod collect;
pub mod config;
pub mod run;
pub mod timeline;

pub use aggregate::{compute_report, AppReport, NodeReport, Provenance, Report, ServiceReport};
pub use chain::{ChainClient, ChainCodec, HttpChainClient, JsonCodec, MemoryChain, RetryPolicy};
pub use collect::{ChainData, Collector};
pub use config::{AuditConfig, Overrides};
pub use run::{run_audit, AuditPlan, RunError};
pub use timeline::{ByBlock, HeightRange, HeightResolver, Params, Selection, Timeline, Unit};
