//! Chain access: RPC client, payload codec, response cache, retry policy.

mod cache;
pub mod client;
pub mod codec;
mod memory;
pub mod retry;
pub mod types;

pub use cache::{CacheError, ResponseCache};
pub use client::{ChainClient, ClientConfig, ClientError, HttpChainClient};
pub use codec::{address_from_public_key, ChainCodec, CodecError, JsonCodec};
pub use memory::{MemoryChain, Query};
pub use retry::{with_retry, RetryPolicy};
pub use types::{
    Address, Block, Claim, EvidenceType, ProofMsg, SessionHeader, Transaction, TxBatch, TxMessage,
};
