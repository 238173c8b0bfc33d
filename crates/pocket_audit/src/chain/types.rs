//! Decoded chain objects: blocks, transactions, claims.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Hex-encoded 20-byte account address (lowercase).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap a hex address, normalizing to lowercase.
    pub fn new(hex_addr: impl AsRef<str>) -> Self {
        Self(hex_addr.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub time: OffsetDateTime,
}

/// Whether a claim is for serviced relays or for a challenge (dispute).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Relay,
    Challenge,
}

impl EvidenceType {
    /// Node wire value: 1 = relay, 2 = challenge.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Self::Relay),
            2 => Some(Self::Challenge),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHeader {
    pub app_public_key: String,
    pub chain: String,
    pub session_height: u64,
}

/// A claim as it appears in end-of-block state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    pub from_address: Address,
    pub session_header: SessionHeader,
    pub evidence_type: EvidenceType,
    pub total_proofs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofMsg {
    /// Servicer that submitted the proof.
    pub signer: Address,
}

/// Message carried by a transaction. Only proofs matter to the audit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxMessage {
    Proof(ProofMsg),
    Other { kind: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub hash: String,
    pub height: u64,
    pub index: u32,
    /// Result code; 0 is success.
    pub code: u32,
    pub message: TxMessage,
}

/// All transactions included in one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxBatch {
    pub txs: Vec<Transaction>,
    pub total_count: u64,
}

impl TxBatch {
    pub fn extend(&mut self, page: TxBatch) {
        self.total_count = self.total_count.max(page.total_count);
        self.txs.extend(page.txs);
    }
}
