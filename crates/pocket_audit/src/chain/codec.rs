//! Decoding of node RPC payloads into domain types, and address derivation.
//!
//! The codec is an explicit value handed to the client and the aggregator; there is
//! no process-wide registry. `JsonCodec` understands the JSON shapes served by the
//! node's `/v1/query/*` routes.

use crate::chain::types::{
    Address, Block, Claim, EvidenceType, ProofMsg, SessionHeader, Transaction, TxBatch, TxMessage,
};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Message type tag of a proof transaction.
pub const PROOF_MSG_TYPE: &str = "pocketcore/proof";

const ED25519_PUBLIC_KEY_LEN: usize = 32;
const ADDRESS_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error("malformed payload at height {height}: {reason}")]
    Malformed { height: u64, reason: String },
}

/// Capability to turn raw node payloads into domain objects.
pub trait ChainCodec: Send + Sync {
    fn decode_block(&self, bytes: &[u8]) -> Result<Block, CodecError>;
    fn decode_tx_search(&self, bytes: &[u8]) -> Result<TxBatch, CodecError>;
    fn decode_state(&self, bytes: &[u8]) -> Result<Vec<Claim>, CodecError>;
    /// Decode one transaction body (the signed tx, not the search wrapper) into its message.
    fn decode_transaction(&self, bytes: &[u8], height: u64) -> Result<TxMessage, CodecError>;
    fn derive_address(&self, public_key_hex: &str) -> Result<Address, CodecError>;
}

/// Codec for the node's JSON RPC responses.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl ChainCodec for JsonCodec {
    fn decode_block(&self, bytes: &[u8]) -> Result<Block, CodecError> {
        let raw: RawBlockResponse = serde_json::from_slice(bytes)?;
        let header = raw.block.header;
        let time = OffsetDateTime::parse(header.time.trim(), &Rfc3339)
            .map_err(|e| {
                let raw_time = &header.time;
                CodecError::InvalidTime(format!("{raw_time}: {e}"))
            })?;
        Ok(Block {
            height: header.height,
            time,
        })
    }

    fn decode_tx_search(&self, bytes: &[u8]) -> Result<TxBatch, CodecError> {
        let raw: RawTxSearch = serde_json::from_slice(bytes)?;
        let mut txs = Vec::with_capacity(raw.txs.len());
        for entry in raw.txs {
            let body = serde_json::to_vec(&entry.std_tx)?;
            let message = self.decode_transaction(&body, entry.height)?;
            txs.push(Transaction {
                hash: entry.hash,
                height: entry.height,
                index: entry.index,
                code: entry.tx_result.code,
                message,
            });
        }
        let total_count = raw.total_count.unwrap_or(txs.len() as u64);
        Ok(TxBatch { txs, total_count })
    }

    fn decode_state(&self, bytes: &[u8]) -> Result<Vec<Claim>, CodecError> {
        let raw: RawStateResponse = serde_json::from_slice(bytes)?;
        let claims = raw.app_state.pocketcore.claims.unwrap_or_default();
        claims
            .into_iter()
            .map(|c| {
                let c = c.into_inner();
                let evidence_type = EvidenceType::from_code(c.evidence_type).ok_or_else(|| {
                    CodecError::Malformed {
                        height: c.header.session_height,
                        reason: format!("unknown evidence type {}", c.evidence_type),
                    }
                })?;
                Ok(Claim {
                    from_address: Address::new(&c.from_address),
                    session_header: SessionHeader {
                        app_public_key: c.header.app_public_key,
                        chain: c.header.chain,
                        session_height: c.header.session_height,
                    },
                    evidence_type,
                    total_proofs: c.total_proofs,
                })
            })
            .collect()
    }

    fn decode_transaction(&self, bytes: &[u8], height: u64) -> Result<TxMessage, CodecError> {
        let raw: RawStdTx = serde_json::from_slice(bytes)?;
        if raw.msg.kind != PROOF_MSG_TYPE {
            return Ok(TxMessage::Other { kind: raw.msg.kind });
        }
        let proof: RawProof =
            serde_json::from_value(raw.msg.value).map_err(|e| CodecError::Malformed {
                height,
                reason: format!("proof msg: {e}"),
            })?;
        let leaf = proof.leaf.into_inner();
        let signer = self.derive_address(&leaf.servicer_pub_key)?;
        Ok(TxMessage::Proof(ProofMsg { signer }))
    }

    fn derive_address(&self, public_key_hex: &str) -> Result<Address, CodecError> {
        address_from_public_key(public_key_hex)
    }
}

/// Address of an ed25519 public key: first 20 bytes of SHA-256 over the key.
pub fn address_from_public_key(public_key_hex: &str) -> Result<Address, CodecError> {
    let key = public_key_hex.trim();
    let bytes = hex::decode(key).map_err(|_| CodecError::InvalidPublicKey(key.to_string()))?;
    if bytes.len() != ED25519_PUBLIC_KEY_LEN {
        return Err(CodecError::InvalidPublicKey(key.to_string()));
    }
    let digest = Sha256::digest(bytes);
    Ok(Address::new(hex::encode(&digest[..ADDRESS_LEN])))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u64),
    Str(String),
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Amino-JSON objects are sometimes wrapped as `{"type": .., "value": ..}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped { value: T },
    Plain(T),
}

impl<T> MaybeWrapped<T> {
    fn into_inner(self) -> T {
        match self {
            MaybeWrapped::Wrapped { value } => value,
            MaybeWrapped::Plain(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct RawBlockResponse {
    block: RawBlock,
}

#[derive(Deserialize)]
struct RawBlock {
    header: RawHeader,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(deserialize_with = "de_u64")]
    height: u64,
    time: String,
}

#[derive(Deserialize)]
struct RawTxSearch {
    #[serde(default)]
    txs: Vec<RawTxResult>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    total_count: Option<u64>,
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    de_u64(d).map(Some)
}

#[derive(Deserialize)]
struct RawTxResult {
    #[serde(default)]
    hash: String,
    #[serde(deserialize_with = "de_u64")]
    height: u64,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    tx_result: RawTxOutcome,
    #[serde(rename = "stdTx", alias = "std_tx")]
    std_tx: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct RawTxOutcome {
    #[serde(default)]
    code: u32,
}

#[derive(Deserialize)]
struct RawStdTx {
    msg: RawMsg,
}

#[derive(Deserialize)]
struct RawMsg {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct RawProof {
    leaf: MaybeWrapped<RawLeaf>,
}

#[derive(Deserialize)]
struct RawLeaf {
    servicer_pub_key: String,
}

#[derive(Deserialize)]
struct RawStateResponse {
    app_state: RawAppState,
}

#[derive(Deserialize)]
struct RawAppState {
    pocketcore: RawPocketCore,
}

#[derive(Deserialize)]
struct RawPocketCore {
    #[serde(default)]
    claims: Option<Vec<MaybeWrapped<RawClaim>>>,
}

#[derive(Deserialize)]
struct RawClaim {
    header: RawSessionHeader,
    #[serde(deserialize_with = "de_u64")]
    total_proofs: u64,
    from_address: String,
    #[serde(deserialize_with = "de_u64")]
    evidence_type: u64,
}

#[derive(Deserialize)]
struct RawSessionHeader {
    app_public_key: String,
    chain: String,
    #[serde(default, deserialize_with = "de_u64")]
    session_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn address_known_vector() {
        let addr = address_from_public_key(ZERO_KEY).unwrap();
        assert_eq!(addr.as_str(), "66687aadf862bd776c8fc18b8e9f8e2008971485");
    }

    #[test]
    fn address_rejects_bad_keys() {
        assert!(matches!(
            address_from_public_key("zz"),
            Err(CodecError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            address_from_public_key("abcd"),
            Err(CodecError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn decode_block_string_height() {
        let body = br#"{"block":{"header":{"height":"1000","time":"2021-01-27T10:00:00.123456789Z"}}}"#;
        let block = JsonCodec.decode_block(body).unwrap();
        assert_eq!(block.height, 1000);
        assert_eq!(block.time.nanosecond(), 123_456_789);
    }

    #[test]
    fn decode_non_proof_message() {
        let body = br#"{"msg":{"type":"pos/Send","value":{"amount":"1"}}}"#;
        let msg = JsonCodec.decode_transaction(body, 5).unwrap();
        assert_eq!(
            msg,
            TxMessage::Other {
                kind: "pos/Send".into()
            }
        );
    }

    #[test]
    fn decode_proof_with_wrapped_leaf() {
        let body = format!(
            r#"{{"msg":{{"type":"pocketcore/proof","value":{{"leaf":{{"type":"pocketcore/relay_proof","value":{{"servicer_pub_key":"{ZERO_KEY}"}}}},"evidence_type":1}}}}}}"#
        );
        let msg = JsonCodec.decode_transaction(body.as_bytes(), 5).unwrap();
        match msg {
            TxMessage::Proof(p) => {
                assert_eq!(p.signer.as_str(), "66687aadf862bd776c8fc18b8e9f8e2008971485");
            }
            other => panic!("expected proof, got {other:?}"),
        }
    }

    #[test]
    fn decode_proof_without_leaf_is_malformed() {
        let body = br#"{"msg":{"type":"pocketcore/proof","value":{}}}"#;
        assert!(matches!(
            JsonCodec.decode_transaction(body, 7),
            Err(CodecError::Malformed { height: 7, .. })
        ));
    }

    #[test]
    fn decode_state_null_claims() {
        let body = br#"{"app_state":{"pocketcore":{"claims":null}}}"#;
        assert!(JsonCodec.decode_state(body).unwrap().is_empty());
    }

    #[test]
    fn decode_state_rejects_unknown_evidence() {
        let body = br#"{"app_state":{"pocketcore":{"claims":[{"header":{"app_public_key":"aa","chain":"0001","session_height":"1"},"total_proofs":"3","from_address":"AB","evidence_type":9}]}}}"#;
        assert!(matches!(
            JsonCodec.decode_state(body),
            Err(CodecError::Malformed { .. })
        ));
    }
}
