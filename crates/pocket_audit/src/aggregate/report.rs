//! Relay report: proof/claim matching and per-node, per-app service totals.

use crate::chain::{Address, ChainCodec, Claim, CodecError, EvidenceType, TxMessage};
use crate::collect::ChainData;
use crate::timeline::{ByBlock, HeightRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("no claim for valid proof at height {height} from {signer}")]
    ProofWithoutClaim { height: u64, signer: Address },
    #[error("unable to derive app address at height {height}: {source}")]
    AddressDerivation {
        height: u64,
        #[source]
        source: CodecError,
    },
}

/// One matched proof/claim pair, seen from one side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    /// The counterparty: the app for a node report, the node for an app report.
    pub address: Address,
    pub total_relays: u64,
    #[serde(rename = "relay_chain")]
    pub chain_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    #[serde(rename = "serviced")]
    pub service: Vec<ServiceReport>,
    pub total_relays: u64,
    #[serde(rename = "service_by_chain")]
    pub by_chain: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppReport {
    pub serviced_by: Vec<ServiceReport>,
    pub total_relays: u64,
    #[serde(rename = "serviced_by_chain")]
    pub by_chain: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub total_relays_completed: u64,
    pub total_challenges_completed: u64,
    pub total_minted: i64,
    pub total_good_txs: u64,
    pub total_bad_txs: u64,
    #[serde(rename = "proof_msgs")]
    pub total_proof_txs: u64,
    #[serde(rename = "bad_txs_count_by_error")]
    pub bad_tx_count_by_code: BTreeMap<u32, u64>,
    #[serde(rename = "node_report")]
    pub node_reports: BTreeMap<Address, NodeReport>,
    #[serde(rename = "app_report")]
    pub app_reports: BTreeMap<Address, AppReport>,
    pub selector: String,
    pub timeline_report: HeightRange,
    pub by_block: ByBlock,
}

/// Where the audited heights came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Provenance {
    pub selector: String,
    pub range: HeightRange,
    pub by_block: ByBlock,
}

/// Fold collected chain data into a report. Heights are visited in ascending order,
/// so the same input always yields the same report, service-record order included.
pub fn compute_report(
    data: &ChainData,
    provenance: Provenance,
    codec: &dyn ChainCodec,
) -> Result<Report, AggregateError> {
    let mut report = Report {
        selector: provenance.selector,
        timeline_report: provenance.range,
        by_block: provenance.by_block,
        ..Default::default()
    };
    let no_claims: Vec<Claim> = Vec::new();

    for (&height, batch) in &data.txs {
        let claims = data.claims.get(&height).unwrap_or(&no_claims);
        for tx in &batch.txs {
            if tx.code != 0 {
                report.total_bad_txs += 1;
                *report.bad_tx_count_by_code.entry(tx.code).or_default() += 1;
                debug!(height, hash = %tx.hash, code = tx.code, "bad tx");
                continue;
            }
            report.total_good_txs += 1;

            let proof = match &tx.message {
                TxMessage::Proof(p) => p,
                TxMessage::Other { .. } => continue,
            };
            report.total_proof_txs += 1;

            let mut matching = claims.iter().filter(|c| c.from_address == proof.signer);
            let claim = matching
                .next()
                .ok_or_else(|| AggregateError::ProofWithoutClaim {
                    height,
                    signer: proof.signer.clone(),
                })?;
            let extra = matching.count();
            if extra > 0 {
                warn!(height, signer = %proof.signer, extra, "multiple claims for signer, using the first");
            }

            if claim.evidence_type != EvidenceType::Relay {
                report.total_challenges_completed += 1;
                continue;
            }

            let app = codec
                .derive_address(&claim.session_header.app_public_key)
                .map_err(|source| AggregateError::AddressDerivation { height, source })?;
            let node = claim.from_address.clone();
            let relays = claim.total_proofs;
            let chain = &claim.session_header.chain;

            let node_report = report.node_reports.entry(node.clone()).or_default();
            node_report.total_relays = node_report.total_relays.saturating_add(relays);
            let on_chain = node_report.by_chain.entry(chain.clone()).or_default();
            *on_chain = on_chain.saturating_add(relays);
            node_report.service.push(ServiceReport {
                address: app.clone(),
                total_relays: relays,
                chain_id: chain.clone(),
            });

            let app_report = report.app_reports.entry(app).or_default();
            app_report.total_relays = app_report.total_relays.saturating_add(relays);
            let on_chain = app_report.by_chain.entry(chain.clone()).or_default();
            *on_chain = on_chain.saturating_add(relays);
            app_report.serviced_by.push(ServiceReport {
                address: node,
                total_relays: relays,
                chain_id: chain.clone(),
            });

            report.total_relays_completed = report.total_relays_completed.saturating_add(relays);
        }
    }

    report.total_minted = data.supply_end.saturating_sub(data.supply_start);
    info!(
        relays = report.total_relays_completed,
        challenges = report.total_challenges_completed,
        proofs = report.total_proof_txs,
        good = report.total_good_txs,
        bad = report.total_bad_txs,
        minted = report.total_minted,
        "report created"
    );
    Ok(report)
}
