//! One audit run: resolve the window, collect chain data, fold it into a report.

use crate::aggregate::{compute_report, AggregateError, Provenance, Report};
use crate::chain::{ChainClient, ChainCodec, RetryPolicy};
use crate::collect::{CollectError, Collector};
use crate::timeline::{ByBlock, HeightResolver, Params, ResolveError, Selection};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("resolve: {0}")]
    Resolve(#[from] ResolveError),
    #[error("collect: {0}")]
    Collect(#[from] CollectError),
    #[error("aggregate: {0}")]
    Aggregate(#[from] AggregateError),
}

#[derive(Clone, Debug)]
pub struct AuditPlan {
    pub selection: Selection,
    pub params: Params,
    pub retry: RetryPolicy,
}

/// Produce a complete report or an error; there is no partial result.
pub async fn run_audit<C: ChainClient + ?Sized>(
    client: &C,
    codec: &dyn ChainCodec,
    plan: &AuditPlan,
) -> Result<Report, RunError> {
    info!(selector = plan.selection.selector(), "converting selection to block heights");
    let range = HeightResolver::new(client, plan.params, plan.retry.clone())
        .resolve(&plan.selection)
        .await?;

    info!("retrieving transactions and claims");
    let data = Collector::new(client, plan.retry.clone())
        .collect(range)
        .await?;

    info!("creating report from chain data");
    let by_block = match plan.selection {
        Selection::ByBlock(b) => b,
        Selection::Timeline(_) => ByBlock::default(),
    };
    let provenance = Provenance {
        selector: plan.selection.selector().to_string(),
        range,
        by_block,
    };
    Ok(compute_report(&data, provenance, codec)?)
}
