//! Turns a selection into a concrete height range using the chain's block times.

use crate::chain::{with_retry, Block, ChainClient, ClientError, RetryPolicy};
use crate::timeline::model::{HeightRange, Params, Selection, Timeline, Unit};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

/// Seed estimate only; the search does not depend on it for correctness.
const ASSUMED_MINUTES_PER_BLOCK: i64 = 15;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(
        "the start height is less than 0 ({0}), ensure the node is synced and the start and end values are within bounds"
    )]
    InvalidMinimumHeight(i64),
    #[error("resolved range is inverted: min {min} > max {max}")]
    InvertedRange { min: i64, max: i64 },
    #[error("target time {offset_minutes} minutes from the chain tip is out of range")]
    TargetOutOfRange { offset_minutes: i64 },
}

pub struct HeightResolver<'a, C: ChainClient + ?Sized> {
    client: &'a C,
    params: Params,
    retry: RetryPolicy,
}

impl<'a, C: ChainClient + ?Sized> HeightResolver<'a, C> {
    pub fn new(client: &'a C, params: Params, retry: RetryPolicy) -> Self {
        Self {
            client,
            params,
            retry,
        }
    }

    pub async fn resolve(&self, selection: &Selection) -> Result<HeightRange, ResolveError> {
        match selection {
            Selection::ByBlock(b) => Ok(HeightRange {
                min_height: b.start(),
                max_height: b.end(),
            }),
            Selection::Timeline(t) => self.resolve_timeline(t).await,
        }
    }

    /// The tip block; its own height and time anchor every relative offset.
    pub async fn latest_block(&self) -> Result<Block, ResolveError> {
        let budget = self.retry.budget;
        let delay = self.retry.block_delay;
        let height = with_retry("height", 0, budget, delay, || self.client.latest_height()).await?;
        let block = with_retry("block", height, budget, delay, || self.client.block(height)).await?;
        info!(height = block.height, time = %block.time, "latest block");
        Ok(block)
    }

    pub async fn resolve_timeline(&self, timeline: &Timeline) -> Result<HeightRange, ResolveError> {
        let latest = self.latest_block().await?;
        let tip = latest.height as i64;
        let (min, max) = match timeline.unit().minutes() {
            None => {
                let scale = match timeline.unit() {
                    Unit::Session => self.params.blocks_per_session,
                    _ => 1,
                };
                (
                    tip.saturating_add(timeline.start().saturating_mul(scale)),
                    tip.saturating_add(timeline.end().saturating_mul(scale)),
                )
            }
            Some(unit_minutes) => {
                let target_start = offset_time(latest.time, timeline.start(), unit_minutes)?;
                let target_end = offset_time(latest.time, timeline.end(), unit_minutes)?;
                info!(
                    unit = %timeline.unit(),
                    %target_start,
                    %target_end,
                    approx_block_time_in_min = self.params.approx_block_time_minutes,
                    "resolving target times"
                );
                let start = self.closest_height(target_start, &latest).await?;
                let end = self.closest_height(target_end, &latest).await?;
                (start as i64, end as i64)
            }
        };
        if min < 0 {
            return Err(ResolveError::InvalidMinimumHeight(min));
        }
        if max < min {
            return Err(ResolveError::InvertedRange { min, max });
        }
        let range = HeightRange {
            min_height: min as u64,
            max_height: max as u64,
        };
        info!(
            min_height = range.min_height,
            max_height = range.max_height,
            "timeline resolved"
        );
        Ok(range)
    }

    /// Height whose block time is closest to `target`, searching `[0, latest.height]`.
    ///
    /// The first probe is a seed estimated from a fixed block time; later probes
    /// bisect on block timestamps until the bounds are adjacent. Only strictly
    /// closer blocks replace the current best, so ties keep the earlier probe.
    pub async fn closest_height(
        &self,
        target: OffsetDateTime,
        latest: &Block,
    ) -> Result<u64, ResolveError> {
        let behind_minutes = (latest.time - target).whole_minutes();
        let seed = (latest.height as i64)
            .saturating_sub(behind_minutes.div_euclid(ASSUMED_MINUTES_PER_BLOCK))
            .clamp(0, latest.height as i64) as u64;

        let (mut lo, mut hi) = (0u64, latest.height);
        let mut pivot = seed;
        let mut closest = seed;
        let mut closest_diff: Option<Duration> = None;
        let mut probes: u32 = 0;
        while lo < hi && hi - lo != 1 {
            let block = with_retry(
                "block",
                pivot,
                self.retry.budget,
                self.retry.block_delay,
                || self.client.block(pivot),
            )
            .await?;
            probes += 1;
            if block.time < target {
                lo = pivot;
            } else {
                hi = pivot;
            }
            let diff = (target - block.time).abs();
            let improved = match closest_diff {
                Some(best) => diff < best,
                None => true,
            };
            if improved {
                closest_diff = Some(diff);
                closest = block.height;
            }
            debug!(lo, hi, pivot, closest, "binary search step");
            pivot = lo + (hi - lo) / 2;
        }
        debug!(%target, seed, closest, probes, "closest height found");
        Ok(closest)
    }
}

fn offset_time(
    anchor: OffsetDateTime,
    offset: i64,
    unit_minutes: i64,
) -> Result<OffsetDateTime, ResolveError> {
    let offset_minutes = offset.saturating_mul(unit_minutes);
    anchor
        .checked_add(Duration::minutes(offset_minutes))
        .ok_or(ResolveError::TargetOutOfRange { offset_minutes })
}
