//! Quote Aggregator.
//!
//! Fans out `get_quotes` across the enabled provider adapters with a
//! caller-bounded parallelism limit, scoring every returned quote with the
//! shared [`broker_proto::optimization_score`] formula. Per-provider
//! failures and timeouts are dropped silently — the adapter has already
//! logged them — so the aggregator's own result is never an error.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use broker_proto::{GpuFamily, ProviderId, Quote, ScoreWeights};
use broker_providers::ProviderRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

pub const DEFAULT_PARALLELISM: usize = 6;
const UNLIMITED_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch and score quotes for `gpu_family` across `provider_ids` (or every
/// registered non-demo adapter when `None`), optionally scoped to one
/// region. Never returns an error: empty selections, all-failed adapters,
/// and all-unavailable quotes all collapse to an empty list.
pub async fn aggregate_quotes(
    registry: &ProviderRegistry,
    gpu_family: GpuFamily,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
) -> Vec<Quote> {
    aggregate_quotes_weighted(registry, gpu_family, region, provider_ids, parallelism, None).await
}

/// As [`aggregate_quotes`], but with an explicit set of scoring weights
/// (`spec.md §9`'s `optimization_settings`) instead of the default split.
pub async fn aggregate_quotes_weighted(
    registry: &ProviderRegistry,
    gpu_family: GpuFamily,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
    weights: Option<ScoreWeights>,
) -> Vec<Quote> {
    let ids: Vec<ProviderId> = match provider_ids {
        Some(ids) => ids.to_vec(),
        None => registry.enabled_ids(),
    };
    if ids.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(parallelism.unwrap_or(DEFAULT_PARALLELISM).max(1)));
    let weights = weights.unwrap_or_default();
    let region_owned = region.map(str::to_string);

    let mut tasks = FuturesUnordered::new();
    for id in ids {
        let Some(provider) = registry.get(id) else {
            continue;
        };
        let semaphore = Arc::clone(&semaphore);
        let region_ref = region_owned.clone();
        let timeout = broker_governor::defaults::for_provider(id)
            .map(|cfg| cfg.timeout)
            .unwrap_or(UNLIMITED_TIMEOUT);

        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await;
            match tokio::time::timeout(timeout, provider.get_quotes(gpu_family, region_ref.as_deref())).await {
                Ok(quotes) => quotes,
                Err(_) => {
                    tracing::debug!(provider = %id, "quote fetch timed out");
                    Vec::new()
                }
            }
        });
    }

    let mut merged = Vec::new();
    while let Some(mut quotes) = tasks.next().await {
        for quote in &mut quotes {
            quote.optimization_score = broker_proto::optimization_score(
                quote.price_per_hour,
                quote.available,
                quote.latency_ms,
                quote.provider.default_reliability(),
                weights,
            );
        }
        merged.append(&mut quotes);
    }

    tracing::info!(gpu_family = %gpu_family, count = merged.len(), "quote aggregation complete");
    merged
}
