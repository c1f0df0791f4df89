//! Parallel Provisioner.
//!
//! Runs an [`Allocation`]'s entries through their providers' adapters under
//! a bounded-concurrency semaphore, routed through the shared
//! [`broker_governor::Governor`]. A provision task never fails the batch:
//! every outcome becomes a [`ProvisionResult`] with `status=active` or
//! `status=failed`, and the provisioner mints one opaque group id per call.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_governor::Governor;
use broker_proto::{Allocation, AvailabilityKind, GpuFamily, ProviderId, ProvisionResult, ProvisionStatus};
use broker_providers::ProviderRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY: usize = 6;

/// Provision every entry of `allocation` concurrently (bounded by
/// `concurrency`, default [`DEFAULT_CONCURRENCY`]), returning the per-entry
/// results in task-completion order alongside a freshly minted group id.
/// No adapter call is retried here beyond what the Governor already does
/// internally — provisioning is effectful and not safely auto-retryable.
pub async fn provision_allocation(
    registry: &ProviderRegistry,
    allocation: &Allocation,
    concurrency: Option<usize>,
) -> (String, Vec<ProvisionResult>) {
    let group_id = format!("provgrp_{}", uuid::Uuid::new_v4().simple());
    let semaphore = Arc::new(Semaphore::new(concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1)));

    let mut tasks = FuturesUnordered::new();
    for entry in &allocation.entries {
        let semaphore = Arc::clone(&semaphore);
        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await;
            provision_one(registry, entry.provider, &entry.instance_type, &entry.region, entry.gpu_family).await
        });
    }

    let mut results = Vec::with_capacity(allocation.entries.len());
    while let Some(result) = tasks.next().await {
        results.push(result);
    }

    tracing::info!(
        group_id = %group_id,
        requested = allocation.entries.len(),
        active = results.iter().filter(|r| r.status == ProvisionStatus::Active).count(),
        "parallel provisioning complete"
    );

    (group_id, results)
}

async fn provision_one(
    registry: &ProviderRegistry,
    provider_id: ProviderId,
    instance_type: &str,
    region: &str,
    gpu_family: GpuFamily,
) -> ProvisionResult {
    let start = Instant::now();

    let Some(provider) = registry.get(provider_id) else {
        return failed_result(provider_id, region, gpu_family, start.elapsed(), format!("provider {provider_id} not configured"));
    };

    let outcome = Governor::global()
        .execute_with_limits(provider_id, || provider.provision(instance_type, region, gpu_family))
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(info) => ProvisionResult {
            provider: provider_id,
            region: info.region,
            instance_id: info.instance_id,
            gpu_family,
            price_per_hour: info.price_per_hour,
            availability_kind: info.availability_kind,
            status: ProvisionStatus::Active,
            error: None,
            elapsed_ms,
        },
        Err(e) => failed_result(provider_id, region, gpu_family, start.elapsed(), e.to_string()),
    }
}

fn failed_result(
    provider: ProviderId,
    region: &str,
    gpu_family: GpuFamily,
    elapsed: Duration,
    error: String,
) -> ProvisionResult {
    tracing::debug!(provider = %provider, region, error = %error, "provision attempt failed");
    ProvisionResult {
        provider,
        region: region.to_string(),
        instance_id: String::new(),
        gpu_family,
        price_per_hour: 0.0,
        availability_kind: AvailabilityKind::OnDemand,
        status: ProvisionStatus::Failed,
        error: Some(error),
        elapsed_ms: elapsed.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_proto::{Allocation, AllocationEntry};
    use broker_providers::stub::StubProvider;

    fn allocation_of(providers: &[ProviderId]) -> Allocation {
        Allocation {
            entries: providers
                .iter()
                .map(|p| AllocationEntry {
                    provider: *p,
                    instance_type: "x".to_string(),
                    region: "us-east".to_string(),
                    gpu_family: GpuFamily::A100,
                    availability_kind: AvailabilityKind::OnDemand,
                    price_per_hour: 1.0,
                })
                .collect(),
            relaxed: false,
        }
    }

    #[tokio::test]
    async fn test_unregistered_provider_becomes_failed_result() {
        let registry = ProviderRegistry::new();
        let allocation = allocation_of(&[ProviderId::Aws]);
        let (group_id, results) = provision_allocation(&registry, &allocation, None).await;
        assert!(!group_id.is_empty());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ProvisionStatus::Failed);
        assert!(results[0].error.as_ref().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn test_stub_provider_unsupported_becomes_failed_result() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(StubProvider::new(ProviderId::Oracle)));
        let allocation = allocation_of(&[ProviderId::Oracle]);
        let (_, results) = provision_allocation(&registry, &allocation, None).await;
        assert_eq!(results[0].status, ProvisionStatus::Failed);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_others() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(StubProvider::new(ProviderId::Oracle)));
        let allocation = allocation_of(&[ProviderId::Oracle, ProviderId::Aws, ProviderId::Gcp]);
        let (_, results) = provision_allocation(&registry, &allocation, None).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == ProvisionStatus::Failed));
    }

    #[tokio::test]
    async fn test_group_id_unique_per_call() {
        let registry = ProviderRegistry::new();
        let allocation = allocation_of(&[ProviderId::Aws]);
        let (g1, _) = provision_allocation(&registry, &allocation, None).await;
        let (g2, _) = provision_allocation(&registry, &allocation, None).await;
        assert_ne!(g1, g2);
    }
}
