//! Shared fixtures for the end-to-end scenario tests under `tests/`.

use std::collections::HashMap;

use broker_proto::{AllocationEntry, AvailabilityKind, GpuFamily, ProviderId, ProvisionResult, ProvisionStatus, Quote};

/// Build a quote with the fields the spread allocator and cost analysis
/// actually look at; callers override the rest via the literal inputs in
/// each scenario.
pub fn quote(provider: ProviderId, gpu_family: GpuFamily, price: f64, region: &str, available: bool) -> Quote {
    Quote {
        provider,
        instance_type: format!("{provider}-{gpu_family}"),
        gpu_family,
        price_per_hour: price,
        region: region.to_string(),
        available,
        availability_kind: AvailabilityKind::OnDemand,
        gpu_count: Some(1),
        vcpu: None,
        memory_gb: None,
        latency_ms: 50.0,
        optimization_score: 0.0,
        metadata: HashMap::new(),
    }
}

/// Mirrors the engine's private `mock_result`: a synthetic, always-active
/// provision result for an allocation entry, used to check dry-run shape
/// without reaching into the engine crate's internals.
pub fn mock_result(entry: &AllocationEntry) -> ProvisionResult {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    ProvisionResult {
        provider: entry.provider,
        region: entry.region.clone(),
        instance_id: format!("mock_{}_{}", entry.provider.as_str(), &suffix[..12]),
        gpu_family: entry.gpu_family,
        price_per_hour: entry.price_per_hour,
        availability_kind: entry.availability_kind,
        status: ProvisionStatus::Active,
        error: None,
        elapsed_ms: 0,
    }
}
