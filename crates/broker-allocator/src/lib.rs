//! Spread Allocator.
//!
//! Picks N quotes from a candidate list subject to a price ceiling and a
//! per-provider concentration cap, relaxing the cap only if the primary
//! pass comes up short. Pure and synchronous: no I/O, no network, no
//! clock reads beyond what the caller already gathered into `Quote`s.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use broker_proto::{Allocation, AllocationEntry, Quote};

pub use error::AllocatorError;

/// Allocate `desired_count` entries from `quotes`, honoring an optional
/// price ceiling and a per-provider cap of `ceil(desired_count / 2)`
/// (minimum 1). Demo quotes are always excluded — they never participate
/// in real allocation.
pub fn allocate(quotes: &[Quote], desired_count: usize, price_ceiling: Option<f64>) -> Result<Allocation, AllocatorError> {
    if desired_count == 0 {
        return Err(AllocatorError::InvalidCount);
    }

    let mut candidates: Vec<&Quote> = quotes
        .iter()
        .filter(|q| q.available)
        .filter(|q| !q.is_demo())
        .filter(|q| price_ceiling.is_none_or(|ceiling| q.price_per_hour <= ceiling))
        .collect();

    // Stable sort: ties keep the Aggregator's completion order.
    candidates.sort_by(|a, b| a.price_per_hour.total_cmp(&b.price_per_hour));

    let cap = desired_count.div_ceil(2).max(1);
    let mut per_provider: HashMap<_, usize> = HashMap::new();
    let mut entries: Vec<AllocationEntry> = Vec::with_capacity(desired_count);

    for quote in &candidates {
        if entries.len() == desired_count {
            break;
        }
        let used = per_provider.entry(quote.provider).or_insert(0);
        if *used >= cap {
            continue;
        }
        *used += 1;
        entries.push(to_entry(quote));
    }

    // Relaxation ignores the per-provider cap entirely and refills from the
    // same sorted candidate list, repeating quotes as needed — it does not
    // track what was already picked.
    let relaxed = entries.len() < desired_count;
    if relaxed && !candidates.is_empty() {
        let mut i = 0;
        while entries.len() < desired_count {
            entries.push(to_entry(candidates[i % candidates.len()]));
            i += 1;
        }
    }

    entries.truncate(desired_count);
    tracing::info!(
        requested = desired_count,
        picked = entries.len(),
        relaxed,
        "spread allocation complete"
    );

    Ok(Allocation { entries, relaxed })
}

fn to_entry(quote: &Quote) -> AllocationEntry {
    AllocationEntry {
        provider: quote.provider,
        instance_type: quote.instance_type.clone(),
        region: quote.region.clone(),
        gpu_family: quote.gpu_family,
        availability_kind: quote.availability_kind,
        price_per_hour: quote.price_per_hour,
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum AllocatorError {
        #[error("desired count must be at least 1")]
        InvalidCount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_proto::{AvailabilityKind, GpuFamily, ProviderId};
    use std::collections::HashMap as Map;

    fn quote(provider: ProviderId, price: f64, available: bool) -> Quote {
        Quote {
            provider,
            instance_type: format!("{provider}-x"),
            gpu_family: GpuFamily::A100,
            price_per_hour: price,
            region: "us-east".to_string(),
            available,
            availability_kind: AvailabilityKind::OnDemand,
            gpu_count: Some(1),
            vcpu: None,
            memory_gb: None,
            latency_ms: 50.0,
            optimization_score: 0.0,
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_allocate_zero_count_errors() {
        let quotes = vec![quote(ProviderId::Aws, 1.0, true)];
        assert!(allocate(&quotes, 0, None).is_err());
    }

    #[test]
    fn test_allocate_picks_cheapest_first() {
        let quotes = vec![
            quote(ProviderId::Aws, 5.0, true),
            quote(ProviderId::Gcp, 1.0, true),
            quote(ProviderId::Runpod, 2.0, true),
        ];
        let allocation = allocate(&quotes, 2, None).unwrap();
        assert_eq!(allocation.entries.len(), 2);
        assert_eq!(allocation.entries[0].provider, ProviderId::Gcp);
        assert_eq!(allocation.entries[1].provider, ProviderId::Runpod);
        assert!(!allocation.relaxed);
    }

    #[test]
    fn test_allocate_respects_price_ceiling() {
        let quotes = vec![quote(ProviderId::Aws, 5.0, true), quote(ProviderId::Gcp, 1.0, true)];
        let allocation = allocate(&quotes, 2, Some(2.0)).unwrap();
        assert_eq!(allocation.entries.len(), 1);
        assert!(allocation.relaxed);
    }

    #[test]
    fn test_allocate_excludes_unavailable() {
        let quotes = vec![quote(ProviderId::Aws, 1.0, false), quote(ProviderId::Gcp, 2.0, true)];
        let allocation = allocate(&quotes, 2, None).unwrap();
        assert_eq!(allocation.entries.len(), 1);
        assert_eq!(allocation.entries[0].provider, ProviderId::Gcp);
    }

    #[test]
    fn test_allocate_per_provider_cap_then_relaxes() {
        // cap = ceil(4/2) = 2: aws can supply at most 2 before relaxation
        let quotes = vec![
            quote(ProviderId::Aws, 1.0, true),
            quote(ProviderId::Aws, 1.1, true),
            quote(ProviderId::Aws, 1.2, true),
            quote(ProviderId::Aws, 1.3, true),
        ];
        let allocation = allocate(&quotes, 4, None).unwrap();
        assert_eq!(allocation.entries.len(), 4);
        assert!(allocation.relaxed);
    }

    #[test]
    fn test_allocate_cap_holds_when_enough_providers() {
        let quotes = vec![
            quote(ProviderId::Aws, 1.0, true),
            quote(ProviderId::Aws, 1.1, true),
            quote(ProviderId::Aws, 1.2, true),
            quote(ProviderId::Gcp, 1.3, true),
            quote(ProviderId::Runpod, 1.4, true),
        ];
        // cap = ceil(3/2) = 2: aws contributes at most 2 of the 3 picks
        let allocation = allocate(&quotes, 3, None).unwrap();
        assert_eq!(allocation.entries.len(), 3);
        assert!(!allocation.relaxed);
        let aws_count = allocation.entries.iter().filter(|e| e.provider == ProviderId::Aws).count();
        assert_eq!(aws_count, 2);
    }

    #[test]
    fn test_allocate_excludes_demo_quotes() {
        let mut demo = quote(ProviderId::Demo, 0.5, true);
        demo.metadata.insert("demo_mode".to_string(), serde_json::json!(true));
        let quotes = vec![demo, quote(ProviderId::Gcp, 2.0, true)];
        let allocation = allocate(&quotes, 1, None).unwrap();
        assert_eq!(allocation.entries.len(), 1);
        assert_eq!(allocation.entries[0].provider, ProviderId::Gcp);
    }

    #[test]
    fn test_allocate_single_candidate_relaxation_repeats_it() {
        let quotes = vec![quote(ProviderId::Aws, 1.0, true)];
        let allocation = allocate(&quotes, 5, None).unwrap();
        assert_eq!(allocation.entries.len(), 5);
        assert!(allocation.entries.iter().all(|e| e.provider == ProviderId::Aws));
        assert!(allocation.relaxed);
    }

    #[test]
    fn test_allocate_no_candidates_yields_empty() {
        let quotes = vec![quote(ProviderId::Aws, 1.0, false)];
        let allocation = allocate(&quotes, 5, None).unwrap();
        assert!(allocation.entries.is_empty());
        assert!(allocation.relaxed);
    }
}
