//! Engine Orchestrator (C7): the public request surface.
//!
//! A thin composition layer — it owns no business logic of its own beyond
//! wiring [`broker_aggregator`] → [`broker_allocator`] → [`broker_provisioner`]
//! for `provision`, dispatching `manage_instance`/`execute_command` by the
//! instance id's `<provider>_…` prefix, and handing `stage_dataset` straight
//! to [`broker_stage`]. Every public operation here maps 1:1 onto `spec.md §6`.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Instant;

use broker_proto::{
    Credentials, GpuFamily, ProviderId, ProvisionResult, ProvisionStatus, ProvisioningOutcome, Quote,
    StagingResult,
};
use broker_providers::ProviderRegistry;
use tracing::{info, warn};

pub use error::{EngineError, Result};

/// Credentials for every provider the caller wants the engine to consider,
/// keyed by provider id. Ownership is the caller's; the engine never
/// mutates or persists these.
pub type CredentialMap = HashMap<ProviderId, Credentials>;

/// `manage_instance`'s action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Status,
    Stop,
    Start,
    Terminate,
}

impl InstanceAction {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "status" => Self::Status,
            "stop" => Self::Stop,
            "start" => Self::Start,
            "terminate" => Self::Terminate,
            _ => return None,
        })
    }
}

/// `get_quotes`: C3 only.
pub async fn get_quotes(
    credentials: &CredentialMap,
    gpu_family: GpuFamily,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
) -> Vec<Quote> {
    let registry = ProviderRegistry::from_credentials(credentials);
    broker_aggregator::aggregate_quotes(&registry, gpu_family, region, provider_ids, parallelism).await
}

/// As [`get_quotes`], but sourcing `parallel_queries` and the scoring
/// weights from an [`broker_config::EngineConfig`] when the caller leaves
/// `parallelism` unset.
pub async fn get_quotes_with_config(
    config: &broker_config::EngineConfig,
    credentials: &CredentialMap,
    gpu_family: GpuFamily,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
) -> Vec<Quote> {
    let registry = ProviderRegistry::from_credentials(credentials);
    broker_aggregator::aggregate_quotes_weighted(
        &registry,
        gpu_family,
        region,
        provider_ids,
        Some(parallelism.unwrap_or(config.parallel_queries)),
        Some(config.optimization_settings.as_score_weights()),
    )
    .await
}

/// `provision`: C3 → filter & score → C4 → C5 → cost analysis.
///
/// `dry_run=true` substitutes synthetic [`ProvisionResult`]s derived from
/// the allocated quotes (`status=active`, instance id prefixed
/// `mock_<provider>_<hex>`) and skips every adapter call.
#[allow(clippy::too_many_arguments)]
pub async fn provision(
    credentials: &CredentialMap,
    gpu_family: GpuFamily,
    count: usize,
    price_ceiling: Option<f64>,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
    dry_run: bool,
) -> Result<ProvisioningOutcome> {
    provision_inner(credentials, gpu_family, count, price_ceiling, region, provider_ids, parallelism, None, dry_run)
        .await
}

/// As [`provision`], but sourcing `parallel_queries`, `max_price_threshold`,
/// and the scoring weights from an [`broker_config::EngineConfig`] for any
/// of `price_ceiling`/`parallelism` the caller leaves unset.
#[allow(clippy::too_many_arguments)]
pub async fn provision_with_config(
    config: &broker_config::EngineConfig,
    credentials: &CredentialMap,
    gpu_family: GpuFamily,
    count: usize,
    price_ceiling: Option<f64>,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
    dry_run: bool,
) -> Result<ProvisioningOutcome> {
    provision_inner(
        credentials,
        gpu_family,
        count,
        Some(price_ceiling.unwrap_or(config.max_price_threshold)),
        region,
        provider_ids,
        Some(parallelism.unwrap_or(config.parallel_queries)),
        Some(config.optimization_settings.as_score_weights()),
        dry_run,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn provision_inner(
    credentials: &CredentialMap,
    gpu_family: GpuFamily,
    count: usize,
    price_ceiling: Option<f64>,
    region: Option<&str>,
    provider_ids: Option<&[ProviderId]>,
    parallelism: Option<usize>,
    weights: Option<broker_proto::ScoreWeights>,
    dry_run: bool,
) -> Result<ProvisioningOutcome> {
    if count < 1 {
        return Err(EngineError::InvalidInput("count must be at least 1".to_string()));
    }

    let started = Instant::now();
    let registry = ProviderRegistry::from_credentials(credentials);
    let quotes = broker_aggregator::aggregate_quotes_weighted(
        &registry,
        gpu_family,
        region,
        provider_ids,
        parallelism,
        weights,
    )
    .await;

    let allocation = broker_allocator::allocate(&quotes, count, price_ceiling)
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

    if allocation.entries.is_empty() {
        return Ok(ProvisioningOutcome {
            success: false,
            instances: Vec::new(),
            cost_analysis: broker_proto::analyze_costs(&[], count),
            total_time_s: started.elapsed().as_secs_f64(),
            errors: vec!["No suitable instances found".to_string()],
        });
    }

    let results = if dry_run {
        allocation.entries.iter().map(mock_result).collect()
    } else {
        let (group_id, results) =
            broker_provisioner::provision_allocation(&registry, &allocation, parallelism).await;
        info!(group_id, requested = count, "provision group dispatched");
        results
    };

    let cost_analysis = broker_proto::analyze_costs(&results, count);
    let errors: Vec<String> = results.iter().filter_map(|r| r.error.clone()).collect();
    let success = results.iter().any(|r| r.status == ProvisionStatus::Active);

    Ok(ProvisioningOutcome {
        success,
        instances: results,
        cost_analysis,
        total_time_s: started.elapsed().as_secs_f64(),
        errors,
    })
}

fn mock_result(entry: &broker_proto::AllocationEntry) -> ProvisionResult {
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

/// `stage_dataset`: C6 only.
pub async fn stage_dataset(
    dataset_ref: &str,
    target_regions: &[String],
    compression: broker_proto::CompressionCodec,
) -> Result<StagingResult> {
    broker_stage::stage_dataset(dataset_ref, target_regions, compression)
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))
}

/// `manage_instance`: dispatches by the instance id's `<provider>_…`
/// prefix. Unknown prefixes fail with an unambiguous error rather than
/// silently no-oping.
pub async fn manage_instance(
    credentials: &CredentialMap,
    instance_id: &str,
    action: InstanceAction,
) -> Result<String> {
    let registry = ProviderRegistry::from_credentials(credentials);
    let provider = registry
        .find_by_instance_prefix(instance_id)
        .ok_or_else(|| EngineError::UnsupportedProvider(instance_id.to_string()))?;

    let outcome = match action {
        InstanceAction::Status => provider
            .status(instance_id)
            .await
            .map(|s| s.status)
            .map_err(|e| EngineError::Provider(e.to_string())),
        InstanceAction::Stop => provider.stop(instance_id).await.map_err(|e| EngineError::Provider(e.to_string())),
        InstanceAction::Start => provider.start(instance_id).await.map_err(|e| EngineError::Provider(e.to_string())),
        InstanceAction::Terminate => {
            provider.terminate(instance_id).await.map_err(|e| EngineError::Provider(e.to_string()))
        }
    };

    if let Err(ref e) = outcome {
        warn!(instance_id, ?action, error = %e, "manage_instance failed");
    }
    outcome
}

/// `execute_command`: dispatches by the instance id's `<provider>_…`
/// prefix, same as `manage_instance`.
pub async fn execute_command(
    credentials: &CredentialMap,
    instance_id: &str,
    command: &str,
    async_flag: bool,
) -> Result<broker_providers::ExecOutcome> {
    let registry = ProviderRegistry::from_credentials(credentials);
    let provider = registry
        .find_by_instance_prefix(instance_id)
        .ok_or_else(|| EngineError::UnsupportedProvider(instance_id.to_string()))?;
    Ok(provider.execute_command(instance_id, command, async_flag).await)
}

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("invalid input: {0}")]
        InvalidInput(String),
        #[error("unsupported provider for instance id: {0}")]
        UnsupportedProvider(String),
        #[error("provider error: {0}")]
        Provider(String),
        #[error("internal error: {0}")]
        Internal(String),
    }

    pub type Result<T> = std::result::Result<T, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_proto::{AllocationEntry, AvailabilityKind as AK};

    fn entry(provider: ProviderId, price: f64) -> AllocationEntry {
        AllocationEntry {
            provider,
            instance_type: "x".to_string(),
            region: "us-east".to_string(),
            gpu_family: GpuFamily::A100,
            availability_kind: AK::OnDemand,
            price_per_hour: price,
        }
    }

    #[test]
    fn test_instance_action_parse() {
        assert_eq!(InstanceAction::parse("status"), Some(InstanceAction::Status));
        assert_eq!(InstanceAction::parse("bogus"), None);
    }

    #[test]
    fn test_mock_result_is_active_with_mock_prefix() {
        let result = mock_result(&entry(ProviderId::Runpod, 1.49));
        assert_eq!(result.status, ProvisionStatus::Active);
        assert!(result.instance_id.starts_with("mock_runpod_"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_provision_zero_count_is_invalid_input() {
        let creds = CredentialMap::new();
        let result = provision(&creds, GpuFamily::A100, 0, None, None, None, None, true).await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_provision_no_quotes_reports_no_suitable_instances() {
        let creds = CredentialMap::new();
        let outcome = provision(&creds, GpuFamily::A100, 1, None, None, Some(&[]), None, true)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors, vec!["No suitable instances found".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_with_only_demo_quotes_yields_no_suitable_instances() {
        // The demo adapter's quotes are always excluded from real allocation
        // (spec.md §4.1), so a dry run with nothing but demo data still
        // reports "No suitable instances found" rather than fabricating an
        // allocation from them.
        let creds = CredentialMap::new();
        let outcome = provision(&creds, GpuFamily::A100, 2, Some(10.0), None, Some(&[ProviderId::Demo]), None, true)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.instances.is_empty());
        assert_eq!(outcome.errors, vec!["No suitable instances found".to_string()]);
    }

    #[tokio::test]
    async fn test_manage_instance_unknown_prefix_is_unsupported_provider() {
        let creds = CredentialMap::new();
        let result = manage_instance(&creds, "nonsense-id", InstanceAction::Status).await;
        assert!(matches!(result, Err(EngineError::UnsupportedProvider(_))));
    }

    #[tokio::test]
    async fn test_get_quotes_empty_provider_list_is_empty() {
        let creds = CredentialMap::new();
        let quotes = get_quotes(&creds, GpuFamily::A100, None, Some(&[]), None).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_get_quotes_with_config_empty_provider_list_is_empty() {
        let creds = CredentialMap::new();
        let config = broker_config::EngineConfig::default();
        let quotes = get_quotes_with_config(&config, &creds, GpuFamily::A100, None, Some(&[]), None).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_provision_with_config_falls_back_to_configured_price_ceiling() {
        let creds = CredentialMap::new();
        let mut config = broker_config::EngineConfig::default();
        config.max_price_threshold = 0.0;
        // No demo quote clears a $0 ceiling, and demo quotes are excluded
        // from allocation anyway, so this should report no suitable
        // instances regardless of price.
        let outcome =
            provision_with_config(&config, &creds, GpuFamily::A100, 1, None, None, Some(&[ProviderId::Demo]), None, true)
                .await
                .unwrap();
        assert!(!outcome.success);
    }
}
