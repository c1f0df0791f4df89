//! Provider adapters: a uniform interface over each cloud's
//! quote/provision/status/terminate/exec API.
//!
//! One concrete type implements [`Provider`] per cloud. The core never
//! inspects [`Credentials`](broker_proto::Credentials) except through the
//! adapter that understands its provider's schema, and adapters never
//! fabricate demo data — that is [`demo::DemoProvider`]'s job alone.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use broker_governor::IsTransient;
use broker_proto::{AvailabilityKind, Credentials, GpuFamily, ProviderId, Quote};
use std::collections::HashMap;

pub use error::ProviderError;

pub mod demo;
pub mod runpod;
mod ssh_fallback;
pub mod stub;
pub mod vastai;

// ─── Shared result types ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProvisionedInstanceInfo {
    pub instance_id: String,
    pub region: String,
    pub instance_type: String,
    pub price_per_hour: f64,
    pub availability_kind: AvailabilityKind,
}

#[derive(Debug, Clone)]
pub struct InstanceStatusInfo {
    pub status: String,
    pub public_ip: Option<String>,
    pub instance_type: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub instance_type: String,
    pub region: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub job_id: Option<String>,
}

impl ExecOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
            job_id: None,
        }
    }
}

// ─── Provider trait ────────────────────────────────────────────────────────

/// The capability set the core requires from every cloud adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Fetch quotes for a GPU family, optionally scoped to one region.
    /// Network/API errors are swallowed to an empty list — the aggregator
    /// tolerates per-provider failures. Never fabricates demo data.
    async fn get_quotes(&self, gpu_family: GpuFamily, region: Option<&str>) -> Vec<Quote>;

    async fn provision(
        &self,
        instance_type: &str,
        region: &str,
        gpu_family: GpuFamily,
    ) -> Result<ProvisionedInstanceInfo, ProviderError>;

    async fn status(&self, instance_id: &str) -> Result<InstanceStatusInfo, ProviderError>;
    async fn stop(&self, instance_id: &str) -> Result<String, ProviderError>;
    async fn start(&self, instance_id: &str) -> Result<String, ProviderError>;
    async fn terminate(&self, instance_id: &str) -> Result<String, ProviderError>;

    /// Instances tagged/labeled as owned by this system only.
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ProviderError>;

    /// Routed via the provider's native run-command facility when
    /// available, with a secure-shell fallback. Never throws: errors
    /// become `exit_code=1` with the error text in `stderr`.
    async fn execute_command(&self, instance_id: &str, command: &str, async_flag: bool) -> ExecOutcome;
}

const ALL_PROVIDER_IDS: &[ProviderId] = &[
    ProviderId::Aws,
    ProviderId::Gcp,
    ProviderId::Runpod,
    ProviderId::Vastai,
    ProviderId::LambdaLabs,
    ProviderId::Coreweave,
    ProviderId::Tensordock,
    ProviderId::Huggingface,
    ProviderId::Baseten,
    ProviderId::Oracle,
    ProviderId::Crusoe,
    ProviderId::Digitalocean,
    ProviderId::Hyperstack,
    ProviderId::Azure,
    ProviderId::Demo,
];

// ─── Registry ──────────────────────────────────────────────────────────────

/// Registers adapters by string id. Registering an id that already exists
/// replaces the prior binding.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new() }
    }

    pub fn register(&mut self, provider: Box<dyn Provider>) {
        let key = provider.id().as_str().to_string();
        tracing::info!(provider = %key, "registering provider adapter");
        self.providers.insert(key, provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<&dyn Provider> {
        self.providers.get(id.as_str()).map(|p| p.as_ref())
    }

    pub fn enabled_ids(&self) -> Vec<ProviderId> {
        self.providers
            .values()
            .map(|p| p.id())
            .filter(|id| *id != ProviderId::Demo)
            .collect()
    }

    /// Build a registry from a credentials map, registering one adapter
    /// per provider id for which credentials were supplied, plus the
    /// always-available demo adapter. Providers without a full
    /// implementation yet register a [`stub::StubProvider`].
    pub fn from_credentials(credentials: &HashMap<ProviderId, Credentials>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(demo::DemoProvider::new()));

        for (id, creds) in credentials {
            let provider: Box<dyn Provider> = match id {
                ProviderId::Runpod => Box::new(runpod::RunpodProvider::new(creds.clone())),
                ProviderId::Vastai => Box::new(vastai::VastaiProvider::new(creds.clone())),
                ProviderId::Demo => continue,
                other => Box::new(stub::StubProvider::new(*other)),
            };
            registry.register(provider);
        }

        registry
    }

    /// Dispatch by the instance id's `<provider>_...` prefix, per the
    /// Engine Orchestrator's `manage_instance`/`execute_command` contract.
    ///
    /// Matched against every `ProviderId`'s full string form rather than
    /// `instance_id.split('_').next()`: several ids (`lambda_labs`)
    /// contain an underscore themselves, so splitting on the first `_`
    /// would strip `lambda_labs_abc123` down to the non-id `lambda`.
    /// Longest match wins in case one id is a prefix of another.
    pub fn find_by_instance_prefix(&self, instance_id: &str) -> Option<&dyn Provider> {
        ALL_PROVIDER_IDS
            .iter()
            .filter(|id| {
                let prefix = id.as_str();
                instance_id.len() > prefix.len()
                    && instance_id.starts_with(prefix)
                    && instance_id.as_bytes()[prefix.len()] == b'_'
            })
            .max_by_key(|id| id.as_str().len())
            .and_then(|id| self.get(*id))
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}

pub mod error {
    use super::IsTransient;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ProviderError {
        #[error("provider {0} not configured")]
        CredentialMissing(String),
        #[error("network error: {0}")]
        Network(String),
        #[error("rate limited")]
        RateLimited,
        #[error("provider returned error: {0}")]
        ApiError(String),
        #[error("unsupported operation for this provider")]
        Unsupported,
    }

    impl IsTransient for ProviderError {
        fn is_transient(&self) -> bool {
            matches!(self, Self::Network(_) | Self::RateLimited)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_replaces_on_reregister() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(stub::StubProvider::new(ProviderId::Oracle)));
        registry.register(Box::new(stub::StubProvider::new(ProviderId::Oracle)));
        assert!(registry.get(ProviderId::Oracle).is_some());
    }

    #[test]
    fn test_find_by_instance_prefix() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(stub::StubProvider::new(ProviderId::Runpod)));
        let found = registry.find_by_instance_prefix("runpod_abc123");
        assert!(found.is_some());
        assert_eq!(found.unwrap().id(), ProviderId::Runpod);
    }

    #[test]
    fn test_find_by_instance_prefix_unknown() {
        let registry = ProviderRegistry::new();
        assert!(registry.find_by_instance_prefix("nonsense-id").is_none());
    }

    #[test]
    fn test_find_by_instance_prefix_handles_underscore_in_provider_id() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(stub::StubProvider::new(ProviderId::LambdaLabs)));
        let found = registry.find_by_instance_prefix("lambda_labs_abc123");
        assert!(found.is_some());
        assert_eq!(found.unwrap().id(), ProviderId::LambdaLabs);
    }

    #[test]
    fn test_demo_excluded_from_enabled_ids() {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(demo::DemoProvider::new()));
        registry.register(Box::new(stub::StubProvider::new(ProviderId::Crusoe)));
        let ids = registry.enabled_ids();
        assert!(!ids.contains(&ProviderId::Demo));
        assert!(ids.contains(&ProviderId::Crusoe));
    }
}
