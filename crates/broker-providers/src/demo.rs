//! Offline demonstration adapter.
//!
//! Clearly separated from real provider APIs: quotes are static and always
//! carry `demo_mode = true` in their metadata. The quote/provision/status
//! contract still applies, but mutating operations are unsupported — this
//! adapter exists so the rest of the pipeline is exercisable without any
//! credentials at all.

use async_trait::async_trait;
use broker_proto::{AvailabilityKind, GpuFamily, ProviderId, Quote};
use serde_json::json;
use std::collections::HashMap;

use crate::{error::ProviderError, ExecOutcome, InstanceStatusInfo, InstanceSummary, Provider, ProvisionedInstanceInfo};

struct DemoQuote {
    provider: ProviderId,
    gpu_family: GpuFamily,
    price: f64,
    region: &'static str,
}

fn demo_pricing() -> Vec<DemoQuote> {
    vec![
        DemoQuote { provider: ProviderId::Runpod, gpu_family: GpuFamily::A100, price: 1.64, region: "us-east" },
        DemoQuote { provider: ProviderId::Runpod, gpu_family: GpuFamily::H100, price: 3.49, region: "us-east" },
        DemoQuote { provider: ProviderId::Vastai, gpu_family: GpuFamily::A100, price: 1.10, region: "us-east" },
        DemoQuote { provider: ProviderId::Vastai, gpu_family: GpuFamily::H100, price: 2.80, region: "us-east" },
        DemoQuote { provider: ProviderId::Aws, gpu_family: GpuFamily::A100, price: 4.80, region: "us-east-1" },
        DemoQuote { provider: ProviderId::Aws, gpu_family: GpuFamily::H100, price: 15.50, region: "us-east-1" },
        DemoQuote { provider: ProviderId::Azure, gpu_family: GpuFamily::A100, price: 9.52, region: "eastus" },
        DemoQuote { provider: ProviderId::Azure, gpu_family: GpuFamily::H100, price: 32.77, region: "eastus" },
        DemoQuote { provider: ProviderId::Gcp, gpu_family: GpuFamily::A100, price: 3.67, region: "us-central1" },
        DemoQuote { provider: ProviderId::Gcp, gpu_family: GpuFamily::H100, price: 45.00, region: "us-central1" },
        DemoQuote { provider: ProviderId::Coreweave, gpu_family: GpuFamily::A100, price: 2.21, region: "us-east-04e" },
        DemoQuote { provider: ProviderId::Coreweave, gpu_family: GpuFamily::H100, price: 4.76, region: "us-east-04e" },
        DemoQuote { provider: ProviderId::LambdaLabs, gpu_family: GpuFamily::A100, price: 1.29, region: "us-east-1" },
        DemoQuote { provider: ProviderId::LambdaLabs, gpu_family: GpuFamily::H100, price: 2.49, region: "us-east-1" },
        DemoQuote { provider: ProviderId::Tensordock, gpu_family: GpuFamily::A100, price: 1.50, region: "us-east" },
        DemoQuote { provider: ProviderId::Tensordock, gpu_family: GpuFamily::H100, price: 3.20, region: "us-east" },
        DemoQuote { provider: ProviderId::Oracle, gpu_family: GpuFamily::A100, price: 3.50, region: "us-ashburn-1" },
        DemoQuote { provider: ProviderId::Oracle, gpu_family: GpuFamily::H100, price: 5.00, region: "us-ashburn-1" },
        DemoQuote { provider: ProviderId::Crusoe, gpu_family: GpuFamily::A100, price: 2.20, region: "us-east" },
        DemoQuote { provider: ProviderId::Crusoe, gpu_family: GpuFamily::H100, price: 4.50, region: "us-east" },
    ]
}

pub struct DemoProvider;

impl DemoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for DemoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Demo
    }

    async fn get_quotes(&self, gpu_family: GpuFamily, region: Option<&str>) -> Vec<Quote> {
        demo_pricing()
            .into_iter()
            .filter(|q| q.gpu_family == gpu_family)
            .filter(|q| region.is_none_or(|r| r == q.region))
            .map(|q| {
                let mut metadata = HashMap::new();
                metadata.insert("demo_mode".to_string(), json!(true));
                metadata.insert("note".to_string(), json!("DEMO DATA - NOT REAL PRICING"));
                Quote {
                    provider: q.provider,
                    instance_type: format!("{}-demo", q.gpu_family),
                    gpu_family: q.gpu_family,
                    price_per_hour: q.price,
                    region: q.region.to_string(),
                    available: true,
                    availability_kind: AvailabilityKind::OnDemand,
                    gpu_count: Some(1),
                    vcpu: None,
                    memory_gb: None,
                    latency_ms: 50.0,
                    optimization_score: 0.0,
                    metadata,
                }
            })
            .collect()
    }

    async fn provision(
        &self,
        _instance_type: &str,
        _region: &str,
        _gpu_family: GpuFamily,
    ) -> Result<ProvisionedInstanceInfo, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn status(&self, _instance_id: &str) -> Result<InstanceStatusInfo, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn stop(&self, _instance_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn start(&self, _instance_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn terminate(&self, _instance_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ProviderError> {
        Ok(Vec::new())
    }

    async fn execute_command(&self, _instance_id: &str, _command: &str, _async_flag: bool) -> ExecOutcome {
        ExecOutcome::error("demo adapter does not support command execution")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_quotes_are_labeled() {
        let provider = DemoProvider::new();
        let quotes = provider.get_quotes(GpuFamily::A100, None).await;
        assert!(!quotes.is_empty());
        assert!(quotes.iter().all(|q| q.is_demo()));
    }

    #[tokio::test]
    async fn test_demo_quotes_unknown_family_empty() {
        let provider = DemoProvider::new();
        let quotes = provider.get_quotes(GpuFamily::V100, None).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_demo_region_filter() {
        let provider = DemoProvider::new();
        let quotes = provider.get_quotes(GpuFamily::A100, Some("us-east-1")).await;
        assert!(quotes.iter().all(|q| q.region == "us-east-1"));
        assert!(!quotes.is_empty());
    }

    #[tokio::test]
    async fn test_demo_provision_unsupported() {
        let provider = DemoProvider::new();
        let result = provider.provision("A100-demo", "us-east", GpuFamily::A100).await;
        assert!(matches!(result, Err(ProviderError::Unsupported)));
    }
}
