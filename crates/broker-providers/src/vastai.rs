//! Vast.ai adapter. Bring-your-own-API-key, GPU marketplace semantics:
//! `get_quotes` queries the live order book, nothing is fabricated when no
//! key is configured.

use async_trait::async_trait;
use broker_proto::{AvailabilityKind, Credentials, GpuFamily, ProviderId, Quote};
use serde_json::json;
use tracing::debug;

use crate::{
    build_client, error::ProviderError, ExecOutcome, InstanceStatusInfo, InstanceSummary, Provider,
    ProvisionedInstanceInfo,
};

const API_BASE: &str = "https://console.vast.ai/api/v0";

pub struct VastaiProvider {
    api_key: String,
    client: reqwest::Client,
}

impl VastaiProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            api_key: credentials.get("api_key").cloned().unwrap_or_default(),
            client: build_client(),
        }
    }
}

#[async_trait]
impl Provider for VastaiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Vastai
    }

    async fn get_quotes(&self, gpu_family: GpuFamily, _region: Option<&str>) -> Vec<Quote> {
        if self.api_key.is_empty() {
            return Vec::new();
        }

        let search = json!({
            "gpu_name": gpu_family.as_str(),
            "order": [["dph_total", "asc"]],
            "type": "on-demand",
        });
        let url = format!("{API_BASE}/bundles?q={search}");

        let resp = match self.client.get(&url).header("Authorization", format!("Bearer {}", self.api_key)).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(provider = "vastai", error = %e, "quote request failed");
                return Vec::new();
            }
        };

        let resp = match resp.error_for_status() {
            Ok(r) => r,
            Err(e) => {
                debug!(provider = "vastai", error = %e, "quote request returned error status");
                return Vec::new();
            }
        };
        let data: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                debug!(provider = "vastai", error = %e, "quote response parse failed");
                return Vec::new();
            }
        };

        let offers = data["offers"].as_array().cloned().unwrap_or_default();
        offers
            .into_iter()
            .take(5)
            .map(|offer| Quote {
                provider: ProviderId::Vastai,
                instance_type: format!("vastai-{}", offer["id"].as_u64().unwrap_or_default()),
                gpu_family,
                price_per_hour: offer["dph_total"].as_f64().unwrap_or_default(),
                region: offer["geolocation"].as_str().unwrap_or("unknown").to_string(),
                available: true,
                availability_kind: AvailabilityKind::Spot,
                gpu_count: offer["num_gpus"].as_u64().map(|v| v as u32),
                vcpu: offer["cpu_cores_effective"].as_u64().map(|v| v as u32),
                memory_gb: offer["gpu_ram"].as_u64().map(|v| (v / 1024) as u32),
                latency_ms: 60.0,
                optimization_score: 0.0,
                metadata: Default::default(),
            })
            .collect()
    }

    async fn provision(
        &self,
        instance_type: &str,
        region: &str,
        gpu_family: GpuFamily,
    ) -> Result<ProvisionedInstanceInfo, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("vastai".to_string()));
        }
        let offer_id = instance_type.strip_prefix("vastai-").unwrap_or(instance_type);
        let body = json!({
            "client_id": "me",
            "image": "pytorch/pytorch:2.1.0-cuda12.1-cudnn8-devel",
            "disk": 50,
            "label": format!("broker-{}", gpu_family.as_str().to_lowercase()),
        });

        let resp = self
            .client
            .put(format!("{API_BASE}/asks/{offer_id}/"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::ApiError(e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;

        let contract = resp["new_contract"].as_u64().map(|v| v.to_string()).unwrap_or_else(|| offer_id.to_string());

        Ok(ProvisionedInstanceInfo {
            instance_id: format!("vastai_{contract}"),
            region: region.to_string(),
            instance_type: instance_type.to_string(),
            price_per_hour: 0.0,
            availability_kind: AvailabilityKind::Spot,
        })
    }

    async fn status(&self, instance_id: &str) -> Result<InstanceStatusInfo, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("vastai".to_string()));
        }
        let id = strip_prefix(instance_id);
        let resp: serde_json::Value = self
            .client
            .get(format!("{API_BASE}/instances/{id}"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::ApiError(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;

        let inst = resp["instances"].as_array().and_then(|a| a.first()).unwrap_or(&resp);
        Ok(InstanceStatusInfo {
            status: inst["actual_status"].as_str().unwrap_or("unknown").to_string(),
            public_ip: inst["public_ipaddr"].as_str().map(String::from),
            instance_type: inst["gpu_name"].as_str().unwrap_or("unknown").to_string(),
            region: inst["geolocation"].as_str().unwrap_or("unknown").to_string(),
        })
    }

    async fn stop(&self, instance_id: &str) -> Result<String, ProviderError> {
        self.set_state(instance_id, "stopped").await?;
        Ok("stopping".to_string())
    }

    async fn start(&self, instance_id: &str) -> Result<String, ProviderError> {
        self.set_state(instance_id, "running").await?;
        Ok("starting".to_string())
    }

    async fn terminate(&self, instance_id: &str) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("vastai".to_string()));
        }
        self.client
            .delete(format!("{API_BASE}/instances/{}/", strip_prefix(instance_id)))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;
        Ok("terminating".to_string())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ProviderError> {
        if self.api_key.is_empty() {
            return Ok(Vec::new());
        }
        let resp: serde_json::Value = self
            .client
            .get(format!("{API_BASE}/instances?owner=me"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::ApiError(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;

        let instances = resp["instances"].as_array().cloned().unwrap_or_default();
        Ok(instances
            .into_iter()
            .map(|i| InstanceSummary {
                instance_id: format!("vastai_{}", i["id"]),
                instance_type: i["gpu_name"].as_str().unwrap_or("unknown").to_string(),
                region: i["geolocation"].as_str().unwrap_or("unknown").to_string(),
                status: i["actual_status"].as_str().unwrap_or("unknown").to_string(),
            })
            .collect())
    }

    async fn execute_command(&self, instance_id: &str, command: &str, _async_flag: bool) -> ExecOutcome {
        // Vast.ai has no native run-command facility; fall back to SSH
        // against the instance's public endpoint, using a dedicated
        // known-hosts file and accept-new host-key policy.
        crate::ssh_fallback::execute(instance_id, command).await
    }
}

impl VastaiProvider {
    async fn set_state(&self, instance_id: &str, state: &str) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("vastai".to_string()));
        }
        self.client
            .put(format!("{API_BASE}/instances/{}/", strip_prefix(instance_id)))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "state": state }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;
        Ok(())
    }
}

fn strip_prefix(instance_id: &str) -> &str {
    instance_id.strip_prefix("vastai_").unwrap_or(instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_api_key_yields_empty_quotes() {
        let provider = VastaiProvider::new(Credentials::new());
        let quotes = provider.get_quotes(GpuFamily::A100, None).await;
        assert!(quotes.is_empty());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("vastai_9981234"), "9981234");
    }
}
