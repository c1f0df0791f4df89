//! RunPod adapter. Bring-your-own-API-key: with no key configured every
//! operation returns the credential-missing behavior from `spec.md §4.1`
//! rather than any static fallback data.

use async_trait::async_trait;
use broker_proto::{AvailabilityKind, Credentials, GpuFamily, ProviderId, Quote};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{
    build_client, error::ProviderError, ExecOutcome, InstanceStatusInfo, InstanceSummary, Provider,
    ProvisionedInstanceInfo,
};

const API_BASE: &str = "https://api.runpod.io/graphql";

pub struct RunpodProvider {
    api_key: String,
    client: reqwest::Client,
}

impl RunpodProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            api_key: credentials.get("api_key").cloned().unwrap_or_default(),
            client: build_client(),
        }
    }

    async fn graphql(&self, query: &str, variables: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = if variables.is_null() {
            json!({ "query": query })
        } else {
            json!({ "query": query, "variables": variables })
        };
        let resp = self
            .client
            .post(API_BASE)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl Provider for RunpodProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Runpod
    }

    async fn get_quotes(&self, gpu_family: GpuFamily, _region: Option<&str>) -> Vec<Quote> {
        if self.api_key.is_empty() {
            return Vec::new();
        }

        let query = r#"
        query GpuTypes {
            gpuTypes {
                id
                displayName
                memoryInGb
                communityPrice
                securePrice
            }
        }"#;

        let data = match self.graphql(query, serde_json::Value::Null).await {
            Ok(d) => d,
            Err(e) => {
                debug!(provider = "runpod", error = %e, "quote request failed");
                return Vec::new();
            }
        };

        let mut quotes = Vec::new();
        let gpu_types = data["data"]["gpuTypes"].as_array().cloned().unwrap_or_default();
        for gpu in gpu_types {
            let name = gpu["displayName"].as_str().unwrap_or_default();
            if !name.to_lowercase().contains(&gpu_family.as_str().to_lowercase()) {
                continue;
            }
            let gpu_id = gpu["id"].as_str().unwrap_or_default();
            let memory_gb = gpu["memoryInGb"].as_u64().map(|v| v as u32);

            if let Some(price) = gpu["communityPrice"].as_f64() {
                quotes.push(build_quote(gpu_id, gpu_family, price, memory_gb, AvailabilityKind::Spot, "community"));
            }
            if let Some(price) = gpu["securePrice"].as_f64() {
                quotes.push(build_quote(gpu_id, gpu_family, price, memory_gb, AvailabilityKind::OnDemand, "secure"));
            }
        }
        quotes.sort_by(|a, b| a.price_per_hour.total_cmp(&b.price_per_hour));
        quotes
    }

    async fn provision(
        &self,
        instance_type: &str,
        _region: &str,
        gpu_family: GpuFamily,
    ) -> Result<ProvisionedInstanceInfo, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("runpod".to_string()));
        }

        let cloud_type = if instance_type.contains("secure") { "SECURE" } else { "COMMUNITY" };
        let gpu_id = instance_type.rsplit('-').next().unwrap_or(instance_type);
        let mutation = r#"
        mutation CreatePod($input: PodFindAndDeployOnDemandInput!) {
            podFindAndDeployOnDemand(input: $input) {
                id
                name
                gpuCount
                machineId
            }
        }"#;
        let variables = json!({
            "input": {
                "cloudType": cloud_type,
                "gpuTypeId": gpu_id,
                "gpuCount": 1,
                "volumeInGb": 50,
                "containerDiskInGb": 20,
                "templateId": "runpod-torch-v21",
                "name": format!("broker-{}", gpu_family.as_str().to_lowercase()),
            }
        });

        let data = self
            .graphql(mutation, variables)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let pod = &data["data"]["podFindAndDeployOnDemand"];
        let instance_id = pod["id"]
            .as_str()
            .map(|id| format!("runpod_{id}"))
            .ok_or_else(|| ProviderError::ApiError("missing pod id in RunPod response".to_string()))?;

        info!(%instance_id, "RunPod instance provisioned");

        Ok(ProvisionedInstanceInfo {
            instance_id,
            region: "us-east".to_string(),
            instance_type: instance_type.to_string(),
            price_per_hour: 0.0,
            availability_kind: if cloud_type == "SECURE" { AvailabilityKind::OnDemand } else { AvailabilityKind::Spot },
        })
    }

    async fn status(&self, instance_id: &str) -> Result<InstanceStatusInfo, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("runpod".to_string()));
        }
        let pod_id = strip_prefix(instance_id);
        let query = "query Pod($podId: String!) { pod(input: {podId: $podId}) { id name desiredStatus gpuCount } }";
        let data = self
            .graphql(query, json!({ "podId": pod_id }))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let status = data["data"]["pod"]["desiredStatus"]
            .as_str()
            .unwrap_or("unknown")
            .to_lowercase();
        Ok(InstanceStatusInfo {
            status,
            public_ip: None,
            instance_type: "unknown".to_string(),
            region: "us-east".to_string(),
        })
    }

    async fn stop(&self, instance_id: &str) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("runpod".to_string()));
        }
        let mutation = "mutation StopPod($podId: String!) { podStop(input: {podId: $podId}) { id desiredStatus } }";
        self.graphql(mutation, json!({ "podId": strip_prefix(instance_id) }))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok("stopping".to_string())
    }

    async fn start(&self, instance_id: &str) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("runpod".to_string()));
        }
        let mutation = "mutation ResumePod($podId: String!) { podResume(input: {podId: $podId, gpuCount: 1}) { id desiredStatus } }";
        self.graphql(mutation, json!({ "podId": strip_prefix(instance_id) }))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok("starting".to_string())
    }

    async fn terminate(&self, instance_id: &str) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::CredentialMissing("runpod".to_string()));
        }
        let mutation = "mutation TerminatePod($podId: String!) { podTerminate(input: {podId: $podId}) }";
        self.graphql(mutation, json!({ "podId": strip_prefix(instance_id) }))
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok("terminating".to_string())
    }

    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, ProviderError> {
        if self.api_key.is_empty() {
            return Ok(Vec::new());
        }
        let query = "query { myself { pods { id desiredStatus machine { gpuDisplayName } } } }";
        let data = self
            .graphql(query, serde_json::Value::Null)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let pods = data["data"]["myself"]["pods"].as_array().cloned().unwrap_or_default();
        Ok(pods
            .into_iter()
            .map(|p| InstanceSummary {
                instance_id: format!("runpod_{}", p["id"].as_str().unwrap_or_default()),
                instance_type: p["machine"]["gpuDisplayName"].as_str().unwrap_or("unknown").to_string(),
                region: "us-east".to_string(),
                status: p["desiredStatus"].as_str().unwrap_or("unknown").to_lowercase(),
            })
            .collect())
    }

    async fn execute_command(&self, instance_id: &str, command: &str, async_flag: bool) -> ExecOutcome {
        if self.api_key.is_empty() {
            return ExecOutcome::error("runpod API key not configured");
        }
        let endpoint = if async_flag { "run" } else { "runsync" };
        let url = format!("https://api.runpod.ai/v2/{}/{endpoint}", strip_prefix(instance_id));
        let body = json!({ "input": { "command": command } });

        match self.client.post(&url).bearer_auth(&self.api_key).json(&body).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => {
                    let data: serde_json::Value = resp.json().await.unwrap_or_default();
                    if async_flag {
                        ExecOutcome {
                            exit_code: 0,
                            stdout: String::new(),
                            stderr: String::new(),
                            job_id: data["id"].as_str().map(String::from),
                        }
                    } else {
                        ExecOutcome {
                            exit_code: 0,
                            stdout: data["output"].to_string(),
                            stderr: String::new(),
                            job_id: None,
                        }
                    }
                }
                Err(e) => ExecOutcome::error(e.to_string()),
            },
            Err(e) => ExecOutcome::error(e.to_string()),
        }
    }
}

fn strip_prefix(instance_id: &str) -> &str {
    instance_id.strip_prefix("runpod_").unwrap_or(instance_id)
}

fn build_quote(
    gpu_id: &str,
    gpu_family: GpuFamily,
    price: f64,
    memory_gb: Option<u32>,
    kind: AvailabilityKind,
    variant: &str,
) -> Quote {
    let mut metadata = HashMap::new();
    metadata.insert("variant".to_string(), json!(variant));
    Quote {
        provider: ProviderId::Runpod,
        instance_type: format!("runpod-{variant}-{gpu_id}"),
        gpu_family,
        price_per_hour: price,
        region: "us-east".to_string(),
        available: true,
        availability_kind: kind,
        gpu_count: Some(1),
        vcpu: Some(16),
        memory_gb,
        latency_ms: 40.0,
        optimization_score: 0.0,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_api_key_yields_empty_quotes() {
        let provider = RunpodProvider::new(Credentials::new());
        let quotes = provider.get_quotes(GpuFamily::A100, None).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_no_api_key_provision_is_credential_missing() {
        let provider = RunpodProvider::new(Credentials::new());
        let result = provider.provision("runpod-secure-x", "us-east", GpuFamily::A100).await;
        assert!(matches!(result, Err(ProviderError::CredentialMissing(_))));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("runpod_abc123"), "abc123");
        assert_eq!(strip_prefix("abc123"), "abc123");
    }
}
