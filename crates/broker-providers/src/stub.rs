//! Stub adapters for providers whose full API integration is not yet
//! implemented. Registered and dispatchable like any real adapter, but
//! every call is a clearly-labeled no-op: quotes come back empty, mutating
//! calls return [`ProviderError::Unsupported`].

use async_trait::async_trait;
use broker_proto::{GpuFamily, ProviderId, Quote};

use crate::{error::ProviderError, ExecOutcome, InstanceStatusInfo, InstanceSummary, Provider, ProvisionedInstanceInfo};

pub struct StubProvider {
    id: ProviderId,
}

impl StubProvider {
    pub fn new(id: ProviderId) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn get_quotes(&self, _gpu_family: GpuFamily, _region: Option<&str>) -> Vec<Quote> {
        tracing::debug!(provider = %self.id, "stub adapter has no quote source");
        Vec::new()
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
        ExecOutcome::error(format!("{} adapter not yet implemented", self.id))
    }
}
