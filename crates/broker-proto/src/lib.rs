//! Data model for the GPU compute brokerage engine.
//!
//! Defines the types shared across quoting, allocation, provisioning, and
//! dataset staging: [`Quote`], [`Allocation`], [`ProvisionResult`], and the
//! [`Credentials`] bag handed to provider adapters.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use error::{ProtoError, Result};

// ─── Credentials ───────────────────────────────────────────────────────────

/// An opaque per-provider bag of key→value strings. The core never
/// inspects fields except through the adapter that understands its
/// provider's schema.
pub type Credentials = HashMap<String, String>;

// ─── Provider descriptor ───────────────────────────────────────────────────

/// Stable identifier for a cloud provider, bound to exactly one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Aws,
    Gcp,
    Runpod,
    Vastai,
    LambdaLabs,
    Coreweave,
    Tensordock,
    Huggingface,
    Baseten,
    Oracle,
    Crusoe,
    Digitalocean,
    Hyperstack,
    Azure,
    /// Offline demonstration adapter. Never selected for real allocation.
    Demo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Runpod => "runpod",
            Self::Vastai => "vastai",
            Self::LambdaLabs => "lambda_labs",
            Self::Coreweave => "coreweave",
            Self::Tensordock => "tensordock",
            Self::Huggingface => "huggingface",
            Self::Baseten => "baseten",
            Self::Oracle => "oracle",
            Self::Crusoe => "crusoe",
            Self::Digitalocean => "digitalocean",
            Self::Hyperstack => "hyperstack",
            Self::Azure => "azure",
            Self::Demo => "demo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "aws" => Self::Aws,
            "gcp" => Self::Gcp,
            "runpod" => Self::Runpod,
            "vastai" => Self::Vastai,
            "lambda_labs" => Self::LambdaLabs,
            "coreweave" => Self::Coreweave,
            "tensordock" => Self::Tensordock,
            "huggingface" => Self::Huggingface,
            "baseten" => Self::Baseten,
            "oracle" => Self::Oracle,
            "crusoe" => Self::Crusoe,
            "digitalocean" => Self::Digitalocean,
            "hyperstack" => Self::Hyperstack,
            "azure" => Self::Azure,
            "demo" => Self::Demo,
            _ => return None,
        })
    }

    /// Default reliability score in [0,1] used when the caller doesn't
    /// supply a measured one.
    pub fn default_reliability(&self) -> f64 {
        match self {
            Self::Aws | Self::Gcp | Self::Azure => 0.97,
            Self::Oracle => 0.93,
            Self::Coreweave | Self::LambdaLabs => 0.92,
            Self::Runpod | Self::Vastai | Self::Tensordock | Self::Crusoe => 0.85,
            Self::Hyperstack | Self::Digitalocean => 0.88,
            Self::Huggingface | Self::Baseten => 0.90,
            Self::Demo => 1.0,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable, configuration-time description of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub reliability: f64,
    pub default_priority: u32,
}

// ─── GPU family ────────────────────────────────────────────────────────────

/// Normalized GPU class name, independent of vendor-specific SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GpuFamily {
    A100,
    #[serde(rename = "A100-80")]
    A100_80,
    H100,
    V100,
    T4,
    L40,
    A10G,
    RTX4090,
    RTX3090,
}

impl GpuFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A100 => "A100",
            Self::A100_80 => "A100-80",
            Self::H100 => "H100",
            Self::V100 => "V100",
            Self::T4 => "T4",
            Self::L40 => "L40",
            Self::A10G => "A10G",
            Self::RTX4090 => "RTX4090",
            Self::RTX3090 => "RTX3090",
        }
    }

    /// Parse a provider-native GPU string to the normalized family.
    /// Unknown variants return `None`; callers must emit an empty quote
    /// list rather than guess.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace('_', "-");
        Some(match normalized.as_str() {
            "A100" => Self::A100,
            "A100-80" | "A100-80GB" | "A100 80GB" => Self::A100_80,
            "H100" => Self::H100,
            "V100" => Self::V100,
            "T4" => Self::T4,
            "L40" | "L40S" => Self::L40,
            "A10G" | "A10" => Self::A10G,
            "RTX4090" | "RTX-4090" | "4090" => Self::RTX4090,
            "RTX3090" | "RTX-3090" | "3090" => Self::RTX3090,
            _ => return None,
        })
    }
}

impl std::fmt::Display for GpuFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static specifications for a GPU family, used to enrich quote metadata.
/// Not part of the core quote invariants; a best-effort lookup table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GpuSpec {
    pub memory_gb: u32,
    pub tflops: f64,
    pub bandwidth_gb_s: u32,
}

pub fn gpu_spec(family: GpuFamily) -> Option<GpuSpec> {
    Some(match family {
        GpuFamily::A100 => GpuSpec { memory_gb: 40, tflops: 19.5, bandwidth_gb_s: 1555 },
        GpuFamily::A100_80 => GpuSpec { memory_gb: 80, tflops: 19.5, bandwidth_gb_s: 2039 },
        GpuFamily::H100 => GpuSpec { memory_gb: 80, tflops: 67.0, bandwidth_gb_s: 3350 },
        GpuFamily::V100 => GpuSpec { memory_gb: 32, tflops: 15.7, bandwidth_gb_s: 900 },
        GpuFamily::RTX4090 => GpuSpec { memory_gb: 24, tflops: 82.6, bandwidth_gb_s: 1008 },
        GpuFamily::RTX3090 => GpuSpec { memory_gb: 24, tflops: 35.6, bandwidth_gb_s: 936 },
        GpuFamily::T4 | GpuFamily::L40 | GpuFamily::A10G => return None,
    })
}

// ─── Availability kind ─────────────────────────────────────────────────────

/// Interruptible vs guaranteed capacity. A tagged enum rather than a bare
/// bool since the distinction is load-bearing for allocation and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityKind {
    OnDemand,
    Spot,
}

impl AvailabilityKind {
    pub fn is_spot(&self) -> bool {
        matches!(self, Self::Spot)
    }
}

// ─── Quote ─────────────────────────────────────────────────────────────────

/// A point-in-time offer from one provider for one (instance_type, region)
/// pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub provider: ProviderId,
    pub instance_type: String,
    pub gpu_family: GpuFamily,
    pub price_per_hour: f64,
    pub region: String,
    pub available: bool,
    pub availability_kind: AvailabilityKind,
    pub gpu_count: Option<u32>,
    pub vcpu: Option<u32>,
    pub memory_gb: Option<u32>,
    pub latency_ms: f64,
    pub optimization_score: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Quote {
    /// `true` if this quote was produced by the demo adapter and must be
    /// excluded from real allocation.
    pub fn is_demo(&self) -> bool {
        self.metadata
            .get("demo_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Weights used by the aggregator's scoring function. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub price_weight: f64,
    pub latency_weight: f64,
    pub reliability_weight: f64,
    pub availability_weight: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price_weight: 0.4,
            latency_weight: 0.2,
            reliability_weight: 0.1,
            availability_weight: 0.3,
        }
    }
}

/// Deterministic optimization score in [0,1]. Same inputs always produce
/// the same score; monotone decreasing in price.
pub fn optimization_score(
    price_per_hour: f64,
    available: bool,
    latency_ms: f64,
    reliability: f64,
    weights: ScoreWeights,
) -> f64 {
    let price_component = (1.0 - price_per_hour / 10.0).max(0.0) * weights.price_weight;
    let availability_component = if available { weights.availability_weight } else { 0.0 };
    let latency_component = (1.0 - latency_ms / 1000.0).max(0.0) * weights.latency_weight;
    let reliability_component = reliability.clamp(0.0, 1.0) * weights.reliability_weight;

    price_component + availability_component + latency_component + reliability_component
}

// ─── Allocation ────────────────────────────────────────────────────────────

/// One entry of an ordered selection of quotes chosen to fulfil a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub provider: ProviderId,
    pub instance_type: String,
    pub region: String,
    pub gpu_family: GpuFamily,
    pub availability_kind: AvailabilityKind,
    pub price_per_hour: f64,
}

/// An allocation whose per-provider share is capped for resilience, plus
/// whether the cap had to be relaxed to reach the requested count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub entries: Vec<AllocationEntry>,
    pub relaxed: bool,
}

// ─── Provision result ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Active,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub provider: ProviderId,
    pub region: String,
    pub instance_id: String,
    pub gpu_family: GpuFamily,
    pub price_per_hour: f64,
    pub availability_kind: AvailabilityKind,
    pub status: ProvisionStatus,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub total_cost_per_hour: f64,
    pub baseline_cost_per_hour: f64,
    pub estimated_savings: f64,
    pub estimated_savings_percent: f64,
    pub monthly_savings: f64,
}

/// Conservative "typical single-cloud on-demand" placeholder, per instance.
pub const BASELINE_PRICE_PER_INSTANCE: f64 = 2.00;

pub fn analyze_costs(results: &[ProvisionResult], requested_count: usize) -> CostAnalysis {
    let total_cost_per_hour: f64 = results
        .iter()
        .filter(|r| r.status == ProvisionStatus::Active)
        .map(|r| r.price_per_hour)
        .sum();

    let baseline_cost_per_hour = requested_count as f64 * BASELINE_PRICE_PER_INSTANCE;
    let estimated_savings = (baseline_cost_per_hour - total_cost_per_hour).max(0.0);
    let estimated_savings_percent = if baseline_cost_per_hour > 0.0 {
        estimated_savings / baseline_cost_per_hour * 100.0
    } else {
        0.0
    };
    let monthly_savings = estimated_savings * 24.0 * 30.0;

    CostAnalysis {
        total_cost_per_hour,
        baseline_cost_per_hour,
        estimated_savings,
        estimated_savings_percent,
        monthly_savings,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    pub success: bool,
    pub instances: Vec<ProvisionResult>,
    pub cost_analysis: CostAnalysis,
    pub total_time_s: f64,
    pub errors: Vec<String>,
}

// ─── Staging ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    Auto,
    Zstd,
    Gzip,
    None,
}

impl CompressionCodec {
    /// Estimated compressed/source size ratio used for planning.
    pub fn estimated_ratio(&self) -> f64 {
        match self {
            Self::Auto | Self::Zstd => 0.35,
            Self::Gzip => 0.45,
            Self::None => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingPlan {
    pub dataset_ref: String,
    pub target_regions: Vec<String>,
    pub estimated_source_bytes: u64,
    pub codec: CompressionCodec,
    pub estimated_compressed_bytes: u64,
    pub chunk_count: u32,
    pub chunk_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStageStatus {
    Staged,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionStageResult {
    pub region: String,
    pub chunks_uploaded: u32,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub checksum_verified: bool,
    pub status: RegionStageStatus,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingResult {
    pub regions: Vec<RegionStageResult>,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub compression_ratio_percent: f64,
    pub chunk_checksums: Vec<String>,
    pub total_elapsed_ms: u64,
}

// ─── Rate-limit metrics ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rate_limited_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub last_request_time: Option<chrono::DateTime<chrono::Utc>>,
    pub current_rate: f64,
}

// ─── Errors ─────────────────────────────────────────────────────────────────

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ProtoError {
        #[error("unknown GPU family: {0}")]
        UnknownGpuFamily(String),
        #[error("unknown provider id: {0}")]
        UnknownProvider(String),
        #[error("score weights must sum to 1.0, got {0}")]
        InvalidWeights(f64),
    }

    pub type Result<T> = std::result::Result<T, ProtoError>;
}
