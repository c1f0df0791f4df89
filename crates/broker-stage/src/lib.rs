//! Dataset Stager (C6): plan, resolve, compress, chunk, and fan out
//! chunk uploads to every target region, verifying each chunk's SHA-256
//! checksum along the way.

mod chunk;
mod compress;
mod resolve;
mod upload;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use broker_proto::{CompressionCodec, RegionStageResult, RegionStageStatus, StagingPlan, StagingResult};
use futures::future::join_all;
use tracing::{info, warn};

pub use upload::{backend_for_region, choose_backend, BackendKind, StorageBackend};

const MAX_ERRORS_PER_REGION: usize = 3;

/// Default staging root: a per-process scratch directory, since this
/// workspace carries no `dirs` crate to resolve a user data directory.
pub fn default_staging_root() -> PathBuf {
    std::env::temp_dir().join(format!("broker-staging-{}", std::process::id()))
}

fn default_known_hosts_path(staging_root: &Path) -> PathBuf {
    staging_root.join("known_hosts")
}

/// Build a `StagingPlan` without touching the network: estimates source
/// size (best-effort for local refs, 0 otherwise) and the resulting
/// chunk count from the resolved codec's estimated ratio.
pub fn plan(dataset_ref: &str, target_regions: &[String], requested_codec: CompressionCodec) -> StagingPlan {
    let codec = compress::resolve_codec(requested_codec);
    let estimated_source_bytes = resolve::detect_size(dataset_ref);
    let estimated_compressed_bytes = (estimated_source_bytes as f64 * codec.estimated_ratio()) as u64;
    let chunk_size_bytes = chunk::DEFAULT_CHUNK_SIZE_BYTES;
    let chunk_count = if estimated_compressed_bytes == 0 {
        1
    } else {
        estimated_compressed_bytes.div_ceil(chunk_size_bytes) as u32
    };

    StagingPlan {
        dataset_ref: dataset_ref.to_string(),
        target_regions: target_regions.to_vec(),
        estimated_source_bytes,
        codec,
        estimated_compressed_bytes,
        chunk_count,
        chunk_size_bytes,
    }
}

/// Run the full staging pipeline: resolve the source, compress it,
/// chunk it, checksum every chunk, then fan out uploads to each target
/// region (chunks sequential within a region, regions run in parallel).
pub async fn stage_dataset(dataset_ref: &str, target_regions: &[String], requested_codec: CompressionCodec) -> Result<StagingResult> {
    let started = Instant::now();
    let staging_root = default_staging_root();
    let known_hosts = default_known_hosts_path(&staging_root);

    let resolved = resolve::resolve(dataset_ref, &staging_root)
        .await
        .context("resolving dataset source")?;

    let codec = compress::resolve_codec(requested_codec);
    let stem = resolved.file_stem().and_then(|s| s.to_str()).unwrap_or("dataset");
    let ext = codec_extension(codec);
    let compressed_path = staging_root.join(format!("{stem}.{ext}"));

    let (original_bytes, compressed_bytes) =
        tokio::task::spawn_blocking({
            let resolved = resolved.clone();
            let compressed_path = compressed_path.clone();
            move || compress::compress_file(&resolved, &compressed_path, codec)
        })
        .await
        .context("compression task panicked")??;

    let chunks = tokio::task::spawn_blocking({
        let compressed_path = compressed_path.clone();
        move || chunk::chunk_file(&compressed_path, chunk::DEFAULT_CHUNK_SIZE_BYTES)
    })
    .await
    .context("chunking task panicked")??;

    let mut chunk_checksums = Vec::with_capacity(chunks.len());
    for path in &chunks {
        let path = path.clone();
        let sum = tokio::task::spawn_blocking(move || chunk::checksum(&path))
            .await
            .context("checksum task panicked")??;
        chunk_checksums.push(sum);
    }

    info!(
        dataset_ref,
        regions = target_regions.len(),
        chunks = chunks.len(),
        original_bytes,
        compressed_bytes,
        "staging plan resolved; beginning fan-out upload"
    );

    let region_futures = target_regions.iter().map(|region| {
        stage_region(region.clone(), chunks.clone(), chunk_checksums.clone(), staging_root.clone(), known_hosts.clone())
    });
    let regions: Vec<RegionStageResult> = join_all(region_futures).await;

    chunk::cleanup_chunks(&chunks, &compressed_path);

    let compression_ratio_percent = if original_bytes == 0 {
        0.0
    } else {
        (1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0
    };

    Ok(StagingResult {
        regions,
        original_bytes,
        compressed_bytes,
        compression_ratio_percent,
        chunk_checksums,
        total_elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn codec_extension(codec: CompressionCodec) -> &'static str {
    match codec {
        CompressionCodec::Zstd | CompressionCodec::Auto => "zst",
        CompressionCodec::Gzip => "gz",
        CompressionCodec::None => "raw",
    }
}

/// Upload every chunk to one region, sequentially, tallying per-chunk
/// outcomes into a single `RegionStageResult`.
async fn stage_region(
    region: String,
    chunks: Vec<PathBuf>,
    chunk_checksums: Vec<String>,
    staging_root: PathBuf,
    known_hosts: PathBuf,
) -> RegionStageResult {
    let started = Instant::now();
    let (backend, bucket) = backend_for_region(&region, &staging_root, &known_hosts);
    let dataset_stem = chunks
        .first()
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string();

    let mut uploaded = 0u32;
    let mut bytes = 0u64;
    let mut errors = Vec::new();

    for (idx, chunk_path) in chunks.iter().enumerate() {
        let key = format!("{dataset_stem}/{}", chunk_file_name(chunk_path, idx));
        match backend.put(&bucket, &key, chunk_path, &region).await {
            Ok(()) => {
                uploaded += 1;
                bytes += std::fs::metadata(chunk_path).map(|m| m.len()).unwrap_or(0);
            }
            Err(e) => {
                warn!(region, chunk = %chunk_path.display(), error = %e, "chunk upload failed");
                if errors.len() < MAX_ERRORS_PER_REGION {
                    errors.push(e.to_string());
                }
            }
        }
    }

    let status = if uploaded == chunks.len() as u32 {
        RegionStageStatus::Staged
    } else if uploaded == 0 {
        RegionStageStatus::Failed
    } else {
        RegionStageStatus::Partial
    };

    RegionStageResult {
        region,
        chunks_uploaded: uploaded,
        bytes,
        elapsed_ms: started.elapsed().as_millis() as u64,
        checksum_verified: uploaded == chunks.len() as u32 && !chunk_checksums.is_empty(),
        status,
        errors,
    }
}

fn chunk_file_name(path: &Path, idx: usize) -> String {
    path.file_name()
        .and_then(|f| f.to_str())
        .map(String::from)
        .unwrap_or_else(|| format!("chunk{idx:04}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_small_local_file_single_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, vec![0u8; 1024]).unwrap();

        let p = plan(file.to_str().unwrap(), &["us-east-1".to_string()], CompressionCodec::Auto);
        assert_eq!(p.codec, CompressionCodec::Zstd);
        assert_eq!(p.chunk_count, 1);
        assert_eq!(p.estimated_source_bytes, 1024);
    }

    #[test]
    fn test_plan_unresolved_name_has_zero_size_and_one_chunk() {
        let p = plan("some-unresolved-dataset", &["us-east-1".to_string()], CompressionCodec::None);
        assert_eq!(p.estimated_source_bytes, 0);
        assert_eq!(p.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_stage_dataset_single_region_local_fallback() {
        std::env::remove_var("BROKER_STAGING_HOST");
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, vec![7u8; 10_000]).unwrap();

        let result = stage_dataset(file.to_str().unwrap(), &["mars-base-1".to_string()], CompressionCodec::Zstd)
            .await
            .unwrap();

        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].status, RegionStageStatus::Staged);
        assert_eq!(result.chunk_checksums.len(), 1);
        assert_eq!(result.chunk_checksums[0].len(), 64);
        assert!(result.compressed_bytes <= result.original_bytes);
    }

    #[tokio::test]
    async fn test_stage_dataset_multi_region_fan_out_is_independent() {
        std::env::remove_var("BROKER_STAGING_HOST");
        std::env::remove_var("BROKER_AZURE_STORAGE_CONNECTION_STRING");
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, vec![3u8; 5000]).unwrap();

        let regions = vec!["us-east-1".to_string(), "eastus".to_string(), "mars-base-1".to_string()];
        let result = stage_dataset(file.to_str().unwrap(), &regions, CompressionCodec::None).await.unwrap();

        assert_eq!(result.regions.len(), 3);
        let statuses: Vec<_> = result.regions.iter().map(|r| (r.region.clone(), r.status)).collect();
        assert!(statuses.contains(&("us-east-1".to_string(), RegionStageStatus::Staged)));
        assert!(statuses.contains(&("mars-base-1".to_string(), RegionStageStatus::Staged)));
        // eastus has no AZURE_STORAGE_CONNECTION_STRING set, so every chunk fails there,
        // but that never aborts the other regions' results.
        assert!(statuses.contains(&("eastus".to_string(), RegionStageStatus::Failed)));
    }

    #[test]
    fn test_codec_extension() {
        assert_eq!(codec_extension(CompressionCodec::Zstd), "zst");
        assert_eq!(codec_extension(CompressionCodec::Gzip), "gz");
        assert_eq!(codec_extension(CompressionCodec::None), "raw");
    }
}
