//! Chunking and checksums. A compressed file at or under the chunk size
//! stays as a single "chunk" (the file itself); larger files split into
//! fixed-size `chunkNNNN` parts, the last possibly shorter.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Split `src` into chunk files of exactly `chunk_size_bytes` (the final
/// chunk may be smaller). Returns the list of chunk paths in order; if
/// `src` is already small enough, the list contains just `src`.
pub fn chunk_file(src: &Path, chunk_size_bytes: u64) -> Result<Vec<PathBuf>> {
    let size = std::fs::metadata(src).context("reading file size to chunk")?.len();
    if size <= chunk_size_bytes {
        return Ok(vec![src.to_path_buf()]);
    }

    let mut reader = BufReader::new(File::open(src).context("opening file to chunk")?);
    let mut chunks = Vec::new();
    let mut idx = 0u32;
    let mut buf = vec![0u8; chunk_size_bytes as usize];

    loop {
        let n = read_up_to(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk_path = src.with_file_name(format!(
            "{}.chunk{:04}",
            src.file_name().and_then(|f| f.to_str()).unwrap_or("dataset"),
            idx
        ));
        let mut writer = BufWriter::new(File::create(&chunk_path).context("creating chunk file")?);
        writer.write_all(&buf[..n]).context("writing chunk contents")?;
        chunks.push(chunk_path);
        idx += 1;
    }
    Ok(chunks)
}

/// Read until `buf` is full or EOF, returning the number of bytes read.
/// Unlike a single `Read::read`, this doesn't stop short on a partial
/// underlying read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// SHA-256 of a file's contents, hex-encoded.
pub fn checksum(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path).context("opening file to checksum")?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8 * 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Delete every chunk path except `keep` (the compressed staging file,
/// when chunking produced exactly that file back). Best-effort: a failed
/// removal is logged, not propagated — cleanup never fails the pipeline.
pub fn cleanup_chunks(chunks: &[PathBuf], keep: &Path) {
    for chunk in chunks {
        if chunk == keep {
            continue;
        }
        if let Err(e) = std::fs::remove_file(chunk) {
            tracing::debug!(path = %chunk.display(), error = %e, "failed to remove temporary chunk file");
        }
    }
}
