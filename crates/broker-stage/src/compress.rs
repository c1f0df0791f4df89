//! Streaming compression to a staging file, using the chosen codec.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use broker_proto::CompressionCodec;

const ZSTD_LEVEL: i32 = 3;
const GZIP_LEVEL: u32 = 6;
const COPY_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// `Auto` always resolves to `Zstd`: the codec is a compile-time
/// dependency in this workspace, not a runtime-optional import, so there
/// is no "not installed, fall back to gzip" path to reproduce.
pub fn resolve_codec(requested: CompressionCodec) -> CompressionCodec {
    match requested {
        CompressionCodec::Auto => CompressionCodec::Zstd,
        other => other,
    }
}

/// Compress `src` to `dst` with `codec`, returning `(original_bytes, compressed_bytes)`.
pub fn compress_file(src: &Path, dst: &Path, codec: CompressionCodec) -> Result<(u64, u64)> {
    let original_bytes = std::fs::metadata(src).context("reading source size")?.len();

    match codec {
        CompressionCodec::Zstd => {
            let mut reader = BufReader::new(File::open(src).context("opening source for zstd compression")?);
            let writer = BufWriter::new(File::create(dst).context("creating zstd staging file")?);
            let mut encoder = zstd::Encoder::new(writer, ZSTD_LEVEL).context("initializing zstd encoder")?;
            std::io::copy(&mut reader, &mut encoder).context("streaming zstd compression")?;
            encoder.finish().context("finalizing zstd stream")?;
        }
        CompressionCodec::Gzip => {
            let mut reader = BufReader::new(File::open(src).context("opening source for gzip compression")?);
            let writer = BufWriter::new(File::create(dst).context("creating gzip staging file")?);
            let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::new(GZIP_LEVEL));
            std::io::copy(&mut reader, &mut encoder).context("streaming gzip compression")?;
            encoder.finish().context("finalizing gzip stream")?;
        }
        CompressionCodec::None => {
            stream_copy(src, dst)?;
        }
        CompressionCodec::Auto => unreachable!("callers must resolve_codec() before compress_file()"),
    }

    let compressed_bytes = std::fs::metadata(dst).context("reading compressed size")?.len();
    Ok((original_bytes, compressed_bytes))
}

fn stream_copy(src: &Path, dst: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(src).context("opening source for passthrough copy")?);
    let mut writer = BufWriter::new(File::create(dst).context("creating passthrough staging file")?);
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    loop {
        use std::io::Read;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        use std::io::Write;
        writer.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_codec_auto_is_zstd() {
        assert_eq!(resolve_codec(CompressionCodec::Auto), CompressionCodec::Zstd);
        assert_eq!(resolve_codec(CompressionCodec::Gzip), CompressionCodec::Gzip);
    }

    #[test]
    fn test_compress_none_is_identity_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let payload = vec![7u8; 4096];
        std::fs::write(&src, &payload).unwrap();

        let (orig, comp) = compress_file(&src, &dst, CompressionCodec::None).unwrap();
        assert_eq!(orig, 4096);
        assert_eq!(comp, 4096);
        assert_eq!(std::fs::read(&dst).unwrap(), payload);
    }

    #[test]
    fn test_compress_zstd_reduces_compressible_data() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.zst");
        std::fs::write(&src, vec![0u8; 1_000_000]).unwrap();

        let (orig, comp) = compress_file(&src, &dst, CompressionCodec::Zstd).unwrap();
        assert_eq!(orig, 1_000_000);
        assert!(comp < orig);
    }

    #[test]
    fn test_compress_gzip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.gz");
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(1000);
        std::fs::write(&src, &payload).unwrap();

        compress_file(&src, &dst, CompressionCodec::Gzip).unwrap();

        let compressed = std::fs::read(&dst).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut restored = Vec::new();
        use std::io::Read;
        decoder.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, payload);
    }
}
