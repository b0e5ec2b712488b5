use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::path::Path;

/// Decompress one gzip object to `dest`. On failure the partial output is
/// removed before the error propagates.
pub fn gunzip_to(bytes: &[u8], dest: &Path) -> Result<()> {
    let result = (|| -> Result<()> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = File::create(dest).with_context(|| format!("creating {:?}", dest))?;
        io::copy(&mut decoder, &mut out).context("decompressing gzip stream")?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub fn gzip_bytes(content: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn round_trips_csv_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("part-0.csv");
        gunzip_to(&gzip_bytes("a,b\n1,2\n"), &dest)?;
        assert_eq!(std::fs::read_to_string(&dest)?, "a,b\n1,2\n");
        Ok(())
    }

    #[test]
    fn garbage_input_fails_and_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part-0.csv");
        assert!(gunzip_to(b"not gzip at all", &dest).is_err());
        assert!(!dest.exists());
    }
}
