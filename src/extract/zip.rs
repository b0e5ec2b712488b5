use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Result of unpacking one legacy archive. A corrupt member fails only that
/// member; the archive's remaining members still come out.
#[derive(Debug)]
pub struct ZipOutcome {
    pub files: Vec<PathBuf>,
    /// (member name, reason) for every member that could not be extracted.
    pub skipped: Vec<(String, String)>,
}

/// Unpack every `.csv` member of `bytes` into `dest_dir`, prefixing each
/// output file with `stem` to keep members from different archives apart.
pub fn extract_zip_members(bytes: &[u8], dest_dir: &Path, stem: &str) -> Result<ZipOutcome> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("opening zip archive")?;
    let mut outcome = ZipOutcome {
        files: Vec::new(),
        skipped: Vec::new(),
    };

    for i in 0..archive.len() {
        let member_name = match archive.by_index(i) {
            Ok(entry) => entry.name().to_string(),
            Err(err) => {
                outcome
                    .skipped
                    .push((format!("member #{i}"), err.to_string()));
                continue;
            }
        };
        if !member_name.to_lowercase().ends_with(".csv") {
            debug!(member = %member_name, "skipping non-csv member");
            continue;
        }

        let basename = member_name.rsplit('/').next().unwrap_or(&member_name);
        let out_path = dest_dir.join(format!("{stem}_{basename}"));
        match copy_member(&mut archive, i, &out_path) {
            Ok(()) => outcome.files.push(out_path),
            Err(err) => {
                // Partial output from a bad member must not reach the loader.
                let _ = std::fs::remove_file(&out_path);
                outcome.skipped.push((member_name, err.to_string()));
            }
        }
    }

    Ok(outcome)
}

fn copy_member(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
    out_path: &Path,
) -> Result<()> {
    let mut entry = archive.by_index(index).context("reading zip member")?;
    let mut out =
        File::create(out_path).with_context(|| format!("creating {:?}", out_path))?;
    io::copy(&mut entry, &mut out).context("decompressing zip member")?;
    Ok(())
}
