use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Subscription files picked up from a folder.
pub const DIR_PATTERN: &str = "sub*.txt";

/// Read every requested source into a list of text blobs: positional files
/// (`-` is stdin), matching files from `dir`, then the literal `text`.
pub fn gather(files: &[PathBuf], dir: Option<&Path>, text: Option<&str>) -> Result<Vec<String>> {
    let mut blobs = Vec::new();
    for path in files {
        if path.as_os_str() == "-" {
            let mut s = String::new();
            io::stdin().read_to_string(&mut s).context("read stdin")?;
            blobs.push(s);
        } else {
            blobs.push(read_lossy(path)?);
        }
    }
    if let Some(dir) = dir {
        let found = folder_files(dir)?;
        if found.is_empty() {
            tracing::warn!(dir = %dir.display(), pattern = DIR_PATTERN, "no subscription files found");
        }
        for path in found {
            blobs.push(read_lossy(&path)?);
        }
    }
    if let Some(t) = text {
        blobs.push(t.to_string());
    }
    if blobs.is_empty() {
        return Err(anyhow!("no input: pass files, --dir or --text"));
    }
    Ok(blobs)
}

/// `sub*.txt` under `dir`, sorted by path.
pub fn folder_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(DIR_PATTERN);
    let pattern = pattern.to_string_lossy();
    let mut out = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("bad folder pattern {pattern}"))? {
        out.push(entry?);
    }
    out.sort();
    Ok(out)
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
