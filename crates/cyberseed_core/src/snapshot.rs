use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::PageDetail;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One exported page in a group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub title: String,
    pub pageid: i64,
    pub revid: Option<i64>,
    pub url: String,
}

impl From<&PageDetail> for SnapshotEntry {
    fn from(page: &PageDetail) -> Self {
        Self {
            title: page.title.clone(),
            pageid: page.page_id,
            revid: page.revision_id,
            url: page.full_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub count: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: String,
    pub groups: BTreeMap<String, GroupSummary>,
}

impl Manifest {
    pub fn new(generated_at: impl Into<String>) -> Self {
        Self {
            generated_at: generated_at.into(),
            groups: BTreeMap::new(),
        }
    }
}

pub fn write_snapshot(
    output_dir: &Path,
    file_name: &str,
    entries: &[SnapshotEntry],
) -> Result<PathBuf> {
    let path = output_dir.join(file_name);
    write_pretty_json(&path, entries)?;
    Ok(path)
}

pub fn write_manifest(output_dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = output_dir.join(MANIFEST_FILE_NAME);
    write_pretty_json(&path, manifest)?;
    Ok(path)
}

fn write_pretty_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    body.push('\n');
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}
