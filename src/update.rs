//! Masterlist updater. The hosted masterlist carries its revision in a
//! `? Revision <n>` header and a `.sha256` sidecar with the digest of the
//! full file, so a check is one small request and an update is verified
//! before it replaces the local copy.

use crate::sorter::Masterlist;
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::{fs, path::Path, time::Duration};

const MASTERLIST_URL: &str =
    "https://raw.githubusercontent.com/boss-developers/boss-fallout3/master/masterlist.txt";
const USER_AGENT: &str = "WasteWorks";

#[derive(Debug, Clone)]
pub enum MasterlistUpdate {
    UpToDate { revision: Option<u32> },
    Updated { old: Option<u32>, new: Option<u32> },
}

pub fn local_revision(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Masterlist::load(path)?.revision)
}

/// Fetches the hosted masterlist and replaces the local copy when its
/// revision is newer. A missing local copy always updates.
pub fn update_masterlist(path: &Path) -> Result<MasterlistUpdate> {
    let old = local_revision(path)?;
    let body = fetch_text(MASTERLIST_URL, Duration::from_secs(30))?;
    let new = Masterlist::parse(&body).revision;

    if let (Some(old), Some(new)) = (old, new) {
        if new <= old {
            return Ok(MasterlistUpdate::UpToDate { revision: Some(old) });
        }
    }

    if let Ok(sidecar) = fetch_text(&format!("{MASTERLIST_URL}.sha256"), Duration::from_secs(10)) {
        if let Some(expected) = sidecar.split_whitespace().next() {
            verify_body_sha256(body.as_bytes(), expected)?;
        }
    }

    write_replacing(path, body.as_bytes())?;
    Ok(MasterlistUpdate::Updated { old, new })
}

fn fetch_text(url: &str, read_timeout: Duration) -> Result<String> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(read_timeout)
        .timeout_write(Duration::from_secs(10))
        .build();
    let response = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("fetch {url}"))?;
    response.into_string().context("read response body")
}

fn verify_body_sha256(body: &[u8], expected: &str) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        bail!("masterlist checksum mismatch");
    }
    Ok(())
}

fn write_replacing(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create masterlist dir")?;
    }
    let temp = path.with_extension("txt.new");
    fs::write(&temp, body).context("stage masterlist")?;
    fs::rename(&temp, path).context("replace masterlist")?;
    Ok(())
}
