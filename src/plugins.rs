//! Plugin bookkeeping for the Data directory. The engine loads whatever
//! plugins.txt lists, in ascending file-mtime order; load-order changes are
//! therefore realized by rewriting mtimes, never by renaming files.

use crate::fallout3::{self, GamePaths};
use anyhow::{bail, Context, Result};
use filetime::{set_file_mtime, FileTime};
use log::{info, warn};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize)]
pub struct PluginEntry {
    pub name: String,
    pub active: bool,
    pub master: bool,
    pub read_only: bool,
    pub mtime: i64,
}

/// Plugins in the Data dir in load order (mtime ascending, name as the tie
/// breaker, matching the engine).
pub fn list_plugins(paths: &GamePaths) -> Result<Vec<PluginEntry>> {
    let active: HashSet<String> = read_active(paths)?
        .into_iter()
        .map(|name| name.to_lowercase())
        .collect();

    let mut entries = Vec::new();
    for entry in WalkDir::new(&paths.plugins_dir).max_depth(1) {
        let entry = entry.context("scan Data dir")?;
        if !entry.file_type().is_file() || !fallout3::is_plugin_file(entry.path()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let metadata = entry.metadata().context("stat plugin")?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs() as i64)
            .unwrap_or(0);
        entries.push(PluginEntry {
            active: active.contains(&name.to_lowercase()),
            master: name.to_lowercase().ends_with(".esm"),
            read_only: metadata.permissions().readonly(),
            name,
            mtime,
        });
    }

    entries.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.name.cmp(&b.name)));
    Ok(entries)
}

pub fn read_active(paths: &GamePaths) -> Result<Vec<String>> {
    if !paths.plugins_file.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(&paths.plugins_file).context("read plugins.txt")?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect())
}

fn write_active(paths: &GamePaths, names: &[String]) -> Result<()> {
    if let Some(parent) = paths.plugins_file.parent() {
        fs::create_dir_all(parent).context("create plugins.txt dir")?;
    }
    let mut raw = names.join("\n");
    raw.push('\n');
    fs::write(&paths.plugins_file, raw).context("write plugins.txt")?;
    Ok(())
}

pub fn set_active(paths: &GamePaths, name: &str, active: bool) -> Result<()> {
    if !paths.plugins_dir.join(name).is_file() {
        bail!("no such plugin in Data: {name}");
    }
    let mut names = read_active(paths)?;
    let already = names.iter().any(|entry| entry.eq_ignore_ascii_case(name));
    if active && !already {
        names.push(name.to_string());
        info!("activated {name}");
    } else if !active && already {
        names.retain(|entry| !entry.eq_ignore_ascii_case(name));
        info!("deactivated {name}");
    } else {
        return Ok(());
    }
    write_active(paths, &names)
}

/// Rewrites plugin mtimes so the given names load in the given order.
/// Plugins not named keep their place relative to each other after the
/// ordered ones. Stamps are spaced a minute apart to survive coarse
/// filesystem timestamps.
pub fn set_load_order(paths: &GamePaths, order: &[String]) -> Result<()> {
    let current = list_plugins(paths)?;
    let mut remaining: Vec<&PluginEntry> = current.iter().collect();
    let mut ordered = Vec::new();

    for name in order {
        let index = remaining
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name));
        match index {
            Some(index) => ordered.push(remaining.remove(index)),
            None => bail!("no such plugin in Data: {name}"),
        }
    }
    ordered.extend(remaining);

    let base = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
        - (ordered.len() as i64) * 60;

    for (slot, entry) in ordered.iter().enumerate() {
        let path = paths.plugins_dir.join(&entry.name);
        let stamp = FileTime::from_unix_time(base + (slot as i64) * 60, 0);
        set_file_mtime(&path, stamp)
            .with_context(|| format!("set load order for {}", entry.name))?;
    }
    info!("rewrote load order for {} plugin(s)", ordered.len());
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct PluginHeader {
    pub corrupt: bool,
    pub masters: Vec<String>,
}

/// Reads the TES4 header of a plugin: corruption is a missing or truncated
/// TES4 record, masters come from its MAST subrecords.
pub fn read_header(path: &Path) -> Result<PluginHeader> {
    let raw = fs::read(path).with_context(|| format!("read plugin {}", path.display()))?;
    if raw.len() < 24 || &raw[0..4] != b"TES4" {
        return Ok(PluginHeader {
            corrupt: true,
            masters: Vec::new(),
        });
    }

    let data_size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    // record header is 24 bytes, subrecords follow
    let end = (24 + data_size).min(raw.len());
    let mut masters = Vec::new();
    let mut offset = 24;
    while offset + 6 <= end {
        let kind = &raw[offset..offset + 4];
        let size = u16::from_le_bytes([raw[offset + 4], raw[offset + 5]]) as usize;
        let body_start = offset + 6;
        if body_start + size > end {
            return Ok(PluginHeader {
                corrupt: true,
                masters,
            });
        }
        if kind == b"MAST" {
            let body = &raw[body_start..body_start + size];
            let text = body.split(|byte| *byte == 0).next().unwrap_or(body);
            masters.push(String::from_utf8_lossy(text).to_string());
        }
        offset = body_start + size;
    }

    Ok(PluginHeader {
        corrupt: false,
        masters,
    })
}

/// Plugins whose file permissions block mtime changes; their load order
/// cannot be managed until the flag is cleared.
pub fn scan_read_only(paths: &GamePaths) -> Result<Vec<String>> {
    let read_only: Vec<String> = list_plugins(paths)?
        .into_iter()
        .filter(|entry| entry.read_only)
        .map(|entry| entry.name)
        .collect();
    for name in &read_only {
        warn!("{name} is read-only; its load order cannot be changed");
    }
    Ok(read_only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallout3::detect_paths;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, GamePaths) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Fallout 3");
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::write(root.join("Fallout3.exe"), b"mz").unwrap();
        let user = dir.path().join("user");
        fs::create_dir_all(&user).unwrap();
        let paths = detect_paths(Some(&root), Some(&user)).unwrap();
        (dir, paths)
    }

    fn add_plugin(paths: &GamePaths, name: &str, mtime: i64) -> PathBuf {
        let path = paths.plugins_dir.join(name);
        fs::write(&path, b"TES4").unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }

    #[test]
    fn lists_plugins_in_mtime_order() {
        let (_dir, paths) = fixture();
        add_plugin(&paths, "zeta.esp", 1_000);
        add_plugin(&paths, "anchorage.esm", 500);
        add_plugin(&paths, "thepitt.esp", 2_000);
        fs::write(paths.plugins_dir.join("notes.txt"), b"x").unwrap();

        let names: Vec<String> = list_plugins(&paths)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["anchorage.esm", "zeta.esp", "thepitt.esp"]);
    }

    #[test]
    fn activate_and_deactivate_rewrite_plugins_txt() {
        let (_dir, paths) = fixture();
        add_plugin(&paths, "zeta.esp", 1_000);
        add_plugin(&paths, "anchorage.esm", 500);

        set_active(&paths, "anchorage.esm", true).unwrap();
        set_active(&paths, "zeta.esp", true).unwrap();
        assert_eq!(
            read_active(&paths).unwrap(),
            vec!["anchorage.esm".to_string(), "zeta.esp".to_string()]
        );

        // idempotent
        set_active(&paths, "zeta.esp", true).unwrap();
        assert_eq!(read_active(&paths).unwrap().len(), 2);

        set_active(&paths, "anchorage.esm", false).unwrap();
        assert_eq!(read_active(&paths).unwrap(), vec!["zeta.esp".to_string()]);

        assert!(set_active(&paths, "missing.esp", true).is_err());
    }

    #[test]
    fn set_load_order_rewrites_mtimes() {
        let (_dir, paths) = fixture();
        add_plugin(&paths, "a.esp", 1_000);
        add_plugin(&paths, "b.esp", 2_000);
        add_plugin(&paths, "c.esp", 3_000);

        set_load_order(
            &paths,
            &["c.esp".to_string(), "a.esp".to_string(), "b.esp".to_string()],
        )
        .unwrap();

        let names: Vec<String> = list_plugins(&paths)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["c.esp", "a.esp", "b.esp"]);
    }

    #[test]
    fn partial_order_keeps_rest_in_place() {
        let (_dir, paths) = fixture();
        add_plugin(&paths, "a.esp", 1_000);
        add_plugin(&paths, "b.esp", 2_000);
        add_plugin(&paths, "c.esp", 3_000);

        set_load_order(&paths, &["b.esp".to_string()]).unwrap();

        let names: Vec<String> = list_plugins(&paths)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["b.esp", "a.esp", "c.esp"]);
    }

    fn tes4_record(masters: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        for master in masters {
            body.extend_from_slice(b"MAST");
            let payload: Vec<u8> = master.bytes().chain(std::iter::once(0)).collect();
            body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            body.extend_from_slice(&payload);
        }
        let mut raw = Vec::new();
        raw.extend_from_slice(b"TES4");
        raw.extend_from_slice(&(body.len() as u32).to_le_bytes());
        raw.extend_from_slice(&[0u8; 16]);
        raw.extend_from_slice(&body);
        raw
    }

    #[test]
    fn reads_masters_from_tes4_header() {
        let (_dir, paths) = fixture();
        let path = paths.plugins_dir.join("child.esp");
        fs::write(&path, tes4_record(&["Fallout3.esm", "Anchorage.esm"])).unwrap();

        let header = read_header(&path).unwrap();
        assert!(!header.corrupt);
        assert_eq!(header.masters, vec!["Fallout3.esm", "Anchorage.esm"]);
    }

    #[test]
    fn flags_corrupt_plugins() {
        let (_dir, paths) = fixture();
        let path = paths.plugins_dir.join("broken.esp");
        fs::write(&path, b"not a plugin").unwrap();

        let header = read_header(&path).unwrap();
        assert!(header.corrupt);
        assert!(header.masters.is_empty());
    }

    #[test]
    fn flags_read_only_plugins() {
        let (_dir, paths) = fixture();
        let path = add_plugin(&paths, "locked.esp", 1_000);
        add_plugin(&paths, "free.esp", 2_000);
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        assert_eq!(scan_read_only(&paths).unwrap(), vec!["locked.esp".to_string()]);

        // restore so TempDir cleanup can delete the file
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(&path, perms).unwrap();
    }
}
