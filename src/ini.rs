//! Line-preserving editor for the game's INI files. Section and key lookups
//! are case-insensitive, matching the Windows profile-string calls the engine
//! itself uses; everything the edit does not touch is written back verbatim.

use anyhow::{Context, Result};
use std::{fs, path::Path};

pub fn get_value(file: &Path, section: &str, key: &str) -> Result<Option<String>> {
    if !file.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(file).with_context(|| format!("read ini {}", file.display()))?;
    Ok(find_value(&raw, section, key))
}

pub fn set_value(file: &Path, section: &str, key: &str, value: &str) -> Result<()> {
    let raw = if file.exists() {
        fs::read_to_string(file).with_context(|| format!("read ini {}", file.display()))?
    } else {
        String::new()
    };
    let updated = splice_value(&raw, section, key, value);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).context("create ini dir")?;
    }
    fs::write(file, updated).with_context(|| format!("write ini {}", file.display()))?;
    Ok(())
}

fn find_value(raw: &str, section: &str, key: &str) -> Option<String> {
    let mut in_section = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(name) = section_header(trimmed) {
            in_section = name.eq_ignore_ascii_case(section);
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((line_key, line_value)) = split_entry(trimmed) {
            if line_key.eq_ignore_ascii_case(key) {
                return Some(line_value.to_string());
            }
        }
    }
    None
}

fn splice_value(raw: &str, section: &str, key: &str, value: &str) -> String {
    let mut lines: Vec<String> = raw.lines().map(|line| line.to_string()).collect();
    let mut in_section = false;
    let mut section_end = None;

    for index in 0..lines.len() {
        let trimmed = lines[index].trim();
        if let Some(name) = section_header(trimmed) {
            if in_section {
                section_end = Some(index);
                break;
            }
            in_section = name.eq_ignore_ascii_case(section);
            if in_section {
                section_end = Some(lines.len());
            }
            continue;
        }
        if !in_section {
            continue;
        }
        let matches_key = split_entry(trimmed)
            .is_some_and(|(line_key, _)| line_key.eq_ignore_ascii_case(key));
        if matches_key {
            lines[index] = format!("{key}={value}");
            return rejoin(lines);
        }
        section_end = Some(index + 1);
    }

    match section_end {
        Some(index) => {
            lines.insert(index, format!("{key}={value}"));
        }
        None => {
            if lines.last().map(|line| !line.is_empty()).unwrap_or(false) {
                lines.push(String::new());
            }
            lines.push(format!("[{section}]"));
            lines.push(format!("{key}={value}"));
        }
    }
    rejoin(lines)
}

fn rejoin(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn section_header(line: &str) -> Option<&str> {
    let without = line.strip_prefix('[')?;
    let name = without.strip_suffix(']')?;
    Some(name.trim())
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
[General]
SLocalSavePath=Games
; trailing comment
[Display]
iSize W=1920
iSize H=1080
";

    #[test]
    fn reads_values_case_insensitively() {
        assert_eq!(
            find_value(SAMPLE, "display", "isize w"),
            Some("1920".to_string())
        );
        assert_eq!(find_value(SAMPLE, "Display", "iSize D"), None);
        assert_eq!(find_value(SAMPLE, "Audio", "iSize W"), None);
    }

    #[test]
    fn replaces_existing_key_in_place() {
        let updated = splice_value(SAMPLE, "Display", "iSize W", "2560");
        assert!(updated.contains("iSize W=2560"));
        assert!(updated.contains("iSize H=1080"));
        assert!(updated.contains("; trailing comment"));
        assert_eq!(updated.matches("[Display]").count(), 1);
    }

    #[test]
    fn appends_key_inside_its_section() {
        let updated = splice_value(SAMPLE, "General", "bUseThreadedAI", "1");
        let general_at = updated.find("[General]").unwrap();
        let display_at = updated.find("[Display]").unwrap();
        let key_at = updated.find("bUseThreadedAI=1").unwrap();
        assert!(general_at < key_at && key_at < display_at);
    }

    #[test]
    fn creates_missing_section_and_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("fallout.ini");
        set_value(&file, "Display", "iSize W", "1920").unwrap();
        set_value(&file, "General", "SLocalSavePath", "Saves").unwrap();
        assert_eq!(
            get_value(&file, "display", "ISIZE W").unwrap(),
            Some("1920".to_string())
        );
        assert_eq!(
            get_value(&file, "General", "SLocalSavePath").unwrap(),
            Some("Saves".to_string())
        );
    }
}
