//! The install log records which mod made which configuration edit, as an
//! ordered ownership history per key. Histories only ever grow: the entry at
//! the end is the current owner of the live value, earlier entries are
//! archived values that uninstalling later mods can fall back to.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnedValue {
    pub mod_name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnedBytes {
    pub mod_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InstallLog {
    #[serde(default)]
    ini_edits: BTreeMap<String, Vec<OwnedValue>>,
    #[serde(default)]
    game_value_edits: BTreeMap<String, Vec<OwnedBytes>>,
}

impl InstallLog {
    pub fn load_or_create(install_info_dir: &Path) -> Result<Self> {
        let path = log_path(install_info_dir);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read install log")?;
            let log = serde_json::from_str(&raw).context("parse install log")?;
            return Ok(log);
        }

        fs::create_dir_all(install_info_dir).context("create install-info dir")?;
        let log = InstallLog::default();
        log.save(install_info_dir)?;
        Ok(log)
    }

    pub fn save(&self, install_info_dir: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize install log")?;
        fs::write(log_path(install_info_dir), raw).context("write install log")?;
        Ok(())
    }

    /// Mods that have ever edited this INI value, oldest first.
    pub fn ini_installers(&self, file: &Path, section: &str, key: &str) -> Vec<String> {
        self.ini_edits
            .get(&ini_key(file, section, key))
            .map(|history| history.iter().map(|entry| entry.mod_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn current_ini_owner(&self, file: &Path, section: &str, key: &str) -> Option<&str> {
        self.ini_edits
            .get(&ini_key(file, section, key))
            .and_then(|history| history.last())
            .map(|entry| entry.mod_name.as_str())
    }

    pub fn ini_value_for(
        &self,
        file: &Path,
        section: &str,
        key: &str,
        mod_name: &str,
    ) -> Option<&str> {
        self.ini_edits
            .get(&ini_key(file, section, key))
            .and_then(|history| history.iter().rev().find(|entry| entry.mod_name == mod_name))
            .map(|entry| entry.value.as_str())
    }

    /// Mods that have ever edited this game-specific value, oldest first.
    pub fn game_value_installers(&self, value_key: &str) -> Vec<String> {
        self.game_value_edits
            .get(value_key)
            .map(|history| history.iter().map(|entry| entry.mod_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn current_game_value_owner(&self, value_key: &str) -> Option<&str> {
        self.game_value_edits
            .get(value_key)
            .and_then(|history| history.last())
            .map(|entry| entry.mod_name.as_str())
    }

    /// Applies a finished install's pending change set. A mod already in a
    /// key's history keeps its position and gets its archived value updated;
    /// a mod new to the key is appended and becomes the current owner.
    pub fn commit(&mut self, mod_name: &str, merge: &MergeSet) {
        for edit in &merge.ini_edits {
            let history = self.ini_edits.entry(edit.key.clone()).or_default();
            match history.iter_mut().find(|entry| entry.mod_name == mod_name) {
                Some(entry) => entry.value = edit.value.clone(),
                None => history.push(OwnedValue {
                    mod_name: mod_name.to_string(),
                    value: edit.value.clone(),
                }),
            }
        }
        for edit in &merge.game_value_edits {
            let history = self.game_value_edits.entry(edit.key.clone()).or_default();
            match history.iter_mut().find(|entry| entry.mod_name == mod_name) {
                Some(entry) => entry.data = edit.data.clone(),
                None => history.push(OwnedBytes {
                    mod_name: mod_name.to_string(),
                    data: edit.data.clone(),
                }),
            }
        }
        debug!(
            "committed {} ini edit(s), {} game value edit(s) for {mod_name}",
            merge.ini_edit_count(),
            merge.game_value_edit_count()
        );
    }

    pub fn ini_edit_count(&self) -> usize {
        self.ini_edits.len()
    }

    pub fn game_value_edit_count(&self) -> usize {
        self.game_value_edits.len()
    }

    pub fn ini_owners(&self) -> impl Iterator<Item = (&str, &[OwnedValue])> {
        self.ini_edits
            .iter()
            .map(|(key, history)| (key.as_str(), history.as_slice()))
    }

    pub fn game_value_owners(&self) -> impl Iterator<Item = (&str, &[OwnedBytes])> {
        self.game_value_edits
            .iter()
            .map(|(key, history)| (key.as_str(), history.as_slice()))
    }
}

/// Pending change set accumulated while a single install script runs and
/// committed to the log in one step once the script finishes.
#[derive(Debug, Default, Clone)]
pub struct MergeSet {
    ini_edits: Vec<KeyedValue>,
    game_value_edits: Vec<KeyedBytes>,
}

#[derive(Debug, Clone)]
struct KeyedValue {
    key: String,
    value: String,
}

#[derive(Debug, Clone)]
struct KeyedBytes {
    key: String,
    data: Vec<u8>,
}

impl MergeSet {
    pub fn add_ini_edit(&mut self, file: &Path, section: &str, key: &str, value: &str) {
        let key = ini_key(file, section, key);
        match self.ini_edits.iter_mut().find(|edit| edit.key == key) {
            Some(edit) => edit.value = value.to_string(),
            None => self.ini_edits.push(KeyedValue {
                key,
                value: value.to_string(),
            }),
        }
    }

    pub fn add_game_value_edit(&mut self, value_key: &str, data: &[u8]) {
        match self
            .game_value_edits
            .iter_mut()
            .find(|edit| edit.key == value_key)
        {
            Some(edit) => edit.data = data.to_vec(),
            None => self.game_value_edits.push(KeyedBytes {
                key: value_key.to_string(),
                data: data.to_vec(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ini_edits.is_empty() && self.game_value_edits.is_empty()
    }

    pub fn ini_edit_count(&self) -> usize {
        self.ini_edits.len()
    }

    pub fn game_value_edit_count(&self) -> usize {
        self.game_value_edits.len()
    }

    pub fn has_ini_edit(&self, file: &Path, section: &str, key: &str) -> bool {
        let key = ini_key(file, section, key);
        self.ini_edits.iter().any(|edit| edit.key == key)
    }

    pub fn has_game_value_edit(&self, value_key: &str) -> bool {
        self.game_value_edits.iter().any(|edit| edit.key == value_key)
    }
}

/// INI keys are matched case-insensitively everywhere, so histories are
/// stored under a lowercased composite key.
fn ini_key(file: &Path, section: &str, key: &str) -> String {
    format!(
        "{}|{}|{}",
        file.to_string_lossy().to_lowercase(),
        section.to_lowercase(),
        key.to_lowercase()
    )
}

fn log_path(install_info_dir: &Path) -> PathBuf {
    install_info_dir.join("install-log.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ini_file() -> PathBuf {
        PathBuf::from("/user/Fallout.ini")
    }

    #[test]
    fn commit_appends_new_owner() {
        let mut log = InstallLog::default();
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "1920");
        log.commit("ModA", &merge);

        assert_eq!(
            log.ini_installers(&ini_file(), "display", "isize w"),
            vec!["ModA".to_string()]
        );
        assert_eq!(
            log.current_ini_owner(&ini_file(), "Display", "iSize W"),
            Some("ModA")
        );
    }

    #[test]
    fn commit_keeps_existing_position() {
        let mut log = InstallLog::default();
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "1920");
        log.commit("ModA", &merge);
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "2560");
        log.commit("ModB", &merge);

        // ModA upgrades while ModB owns the live value: history order holds.
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "1024");
        log.commit("ModA", &merge);

        assert_eq!(
            log.ini_installers(&ini_file(), "Display", "iSize W"),
            vec!["ModA".to_string(), "ModB".to_string()]
        );
        assert_eq!(
            log.ini_value_for(&ini_file(), "Display", "iSize W", "ModA"),
            Some("1024")
        );
        assert_eq!(
            log.current_ini_owner(&ini_file(), "Display", "iSize W"),
            Some("ModB")
        );
    }

    #[test]
    fn merge_set_last_write_wins_per_key() {
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "1920");
        merge.add_ini_edit(&ini_file(), "DISPLAY", "ISIZE W", "2560");
        assert_eq!(merge.ini_edit_count(), 1);
    }

    #[test]
    fn game_value_history_tracks_owners() {
        let mut log = InstallLog::default();
        let mut merge = MergeSet::default();
        merge.add_game_value_edit("sdp:19/WATER", &[1, 2, 3]);
        log.commit("ModA", &merge);
        log.commit("ModB", &merge);

        assert_eq!(
            log.game_value_installers("sdp:19/WATER"),
            vec!["ModA".to_string(), "ModB".to_string()]
        );
        assert_eq!(log.current_game_value_owner("sdp:19/WATER"), Some("ModB"));
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let mut log = InstallLog::load_or_create(dir.path()).unwrap();
        let mut merge = MergeSet::default();
        merge.add_ini_edit(&ini_file(), "Display", "iSize W", "1920");
        merge.add_game_value_edit("sdp:3/HDR", &[9, 9]);
        log.commit("ModA", &merge);
        log.save(dir.path()).unwrap();

        let reloaded = InstallLog::load_or_create(dir.path()).unwrap();
        assert_eq!(
            reloaded.current_ini_owner(&ini_file(), "Display", "iSize W"),
            Some("ModA")
        );
        assert_eq!(reloaded.current_game_value_owner("sdp:3/HDR"), Some("ModA"));
    }
}
