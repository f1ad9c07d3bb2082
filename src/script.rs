//! Install scripts: the edit rules a mod runs under. `InstallScript` applies
//! first-install precedence (current owner of a value gets asked before being
//! overwritten); `UpgradeScript` wraps it and short-circuits for values the
//! upgrading mod has edited before, so an upgrade never steals ownership it
//! lost to a later mod.

use crate::{
    ini,
    install_log::{InstallLog, MergeSet},
    permissions::PermissionScope,
    shader::{self, ShaderError},
};
use anyhow::{Context, Result};
use log::{debug, info};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

/// Asked before overwriting a live value that a different mod currently owns.
pub trait OverwritePrompt {
    fn confirm_overwrite(&mut self, description: &str, current_owner: &str) -> bool;
}

/// Non-interactive policy used by scripted installs.
pub struct AcceptAll;

impl OverwritePrompt for AcceptAll {
    fn confirm_overwrite(&mut self, _description: &str, _current_owner: &str) -> bool {
        true
    }
}

/// Interactive yes/no on stdin, the CLI's prompt.
pub struct StdinPrompt;

impl OverwritePrompt for StdinPrompt {
    fn confirm_overwrite(&mut self, description: &str, current_owner: &str) -> bool {
        print!("{description} is currently set by {current_owner}. Overwrite? [y/N] ");
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

/// Access to the game's shader packages, injectable for tests.
pub trait ShaderStore {
    fn package_path(&self, package: u32) -> PathBuf;
    fn edit_shader(&mut self, package: u32, name: &str, data: &[u8])
        -> Result<Vec<u8>, ShaderError>;
}

/// The real store: packages under Data/Shaders, opened per edit.
pub struct DataDirShaders {
    plugins_dir: PathBuf,
}

impl DataDirShaders {
    pub fn new(plugins_dir: &Path) -> Self {
        Self {
            plugins_dir: plugins_dir.to_path_buf(),
        }
    }
}

impl ShaderStore for DataDirShaders {
    fn package_path(&self, package: u32) -> PathBuf {
        shader::package_path(&self.plugins_dir, package)
    }

    fn edit_shader(
        &mut self,
        package: u32,
        name: &str,
        data: &[u8],
    ) -> Result<Vec<u8>, ShaderError> {
        let mut archive = shader::SdpArchive::open(&self.package_path(package))?;
        archive.edit_shader(name, data)
    }
}

/// First-install edit path. Holds the pending merge set; the caller commits
/// it to the install log once the whole script has run.
pub struct InstallScript<'a> {
    mod_name: String,
    log: &'a InstallLog,
    permissions: &'a PermissionScope,
    prompt: &'a mut dyn OverwritePrompt,
    shaders: &'a mut dyn ShaderStore,
    merge: MergeSet,
}

impl<'a> InstallScript<'a> {
    pub fn new(
        mod_name: &str,
        log: &'a InstallLog,
        permissions: &'a PermissionScope,
        prompt: &'a mut dyn OverwritePrompt,
        shaders: &'a mut dyn ShaderStore,
    ) -> Self {
        Self {
            mod_name: mod_name.to_string(),
            log,
            permissions,
            prompt,
            shaders,
            merge: MergeSet::default(),
        }
    }

    pub fn into_merge_set(self) -> MergeSet {
        self.merge
    }

    /// Returns false when the user declined to overwrite another mod's value;
    /// declining is not an error.
    pub fn edit_ini(&mut self, file: &Path, section: &str, key: &str, value: &str) -> Result<bool> {
        self.permissions.assert_access(file)?;

        if let Some(owner) = self.log.current_ini_owner(file, section, key) {
            if owner != self.mod_name {
                let description = format!("{} [{section}] {key}", file.display());
                if !self.prompt.confirm_overwrite(&description, owner) {
                    debug!("declined overwrite of {description}");
                    return Ok(false);
                }
            }
        }

        ini::set_value(file, section, key, value)
            .with_context(|| format!("apply ini edit {} [{section}] {key}", file.display()))?;
        self.merge.add_ini_edit(file, section, key, value);
        info!("{} set {} [{section}] {key}={value}", self.mod_name, file.display());
        Ok(true)
    }

    pub fn edit_shader(&mut self, package: u32, name: &str, data: &[u8]) -> Result<bool> {
        self.permissions
            .assert_access(&self.shaders.package_path(package))?;

        let value_key = shader::shader_key(package, name);
        if let Some(owner) = self.log.current_game_value_owner(&value_key) {
            if owner != self.mod_name {
                if !self.prompt.confirm_overwrite(&value_key, owner) {
                    debug!("declined overwrite of {value_key}");
                    return Ok(false);
                }
            }
        }

        self.shaders
            .edit_shader(package, name, data)
            .with_context(|| format!("apply shader edit {value_key}"))?;
        self.merge.add_game_value_edit(&value_key, data);
        info!("{} replaced shader {value_key}", self.mod_name);
        Ok(true)
    }
}

/// Upgrade edit path. Wraps the base script; values with no ownership history
/// for the upgrading mod are delegated to the base rules unchanged.
pub struct UpgradeScript<'a> {
    base: InstallScript<'a>,
}

impl<'a> UpgradeScript<'a> {
    pub fn new(base: InstallScript<'a>) -> Self {
        Self { base }
    }

    pub fn into_merge_set(self) -> MergeSet {
        self.base.into_merge_set()
    }

    /// Upgrade rules: if this mod has edited the value before, the new value
    /// is always recorded, but the live file is only touched when this mod is
    /// still the current owner. A failed live write is an error either way.
    pub fn edit_ini(&mut self, file: &Path, section: &str, key: &str, value: &str) -> Result<bool> {
        self.base.permissions.assert_access(file)?;

        let installers = self.base.log.ini_installers(file, section, key);
        if installers.iter().any(|name| *name == self.base.mod_name) {
            if installers.last().map(String::as_str) == Some(self.base.mod_name.as_str()) {
                ini::set_value(file, section, key, value).with_context(|| {
                    format!("apply ini edit {} [{section}] {key}", file.display())
                })?;
                info!(
                    "{} set {} [{section}] {key}={value}",
                    self.base.mod_name,
                    file.display()
                );
            } else {
                debug!(
                    "{} archived {} [{section}] {key}: owned by {}",
                    self.base.mod_name,
                    file.display(),
                    installers.last().map(String::as_str).unwrap_or("nobody")
                );
            }
            self.base.merge.add_ini_edit(file, section, key, value);
            return Ok(true);
        }

        self.base.edit_ini(file, section, key, value)
    }

    /// Same shape for shader edits; a failing archive write surfaces as an
    /// error and leaves no pending record behind.
    pub fn edit_shader(&mut self, package: u32, name: &str, data: &[u8]) -> Result<bool> {
        self.base
            .permissions
            .assert_access(&self.base.shaders.package_path(package))?;

        let value_key = shader::shader_key(package, name);
        let installers = self.base.log.game_value_installers(&value_key);
        if installers.iter().any(|name| *name == self.base.mod_name) {
            if installers.last().map(String::as_str) == Some(self.base.mod_name.as_str()) {
                self.base
                    .shaders
                    .edit_shader(package, name, data)
                    .with_context(|| format!("apply shader edit {value_key}"))?;
                info!("{} replaced shader {value_key}", self.base.mod_name);
            } else {
                debug!(
                    "{} archived shader {value_key}: owned by {}",
                    self.base.mod_name,
                    installers.last().map(String::as_str).unwrap_or("nobody")
                );
            }
            self.base.merge.add_game_value_edit(&value_key, data);
            return Ok(true);
        }

        self.base.edit_shader(package, name, data)
    }
}
