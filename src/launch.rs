//! Launch command resolution. The manager never starts the game itself; it
//! resolves what would run and hands the plan to the caller.

use crate::{config::GameConfig, fallout3, fallout3::GamePaths};
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub source: LaunchSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchSource {
    Custom,
    ScriptExtender,
    Game,
}

/// Resolution order: configured custom command, then the FOSE loader, then
/// the game executable itself.
pub fn resolve(config: &GameConfig, paths: &GamePaths) -> Result<LaunchPlan> {
    if let Some(command) = config.launch_command.as_deref().filter(|c| !c.is_empty()) {
        return Ok(LaunchPlan {
            program: PathBuf::from(command),
            args: config.launch_args.clone(),
            working_dir: paths.game_root.clone(),
            source: LaunchSource::Custom,
        });
    }

    if let Some(loader) = fallout3::loader_exe(&paths.game_root) {
        return Ok(LaunchPlan {
            program: loader,
            args: config.launch_args.clone(),
            working_dir: paths.game_root.clone(),
            source: LaunchSource::ScriptExtender,
        });
    }

    if let Some(exe) = fallout3::game_exe(&paths.game_root) {
        return Ok(LaunchPlan {
            program: exe,
            args: config.launch_args.clone(),
            working_dir: paths.game_root.clone(),
            source: LaunchSource::Game,
        });
    }

    bail!(
        "no launchable executable in {}; set a custom launch command",
        paths.game_root.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallout3::detect_paths;
    use crate::game::GameId;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(with_loader: bool, with_exe: bool) -> (TempDir, GamePaths) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Fallout 3");
        fs::create_dir_all(root.join("Data")).unwrap();
        // detection needs the game exe even when the test removes it later
        fs::write(root.join("Fallout3.exe"), b"mz").unwrap();
        let user = dir.path().join("user");
        fs::create_dir_all(&user).unwrap();
        let paths = detect_paths(Some(&root), Some(&user)).unwrap();

        if with_loader {
            fs::write(root.join("fose_loader.exe"), b"mz").unwrap();
        }
        if !with_exe {
            fs::remove_file(root.join("Fallout3.exe")).unwrap();
        }
        (dir, paths)
    }

    fn config() -> GameConfig {
        GameConfig {
            game_id: GameId::Fallout3,
            game_name: GameId::Fallout3.display_name().to_string(),
            data_dir: PathBuf::new(),
            game_root: PathBuf::new(),
            user_dir: PathBuf::new(),
            install_info_dir: PathBuf::new(),
            launch_command: None,
            launch_args: Vec::new(),
        }
    }

    #[test]
    fn custom_command_wins() {
        let (_dir, paths) = fixture(true, true);
        let mut config = config();
        config.launch_command = Some("/usr/bin/protonlaunch".to_string());
        config.launch_args = vec!["--big-picture".to_string()];

        let plan = resolve(&config, &paths).unwrap();
        assert_eq!(plan.source, LaunchSource::Custom);
        assert_eq!(plan.program, PathBuf::from("/usr/bin/protonlaunch"));
        assert_eq!(plan.args, vec!["--big-picture"]);
    }

    #[test]
    fn loader_preferred_over_game_exe() {
        let (_dir, paths) = fixture(true, true);
        let plan = resolve(&config(), &paths).unwrap();
        assert_eq!(plan.source, LaunchSource::ScriptExtender);
        assert!(plan.program.ends_with("fose_loader.exe"));
        assert_eq!(plan.working_dir, paths.game_root);
    }

    #[test]
    fn falls_back_to_game_exe() {
        let (_dir, paths) = fixture(false, true);
        let plan = resolve(&config(), &paths).unwrap();
        assert_eq!(plan.source, LaunchSource::Game);
        assert!(plan.program.ends_with("Fallout3.exe"));
    }

    #[test]
    fn errors_when_nothing_launchable() {
        let (_dir, paths) = fixture(false, false);
        let err = resolve(&config(), &paths).unwrap_err();
        assert!(err.to_string().contains("no launchable executable"));
    }
}
