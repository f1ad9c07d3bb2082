use crate::ini;
use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Fallout 3";
const STEAM_APP_ID: &str = "22300";

/// Resolved locations for a Fallout 3 install. The user dir is the
/// `My Games/Fallout3` folder holding the INIs; the local dir is the
/// `AppData/Local/Fallout3` folder holding plugins.txt.
#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub plugins_dir: PathBuf,
    pub user_dir: PathBuf,
    pub fallout_ini: PathBuf,
    pub fallout_prefs_ini: PathBuf,
    pub geck_ini: PathBuf,
    pub geck_prefs_ini: PathBuf,
    pub renderer_file: PathBuf,
    pub plugins_file: PathBuf,
    pub saves_dir: PathBuf,
}

impl GamePaths {
    pub fn settings_files(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("Fallout.ini", self.fallout_ini.as_path()),
            ("FalloutPrefs.ini", self.fallout_prefs_ini.as_path()),
            ("GECKCustom.ini", self.geck_ini.as_path()),
            ("GECKPrefs.ini", self.geck_prefs_ini.as_path()),
        ]
    }
}

pub fn detect_paths(
    game_root_override: Option<&Path>,
    user_dir_override: Option<&Path>,
) -> Result<GamePaths> {
    let game_root = match game_root_override {
        Some(path) => path.to_path_buf(),
        None => find_game_root().context("locate Fallout 3 game directory")?,
    };

    let user_dir = match user_dir_override {
        Some(path) => path.to_path_buf(),
        None => find_user_dir().context("locate Fallout 3 user data directory")?,
    };

    if !looks_like_game_root(&game_root) {
        bail!(
            "invalid game root: expected Data/ and a Fallout 3 executable in {}",
            game_root.display()
        );
    }
    if !looks_like_user_dir(&user_dir) {
        bail!("invalid user data directory: {}", user_dir.display());
    }

    let plugins_dir = game_root.join("Data");
    let fallout_ini = user_dir.join("Fallout.ini");
    let fallout_prefs_ini = user_dir.join("FalloutPrefs.ini");
    let geck_ini = user_dir.join("GECKCustom.ini");
    let geck_prefs_ini = user_dir.join("GECKPrefs.ini");
    let renderer_file = user_dir.join("RendererInfo.txt");
    let plugins_file = local_settings_dir(&user_dir).join("plugins.txt");

    let saves_dir = user_dir.join(saves_leaf(&fallout_ini));

    Ok(GamePaths {
        game_root,
        plugins_dir,
        user_dir,
        fallout_ini,
        fallout_prefs_ini,
        geck_ini,
        geck_prefs_ini,
        renderer_file,
        plugins_file,
        saves_dir,
    })
}

/// The engine reads the save folder name out of Fallout.ini; "Games" is the
/// stock default when the key is absent.
fn saves_leaf(fallout_ini: &Path) -> PathBuf {
    let leaf = ini::get_value(fallout_ini, "General", "SLocalSavePath")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Games".to_string());
    PathBuf::from(leaf.replace('\\', "/"))
}

/// plugins.txt lives under AppData/Local/Fallout3 in the same Windows user
/// profile as the Documents/My Games dir. When the user dir does not sit in
/// such a profile (tests, hand-rolled setups), fall back to the user dir.
fn local_settings_dir(user_dir: &Path) -> PathBuf {
    let mut cursor = user_dir;
    while let Some(parent) = cursor.parent() {
        if cursor.file_name().map(|name| name == "Documents") == Some(true) {
            let local = parent.join("AppData/Local/Fallout3");
            if local.is_dir() {
                return local;
            }
        }
        cursor = parent;
    }
    user_dir.to_path_buf()
}

fn find_game_root() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = dirs_home() {
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".steam/steam"));
    }

    let mut libraries = Vec::new();
    for base in candidates {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                libraries.extend(paths);
            }
        }
        libraries.push(base);
    }

    for lib in libraries {
        for folder in ["Fallout 3 goty", "Fallout 3"] {
            let candidate = lib.join("steamapps/common").join(folder);
            if looks_like_game_root(&candidate) {
                return Some(candidate);
            }
        }
    }

    None
}

fn find_user_dir() -> Option<PathBuf> {
    let home = dirs_home()?;

    let proton = home
        .join(".local/share/Steam/steamapps/compatdata")
        .join(STEAM_APP_ID)
        .join("pfx/drive_c/users/steamuser/Documents/My Games/Fallout3");
    if proton.is_dir() {
        return Some(proton);
    }

    let native = home.join("Documents/My Games/Fallout3");
    if native.is_dir() {
        return Some(native);
    }

    None
}

fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join("Data").is_dir() && game_exe(path).is_some()
}

pub fn looks_like_user_dir(path: &Path) -> bool {
    path.is_dir()
}

pub fn game_exe(game_root: &Path) -> Option<PathBuf> {
    for name in [
        "Fallout3.exe",
        "fallout3.exe",
        "Fallout3ng.exe",
        "fallout3ng.exe",
    ] {
        let candidate = game_root.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn loader_exe(game_root: &Path) -> Option<PathBuf> {
    for name in ["fose_loader.exe", "FOSE_loader.exe"] {
        let candidate = game_root.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn is_plugin_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase()),
        Some(ext) if ext == "esp" || ext == "esm"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_game_root(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("Fallout 3");
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::write(root.join("Fallout3.exe"), b"mz").unwrap();
        root
    }

    #[test]
    fn recognizes_game_root() {
        let dir = TempDir::new().unwrap();
        let root = fake_game_root(&dir);
        assert!(looks_like_game_root(&root));
        assert!(!looks_like_game_root(dir.path()));
    }

    #[test]
    fn recognizes_plugin_files() {
        assert!(is_plugin_file(Path::new("Data/BrokenSteel.esm")));
        assert!(is_plugin_file(Path::new("mart's mutant mod.ESP")));
        assert!(!is_plugin_file(Path::new("Fallout - Textures.bsa")));
        assert!(!is_plugin_file(Path::new("readme.txt")));
    }

    #[test]
    fn saves_dir_follows_ini_value() {
        let dir = TempDir::new().unwrap();
        let root = fake_game_root(&dir);
        let user = dir.path().join("My Games/Fallout3");
        fs::create_dir_all(&user).unwrap();
        fs::write(
            user.join("Fallout.ini"),
            "[General]\nSLocalSavePath=Saves\\Chars\\\n",
        )
        .unwrap();

        let paths = detect_paths(Some(&root), Some(&user)).unwrap();
        assert_eq!(paths.saves_dir, user.join("Saves/Chars"));
    }

    #[test]
    fn saves_dir_defaults_without_ini() {
        let dir = TempDir::new().unwrap();
        let root = fake_game_root(&dir);
        let user = dir.path().join("My Games/Fallout3");
        fs::create_dir_all(&user).unwrap();

        let paths = detect_paths(Some(&root), Some(&user)).unwrap();
        assert_eq!(paths.saves_dir, user.join("Games"));
    }

    #[test]
    fn plugins_file_prefers_profile_local_dir() {
        let dir = TempDir::new().unwrap();
        let root = fake_game_root(&dir);
        let profile = dir.path().join("pfx/drive_c/users/steamuser");
        let user = profile.join("Documents/My Games/Fallout3");
        fs::create_dir_all(&user).unwrap();
        fs::create_dir_all(profile.join("AppData/Local/Fallout3")).unwrap();

        let paths = detect_paths(Some(&root), Some(&user)).unwrap();
        assert_eq!(
            paths.plugins_file,
            profile.join("AppData/Local/Fallout3/plugins.txt")
        );

        let bare_user = dir.path().join("bare");
        fs::create_dir_all(&bare_user).unwrap();
        let paths = detect_paths(Some(&root), Some(&bare_user)).unwrap();
        assert_eq!(paths.plugins_file, bare_user.join("plugins.txt"));
    }
}
