//! Explicit permission scope for file edits. Every edit operation takes a
//! scope and asserts its target path before touching anything, so the caller
//! always sees which roots an install script may write under.

use crate::fallout3::GamePaths;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("edit target {path} is outside the granted scope")]
    Denied { path: PathBuf },
    #[error("edit target {path} escapes its root via parent components")]
    Traversal { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PermissionScope {
    roots: Vec<PathBuf>,
}

impl PermissionScope {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots.into_iter().map(|root| normalize(&root)).collect();
        Self { roots }
    }

    /// The scope an install script runs under: the game install, the user
    /// data dir, and the manager's own install-info dir.
    pub fn for_game(paths: &GamePaths, install_info_dir: &Path) -> Self {
        Self::new(vec![
            paths.game_root.clone(),
            paths.user_dir.clone(),
            paths
                .plugins_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            install_info_dir.to_path_buf(),
        ])
    }

    pub fn assert_access(&self, path: &Path) -> Result<(), PermissionError> {
        let normalized = normalize_checked(path)?;
        if self
            .roots
            .iter()
            .any(|root| !root.as_os_str().is_empty() && normalized.starts_with(root))
        {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Lexical normalization: the target usually does not exist yet, so
/// canonicalize is not an option. `..` that climbs above the path start is
/// rejected rather than guessed at.
fn normalize_checked(path: &Path) -> Result<PathBuf, PermissionError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(PermissionError::Traversal {
                        path: path.to_path_buf(),
                    });
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn normalize(path: &Path) -> PathBuf {
    normalize_checked(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> PermissionScope {
        PermissionScope::new(vec![
            PathBuf::from("/games/fallout3"),
            PathBuf::from("/home/user/My Games/Fallout3"),
        ])
    }

    #[test]
    fn grants_paths_under_roots() {
        let scope = scope();
        assert!(scope
            .assert_access(Path::new("/games/fallout3/Data/Shaders/shaderpackage019.sdp"))
            .is_ok());
        assert!(scope
            .assert_access(Path::new("/home/user/My Games/Fallout3/Fallout.ini"))
            .is_ok());
    }

    #[test]
    fn denies_paths_outside_roots() {
        let scope = scope();
        let err = scope.assert_access(Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, PermissionError::Denied { .. }));
    }

    #[test]
    fn denies_parent_escape() {
        let scope = scope();
        let err = scope
            .assert_access(Path::new("/games/fallout3/Data/../../../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, PermissionError::Denied { .. }));
    }
}
