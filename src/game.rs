use crate::fallout3;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    Fallout3,
}

impl Default for GameId {
    fn default() -> Self {
        GameId::Fallout3
    }
}

impl GameId {
    pub fn display_name(self) -> &'static str {
        match self {
            GameId::Fallout3 => fallout3::GAME_NAME,
        }
    }

    pub fn data_dir_name(self) -> &'static str {
        match self {
            GameId::Fallout3 => "Fallout3",
        }
    }
}

pub const SUPPORTED_GAMES: &[GameId] = &[GameId::Fallout3];

pub fn detect_paths(
    game: GameId,
    game_root_override: Option<&Path>,
    user_dir_override: Option<&Path>,
) -> Result<fallout3::GamePaths> {
    match game {
        GameId::Fallout3 => fallout3::detect_paths(game_root_override, user_dir_override),
    }
}

pub fn is_plugin_file(game: GameId, path: &Path) -> bool {
    match game {
        GameId::Fallout3 => fallout3::is_plugin_file(path),
    }
}
