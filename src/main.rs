mod cli;
mod config;
mod fallout3;
mod game;
mod ini;
mod install_log;
mod launch;
mod permissions;
mod plugins;
mod script;
mod shader;
mod sorter;
mod update;

use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();
    cli::run()
}
