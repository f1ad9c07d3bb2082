use crate::{
    config::{AppConfig, GameConfig},
    fallout3::GamePaths,
    game,
    install_log::InstallLog,
    launch,
    permissions::PermissionScope,
    plugins,
    script::{AcceptAll, DataDirShaders, InstallScript, OverwritePrompt, StdinPrompt, UpgradeScript},
    shader, sorter,
    sorter::{Masterlist, ReportInput},
    update,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    yes: bool,
}

#[derive(Debug)]
enum CliCommand {
    Paths,
    PluginsList,
    PluginsActivate(String),
    PluginsDeactivate(String),
    PluginsOrder(Vec<String>),
    PluginsReadonly,
    Sort,
    Report,
    ShadersList(u32),
    Launch,
    Log,
    MasterlistVersion,
    MasterlistUpdate,
    TweakIni(TweakIniOptions),
    TweakShader(TweakShaderOptions),
    Help,
    Version,
}

#[derive(Debug)]
struct TweakIniOptions {
    mod_name: String,
    upgrade: bool,
    file: String,
    section: String,
    key: String,
    value: String,
}

#[derive(Debug)]
struct TweakShaderOptions {
    mod_name: String,
    upgrade: bool,
    package: u32,
    shader: String,
    data_file: PathBuf,
}

struct Session {
    app: AppConfig,
    config: GameConfig,
    paths: GamePaths,
}

impl Session {
    fn open() -> Result<Self> {
        let app = AppConfig::load_or_create()?;
        let config = GameConfig::load_or_create(app.active_game)?;
        let paths = game::detect_paths(
            app.active_game,
            config.game_root_override(),
            config.user_dir_override(),
        )?;
        Ok(Session { app, config, paths })
    }
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args);
    let command = parse_command(&tokens)?;

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("WasteWorks v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut session = Session::open()?;
            run_command(&mut session, command, &global)
        }
    }
}

fn parse_global_options(args: &[String]) -> (GlobalOptions, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut yes = false;
    let mut tokens = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        if arg == "--yes" || arg == "-y" {
            yes = true;
            continue;
        }
        tokens.push(arg.to_string());
    }

    (GlobalOptions { format, yes }, tokens)
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    match head.as_str() {
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        "--version" | "-V" | "version" => Ok(CliCommand::Version),
        "paths" => Ok(CliCommand::Paths),
        "plugins" => {
            let sub = tokens.get(1).map(|value| value.as_str()).unwrap_or("list");
            match sub {
                "list" => Ok(CliCommand::PluginsList),
                "activate" => {
                    let name = tokens
                        .get(2)
                        .context("plugins activate requires a plugin name")?;
                    Ok(CliCommand::PluginsActivate(name.to_string()))
                }
                "deactivate" => {
                    let name = tokens
                        .get(2)
                        .context("plugins deactivate requires a plugin name")?;
                    Ok(CliCommand::PluginsDeactivate(name.to_string()))
                }
                "order" => {
                    let names: Vec<String> = tokens.get(2..).unwrap_or(&[]).to_vec();
                    if names.is_empty() {
                        bail!("plugins order requires one or more plugin names");
                    }
                    Ok(CliCommand::PluginsOrder(names))
                }
                "readonly" => Ok(CliCommand::PluginsReadonly),
                _ => bail!(
                    "Unknown plugins command: {sub} (use 'list', 'activate', 'deactivate', 'order', or 'readonly')"
                ),
            }
        }
        "sort" => Ok(CliCommand::Sort),
        "report" => Ok(CliCommand::Report),
        "shaders" => {
            let package = tokens
                .get(1)
                .context("shaders requires a package number")?;
            let package: u32 = package
                .parse()
                .with_context(|| format!("invalid package number: {package}"))?;
            Ok(CliCommand::ShadersList(package))
        }
        "launch" => Ok(CliCommand::Launch),
        "log" => Ok(CliCommand::Log),
        "masterlist" => {
            let sub = tokens.get(1).map(|value| value.as_str()).unwrap_or("version");
            match sub {
                "version" => Ok(CliCommand::MasterlistVersion),
                "update" => Ok(CliCommand::MasterlistUpdate),
                _ => bail!("Unknown masterlist command: {sub} (use 'version' or 'update')"),
            }
        }
        "tweak" => parse_tweak(tokens.get(1..).unwrap_or(&[])),
        _ => bail!("Unknown command: {head} (use --help for usage)"),
    }
}

fn parse_tweak(tokens: &[String]) -> Result<CliCommand> {
    let Some(kind) = tokens.first() else {
        bail!("tweak requires 'ini' or 'shader'");
    };

    let mut mod_name = None;
    let mut upgrade = false;
    let mut positional = Vec::new();
    let mut iter = tokens.iter().skip(1).peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--mod" | "-m" => {
                if let Some(value) = iter.next() {
                    mod_name = Some(value.to_string());
                } else {
                    bail!("--mod requires a value");
                }
            }
            value if value.starts_with("--mod=") => {
                mod_name = Some(value.trim_start_matches("--mod=").to_string());
            }
            "--upgrade" | "-u" => upgrade = true,
            _ => positional.push(arg.to_string()),
        }
    }

    let mod_name = mod_name.context("tweak requires --mod <name>")?;

    match kind.as_str() {
        "ini" => {
            let [file, section, key, value] = positional.as_slice() else {
                bail!("tweak ini requires <file> <section> <key> <value>");
            };
            Ok(CliCommand::TweakIni(TweakIniOptions {
                mod_name,
                upgrade,
                file: file.clone(),
                section: section.clone(),
                key: key.clone(),
                value: value.clone(),
            }))
        }
        "shader" => {
            let [package, shader, data_file] = positional.as_slice() else {
                bail!("tweak shader requires <package> <shader> <data-file>");
            };
            let package: u32 = package
                .parse()
                .with_context(|| format!("invalid package number: {package}"))?;
            Ok(CliCommand::TweakShader(TweakShaderOptions {
                mod_name,
                upgrade,
                package,
                shader: shader.clone(),
                data_file: PathBuf::from(data_file),
            }))
        }
        other => bail!("Unknown tweak kind: {other} (use 'ini' or 'shader')"),
    }
}

fn run_command(session: &mut Session, command: CliCommand, global: &GlobalOptions) -> Result<()> {
    match command {
        CliCommand::Paths => list_paths(session, global.format),
        CliCommand::PluginsList => list_plugins(session, global.format),
        CliCommand::PluginsActivate(name) => {
            if !game::is_plugin_file(session.app.active_game, std::path::Path::new(&name)) {
                bail!("not a plugin file: {name}");
            }
            plugins::set_active(&session.paths, &name, true)?;
            println!("Activated {name}");
            Ok(())
        }
        CliCommand::PluginsDeactivate(name) => {
            plugins::set_active(&session.paths, &name, false)?;
            println!("Deactivated {name}");
            Ok(())
        }
        CliCommand::PluginsOrder(names) => {
            plugins::set_load_order(&session.paths, &names)?;
            println!("Load order updated");
            Ok(())
        }
        CliCommand::PluginsReadonly => {
            let locked = plugins::scan_read_only(&session.paths)?;
            if locked.is_empty() {
                println!("No read-only plugins.");
            } else {
                for name in locked {
                    println!("{name}");
                }
            }
            Ok(())
        }
        CliCommand::Sort => sort_load_order(session),
        CliCommand::Report => print_report(session, global.format),
        CliCommand::ShadersList(package) => list_shaders(session, package, global.format),
        CliCommand::Launch => show_launch_plan(session, global.format),
        CliCommand::Log => list_log(session, global.format),
        CliCommand::MasterlistVersion => {
            match update::local_revision(&session.config.masterlist_path())? {
                Some(revision) => println!("Masterlist revision {revision}"),
                None => println!("No local masterlist; run 'masterlist update'"),
            }
            Ok(())
        }
        CliCommand::MasterlistUpdate => {
            match update::update_masterlist(&session.config.masterlist_path())? {
                update::MasterlistUpdate::UpToDate { revision } => {
                    println!(
                        "Masterlist already current (revision {})",
                        revision.map_or_else(|| "unknown".to_string(), |rev| rev.to_string())
                    );
                }
                update::MasterlistUpdate::Updated { old, new } => {
                    println!(
                        "Masterlist updated: {} -> {}",
                        old.map_or_else(|| "none".to_string(), |rev| rev.to_string()),
                        new.map_or_else(|| "unknown".to_string(), |rev| rev.to_string())
                    );
                }
            }
            Ok(())
        }
        CliCommand::TweakIni(options) => tweak_ini(session, options, global.yes),
        CliCommand::TweakShader(options) => tweak_shader(session, options, global.yes),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

#[derive(Serialize)]
struct PathsOutput {
    game_root: String,
    data_dir: String,
    user_dir: String,
    settings_files: Vec<SettingsFileItem>,
    renderer_file: String,
    plugins_file: String,
    saves_dir: String,
}

#[derive(Serialize)]
struct SettingsFileItem {
    name: String,
    path: String,
}

fn list_paths(session: &Session, format: OutputFormat) -> Result<()> {
    let paths = &session.paths;
    let output = PathsOutput {
        game_root: paths.game_root.display().to_string(),
        data_dir: paths.plugins_dir.display().to_string(),
        user_dir: paths.user_dir.display().to_string(),
        settings_files: paths
            .settings_files()
            .into_iter()
            .map(|(name, path)| SettingsFileItem {
                name: name.to_string(),
                path: path.display().to_string(),
            })
            .collect(),
        renderer_file: paths.renderer_file.display().to_string(),
        plugins_file: paths.plugins_file.display().to_string(),
        saves_dir: paths.saves_dir.display().to_string(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Game root: {}", output.game_root);
            println!("Data dir: {}", output.data_dir);
            println!("User dir: {}", output.user_dir);
            for item in &output.settings_files {
                println!("{}: {}", item.name, item.path);
            }
            println!("RendererInfo.txt: {}", output.renderer_file);
            println!("plugins.txt: {}", output.plugins_file);
            println!("Saves: {}", output.saves_dir);
        }
    }
    Ok(())
}

fn list_plugins(session: &Session, format: OutputFormat) -> Result<()> {
    let items = plugins::list_plugins(&session.paths)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            for (index, item) in items.iter().enumerate() {
                let active = if item.active { "x" } else { " " };
                let lock = if item.read_only { " (read-only)" } else { "" };
                println!("{:>3} [{active}] {}{lock}", index + 1, item.name);
            }
        }
    }
    Ok(())
}

fn sort_load_order(session: &Session) -> Result<()> {
    let masterlist_path = session.config.masterlist_path();
    if !masterlist_path.exists() {
        bail!("no local masterlist; run 'masterlist update' first");
    }
    let list = Masterlist::load(&masterlist_path)?;
    if list.is_empty() {
        bail!("local masterlist is empty; run 'masterlist update'");
    }
    let names: Vec<String> = plugins::list_plugins(&session.paths)?
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    let sorted = sorter::sort_plugins(&list, &names);
    plugins::set_load_order(&session.paths, &sorted)?;
    println!("Sorted {} plugin(s) against masterlist", sorted.len());
    Ok(())
}

fn print_report(session: &Session, format: OutputFormat) -> Result<()> {
    let masterlist_path = session.config.masterlist_path();
    let list = if masterlist_path.exists() {
        Masterlist::load(&masterlist_path)?
    } else {
        Masterlist::default()
    };

    let mut inputs = Vec::new();
    for entry in plugins::list_plugins(&session.paths)? {
        let header = plugins::read_header(&session.paths.plugins_dir.join(&entry.name))?;
        inputs.push(ReportInput {
            name: entry.name,
            active: entry.active,
            corrupt: header.corrupt,
            masters: header.masters,
        });
    }

    let report = sorter::generate_report(&list, &inputs);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print!("{}", report.render()),
    }
    Ok(())
}

#[derive(Serialize)]
struct ShaderItem {
    name: String,
    size: usize,
}

fn list_shaders(session: &Session, package: u32, format: OutputFormat) -> Result<()> {
    let path = shader::package_path(&session.paths.plugins_dir, package);
    let archive = shader::SdpArchive::open(&path)
        .with_context(|| format!("open shader package {}", path.display()))?;

    let items: Vec<ShaderItem> = archive
        .shader_names()
        .map(|name| ShaderItem {
            size: archive.shader_data(name).map(<[u8]>::len).unwrap_or(0),
            name: name.to_string(),
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            for item in items {
                println!("{} ({} bytes)", item.name, item.size);
            }
        }
    }
    Ok(())
}

fn show_launch_plan(session: &Session, format: OutputFormat) -> Result<()> {
    let plan = launch::resolve(&session.config, &session.paths)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => {
            println!("Program: {}", plan.program.display());
            if !plan.args.is_empty() {
                println!("Args: {}", plan.args.join(" "));
            }
            println!("Working dir: {}", plan.working_dir.display());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LogItem {
    key: String,
    owner: String,
    previous: Vec<String>,
}

fn list_log(session: &Session, format: OutputFormat) -> Result<()> {
    let log = InstallLog::load_or_create(&session.config.install_info_dir)?;

    let mut items = Vec::new();
    for (key, chain) in log.ini_owners() {
        items.push(log_item(key, chain.iter().map(|entry| entry.mod_name.as_str())));
    }
    for (key, chain) in log.game_value_owners() {
        items.push(log_item(key, chain.iter().map(|entry| entry.mod_name.as_str())));
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("Install log is empty.");
            } else {
                println!(
                    "{} ini key(s), {} game value(s) tracked",
                    log.ini_edit_count(),
                    log.game_value_edit_count()
                );
                for item in items {
                    if item.previous.is_empty() {
                        println!("{}  <- {}", item.key, item.owner);
                    } else {
                        println!(
                            "{}  <- {} (previously {})",
                            item.key,
                            item.owner,
                            item.previous.join(", ")
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn log_item<'a>(key: &str, chain: impl Iterator<Item = &'a str>) -> LogItem {
    let names: Vec<String> = chain.map(|name| name.to_string()).collect();
    let owner = names.last().cloned().unwrap_or_default();
    let previous = names[..names.len().saturating_sub(1)].to_vec();
    LogItem {
        key: key.to_string(),
        owner,
        previous,
    }
}

/// Maps a short INI name to its detected path; anything else is taken as a
/// literal path.
fn resolve_ini_target(paths: &GamePaths, file: &str) -> PathBuf {
    match file.to_lowercase().as_str() {
        "fallout.ini" => paths.fallout_ini.clone(),
        "falloutprefs.ini" => paths.fallout_prefs_ini.clone(),
        "geckcustom.ini" | "geck.ini" => paths.geck_ini.clone(),
        "geckprefs.ini" => paths.geck_prefs_ini.clone(),
        _ => PathBuf::from(file),
    }
}

fn tweak_ini(session: &mut Session, options: TweakIniOptions, yes: bool) -> Result<()> {
    let file = resolve_ini_target(&session.paths, &options.file);
    let mut log = InstallLog::load_or_create(&session.config.install_info_dir)?;
    let scope = PermissionScope::for_game(&session.paths, &session.config.install_info_dir);
    let mut shaders = DataDirShaders::new(&session.paths.plugins_dir);
    let mut prompt = make_prompt(session, yes);

    let base = InstallScript::new(
        &options.mod_name,
        &log,
        &scope,
        prompt.as_mut(),
        &mut shaders,
    );

    let (applied, merge) = if options.upgrade {
        let mut script = UpgradeScript::new(base);
        let applied = script.edit_ini(&file, &options.section, &options.key, &options.value)?;
        (applied, script.into_merge_set())
    } else {
        let mut script = base;
        let applied = script.edit_ini(&file, &options.section, &options.key, &options.value)?;
        (applied, script.into_merge_set())
    };

    if applied {
        log.commit(&options.mod_name, &merge);
        log.save(&session.config.install_info_dir)?;
        println!(
            "Recorded [{}] {} for {}",
            options.section, options.key, options.mod_name
        );
    } else {
        println!("Edit declined; nothing recorded");
    }
    Ok(())
}

fn tweak_shader(session: &mut Session, options: TweakShaderOptions, yes: bool) -> Result<()> {
    let data = std::fs::read(&options.data_file)
        .with_context(|| format!("read shader data {}", options.data_file.display()))?;
    let mut log = InstallLog::load_or_create(&session.config.install_info_dir)?;
    let scope = PermissionScope::for_game(&session.paths, &session.config.install_info_dir);
    let mut shaders = DataDirShaders::new(&session.paths.plugins_dir);
    let mut prompt = make_prompt(session, yes);

    let base = InstallScript::new(
        &options.mod_name,
        &log,
        &scope,
        prompt.as_mut(),
        &mut shaders,
    );

    let (applied, merge) = if options.upgrade {
        let mut script = UpgradeScript::new(base);
        let applied = script.edit_shader(options.package, &options.shader, &data)?;
        (applied, script.into_merge_set())
    } else {
        let mut script = base;
        let applied = script.edit_shader(options.package, &options.shader, &data)?;
        (applied, script.into_merge_set())
    };

    if applied {
        log.commit(&options.mod_name, &merge);
        log.save(&session.config.install_info_dir)?;
        println!(
            "Recorded {} for {}",
            shader::shader_key(options.package, &options.shader),
            options.mod_name
        );
    } else {
        println!("Edit declined; nothing recorded");
    }
    Ok(())
}

fn make_prompt(session: &Session, yes: bool) -> Box<dyn OverwritePrompt> {
    if yes || !session.app.confirm_overwrites {
        Box::new(AcceptAll)
    } else {
        Box::new(StdinPrompt)
    }
}

fn print_help() {
    println!("WasteWorks v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  wasteworks paths                       Show detected game paths");
    println!("  wasteworks plugins list                List plugins in load order");
    println!("  wasteworks plugins activate <name>     Add a plugin to plugins.txt");
    println!("  wasteworks plugins deactivate <name>   Remove a plugin from plugins.txt");
    println!("  wasteworks plugins order <names...>    Move plugins to the front of the order");
    println!("  wasteworks plugins readonly            List read-only plugins");
    println!("  wasteworks sort                        Sort the load order by masterlist");
    println!("  wasteworks report                      Check plugins against the masterlist");
    println!("  wasteworks shaders <package>           List shaders in a package");
    println!("  wasteworks launch                      Show the resolved launch command");
    println!("  wasteworks log                         Show recorded edit ownership");
    println!("  wasteworks masterlist version          Show the local masterlist revision");
    println!("  wasteworks masterlist update           Fetch the latest masterlist");
    println!("  wasteworks tweak ini --mod <name> [--upgrade] <file> <section> <key> <value>");
    println!("  wasteworks tweak shader --mod <name> [--upgrade] <package> <shader> <data-file>");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                   Output format");
    println!("  -y, --yes                              Skip overwrite confirmation");
    println!("  -h, --help                             Show help");
    println!("  -V, --version                          Show version");
}
