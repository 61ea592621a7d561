mod bootstrap;
mod cli;
mod compile;
mod demos;
mod paths;
mod run;

use std::path::Path;

use anyhow::{Context, Result};
use cli::{Command, ConfigAction};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Run(args)) => run::run(args),
        Some(Command::Compile(args)) => compile::run(args),
        Some(Command::Config(config_cmd)) => handle_config_command(config_cmd.action),
        None => run::run(cli.run),
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    let paths = AppPaths::discover()?;
    match action {
        ConfigAction::Where => {
            println!("config dir:  {}", paths.config_dir().display());
            let file = paths.config_file();
            let status = if file.exists() { "present" } else { "missing" };
            println!("config file: {} ({status})", file.display());
            Ok(())
        }
        ConfigAction::Show { config } => run_config_show(&paths, config.as_deref()),
    }
}

fn run_config_show(paths: &AppPaths, explicit: Option<&Path>) -> Result<()> {
    let (config, origin) = bootstrap::load_config(explicit, paths)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {origin}"))?;
    let rendered = config
        .to_toml_string()
        .context("failed to render configuration")?;
    println!("# source: {origin}");
    print!("{rendered}");
    Ok(())
}
