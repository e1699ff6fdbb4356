use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use earshot::app::{AlertFormat, RunOptions, run_listen_command, run_replay_command};
use earshot::audio::capture::list_devices;
use earshot::cli::{Cli, Commands, ConfigAction, DetectArgs};
use earshot::config::Config;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let result = match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            let options = run_options(&cli, &DetectArgs::default());
            run_listen_command(config, None, None, options).await
        }
        Some(Commands::Listen {
            ref device,
            duration,
            ref detect,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let options = run_options(&cli, detect);
            run_listen_command(config, device.clone(), duration, options).await
        }
        Some(Commands::Replay {
            ref file,
            ref detect,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let options = run_options(&cli, detect);
            run_replay_command(config, file, options).await
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
            Ok(())
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(action, cli.config.as_deref())?;
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "earshot",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `-q`/`-v` pick the level for this crate.
fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("earshot={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_options(cli: &Cli, detect: &DetectArgs) -> RunOptions {
    RunOptions {
        format: AlertFormat::from_flags(cli.json, detect.message),
        cooldown: detect.cooldown,
        quiet: cli.quiet,
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/earshot/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", toml::to_string_pretty(&config)?);
            if let Err(e) = config.validate() {
                eprintln!("{}", format!("Warning: {}", e).yellow());
            }
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                eprintln!(
                    "{} already exists; pass --force to overwrite",
                    config_path.display()
                );
                std::process::exit(1);
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let contents = toml::to_string_pretty(&Config::default())?;
            std::fs::write(&config_path, contents)
                .with_context(|| format!("writing {}", config_path.display()))?;
            println!("{} {}", "Wrote".green(), config_path.display());
        }
    }
    Ok(())
}
