mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use onoffpc_config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(
    name = "onoffpc",
    version,
    about = "Telegram bot that wakes, sleeps and shuts down a remote PC"
)]
struct Cli {
    /// TOML config file; environment variables override its values.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Also write logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the bot (default).
    Run,
    /// Send one Wake-on-LAN packet and exit.
    Wake,
    /// Ping the PC, try the agent link once and print the status.
    Probe,
    /// Send a single command to the agent and print its reply.
    Send {
        #[arg(value_name = "COMMAND")]
        command: String,
    },
    /// Print the effective configuration with the bot token masked.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let _log_guard = init_tracing(&config.telemetry.log_level, cli.log_file.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Run);
    if !matches!(command, Commands::Config) {
        config.validate()?;
    }

    match command {
        Commands::Run => commands::run(config).await,
        Commands::Wake => commands::wake(&config),
        Commands::Probe => commands::probe(&config).await,
        Commands::Send { command } => commands::send(&config, &command).await,
        Commands::Config => commands::print_config(&config),
    }
}

/// Console logging to stderr, plus an optional non-blocking file writer.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(default_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file {} has no file name", path.display()))?;
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["onoffpc"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["onoffpc", "send", "sleep", "--config", "pc.toml", "--log-file", "logs/bot.log"])
            .unwrap();
        assert!(matches!(cli.command, Some(Commands::Send { ref command }) if command == "sleep"));
        assert_eq!(cli.config, PathBuf::from("pc.toml"));
        assert_eq!(cli.log_file, Some(PathBuf::from("logs/bot.log")));
    }
}
