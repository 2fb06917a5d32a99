use akapurge::AppConfig;
use clap::Parser;
use std::path::PathBuf;

/// Command-line flags for the gateway binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "akapurge", version, about = "Akamai purge gateway")]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "AKAPURGE_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Tracing filter directive, e.g. `info` or `akapurge=debug,info`
    #[arg(long, env = "AKAPURGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Drop file, line and thread metadata from log records
    #[arg(
        long,
        env = "AKAPURGE_DISABLE_TRACE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub disable_trace: bool,
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app: AppConfig,
    pub log_level: String,
    pub disable_trace: bool,
}

impl ServerConfig {
    /// Load `.env`, parse flags and read the YAML configuration.
    pub fn load() -> anyhow::Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err.into());
            }
        }
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let app = AppConfig::from_file(&cli.config)?;
        Ok(Self {
            app,
            log_level: cli.log_level,
            disable_trace: cli.disable_trace,
        })
    }
}

impl From<AppConfig> for ServerConfig {
    fn from(app: AppConfig) -> Self {
        Self {
            app,
            log_level: "info".to_string(),
            disable_trace: true,
        }
    }
}
