use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqlagg::config::{self, Config, LoggingConfig};
use sqlagg::{SqlClient, SqlCompiler};
use sqlagg_es::EsBackend;

mod commands;

use commands::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sqlagg")]
#[command(about = "Run SQL aggregations against Elasticsearch")]
#[command(version)]
struct Cli {
    /// Configuration file path (default: ~/.sqlagg/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the search request a query compiles to
    Explain {
        /// SQL statement, or - to read it from stdin
        sql: String,

        /// Pretty-print the request
        #[arg(short, long)]
        pretty: bool,
    },

    /// Execute a query and print the result table
    Query {
        /// SQL statement, or - to read it from stdin
        sql: String,

        /// Cluster URL, overrides the config file
        #[arg(long, env = "SQLAGG_URL")]
        url: Option<String>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    ShowConfig,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| logging.level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries query results
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let mut config = Config::load_or_default(&config_path)?;
    config.apply_env();

    init_tracing(&config.logging);
    tracing::debug!("Config file: {}", config_path.display());

    let compiler = SqlCompiler::new(config.compiler_options());

    match cli.command {
        Commands::Explain { sql, pretty } => {
            let sql = commands::read_sql(&sql)?;
            commands::run_explain(&compiler, &sql, pretty)?;
        }
        Commands::Query { sql, url, format } => {
            let sql = commands::read_sql(&sql)?;
            if let Some(url) = url {
                config.backend.url = url;
            }
            tracing::info!("Querying {}", config.backend.url);

            let backend = EsBackend::from_config(&config.backend)?;
            let client = SqlClient::new(backend)
                .with_compiler(compiler)
                .with_retries(config.backend.retries);
            commands::run_query(&client, &sql, format).await?;
        }
        Commands::ShowConfig => {
            print!("{}", toml_string(&config)?);
        }
        Commands::InitConfig { force } => {
            let path = config::expand_tilde(&config_path)?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config {} already exists, use --force to overwrite",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn toml_string(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.backend.password.is_some() {
        shown.backend.password = Some("********".to_string());
    }
    Ok(shown.to_toml()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "sqlagg",
            "query",
            "SELECT COUNT(*) FROM bank",
            "--url",
            "http://es:9200",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Query { sql, url, format } => {
                assert_eq!(sql, "SELECT COUNT(*) FROM bank");
                assert_eq!(url.as_deref(), Some("http://es:9200"));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["sqlagg", "explain", "-p", "SELECT * FROM bank", "-c", "/tmp/x.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::Explain { pretty: true, .. }));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let result = Cli::try_parse_from(["sqlagg", "query", "SELECT 1", "--format", "xml"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_show_config_masks_password() {
        let mut config = Config::default();
        config.backend.password = Some("secret".to_string());
        let text = toml_string(&config).unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains("********"));
    }
}
