use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use nortus::server;
use nortus_core::Config;

#[derive(Parser)]
#[command(name = "nortus")]
#[command(about = "Backend-for-frontend proxy for the Nortus console", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "nortus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Override verbose setting from config
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the default configuration as TOML
    Config,

    /// Load and validate the configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { verbose } => {
            let mut config = load_config(&cli.config)?;
            if verbose {
                config.server.verbose = true;
            }

            println!(
                "🚀 Starting Nortus proxy on {}:{} -> {}",
                config.server.host, config.server.port, config.upstream.base_url
            );
            server::start_server(config).await?;
        }
        Commands::Config => {
            print!("{}", Config::default_toml()?);
        }
        Commands::Check => {
            let config = load_config(&cli.config)?;
            println!(
                "✅ Configuration OK (upstream {}, cookie {}, {:?})",
                config.upstream.base_url, config.session.cookie_name, config.server.environment
            );
        }
    }

    Ok(())
}

/// File (or defaults), then environment overrides, then validation.
fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        println!("📝 Loading configuration from {:?}", path);
        Config::from_file(path)?
    } else {
        println!("⚠️  Config file not found at {:?}, using defaults", path);
        Config::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
