/*!
 * DR-Logic CLI
 *
 * `drlogic serve` runs the protection loops and the control API until
 * Ctrl-C; `check-config` and `default-config` help write the TOML file.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drlogic::{api, logging, DrConfig, DrService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "drlogic")]
#[command(
    version,
    about = "Disaster-recovery control plane: protection scheduling and site recovery",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop, the cleanup loop and the HTTP API
    Serve {
        /// Override the configured bind address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig,

    /// Print an example configuration with every default filled in
    DefaultConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<DrConfig> {
    let config = match path {
        Some(path) => DrConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DrConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, verbose } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(bind) = bind {
                config.service.bind = bind;
            }
            config.service.verbose |= verbose;
            serve(config).await
        }
        Command::CheckConfig => {
            let config = load_config(cli.config.as_ref())?;
            let engine = config.engine()?;
            println!("✅ Configuration is valid");
            println!("   Policy engine:      {}", engine);
            println!(
                "   Loop intervals:     {}s protect / {}s clean-up",
                config.loops.drlogic_interval_secs, config.loops.clean_up_interval_secs
            );
            println!(
                "   Protection:         every {}s, stale after {}s",
                config.protection.max_protection_interval_secs, config.protection.max_staleness_secs
            );
            for site in &config.sites {
                println!(
                    "   Site {} -> {}: {} units ({:.0}% instances, {:.0}% volumes)",
                    site.id,
                    site.backup_site,
                    site.bandwidth,
                    site.instance_share * 100.0,
                    site.volume_share * 100.0
                );
            }
            Ok(())
        }
        Command::DefaultConfig => {
            print!("{}", DrConfig::example().to_toml()?);
            Ok(())
        }
    }
}

async fn serve(config: DrConfig) -> Result<()> {
    logging::init_logging(&config.service)?;

    let service = Arc::new(DrService::from_config(&config)?);
    service.start().await?;

    let listener = tokio::net::TcpListener::bind(&config.service.bind)
        .await
        .with_context(|| format!("binding {}", config.service.bind))?;
    info!("🌐 Control API listening on http://{}", config.service.bind);
    info!("   Health: http://{}/api/health", config.service.bind);

    axum::serve(listener, api::router(service.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("serving the control API")?;

    service.shutdown().await;
    Ok(())
}
