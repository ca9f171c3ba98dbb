use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blobstream::storage::PathKind;
use blobstream::{classify_path, config, ops, AppConfig, OpenOptions, Registry};

/// Read, copy and inspect objects on any mounted storage
#[derive(Parser, Debug)]
#[command(name = "blobstream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file, defaults to $BLOBSTREAM_CONFIG or ./blobstream.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write an object to stdout
    Cat { path: String },
    /// Copy an object, server side when the provider allows it
    Cp { src: String, dst: String },
    /// List the first level under a locator or prefix
    Ls { path: String },
    /// Print object metadata as JSON
    Stat { path: String },
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Local paths are served by the `file` driver
fn to_url(path: &str) -> anyhow::Result<String> {
    match classify_path(path) {
        PathKind::Remote { .. } => Ok(path.to_string()),
        PathKind::Local => {
            let path = Path::new(path);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            };
            Ok(format!("file://{}", absolute.to_string_lossy().replace('\\', "/")))
        }
    }
}

async fn cat(registry: &Registry, path: &str) -> anyhow::Result<()> {
    let mut reader = registry.open(path, OpenOptions::read()).await?;
    let mut stdout = tokio::io::stdout();
    loop {
        let data = reader.read(Some(registry.engine().buffer_size)).await?;
        if data.is_empty() {
            break;
        }
        stdout.write_all(&data).await?;
    }
    stdout.flush().await?;
    reader.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobstream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::config_path);

    if let Command::Init { force } = cli.command {
        if config_path.exists() && !force {
            bail!("{:?} already exists, pass --force to overwrite it", config_path);
        }
        config::save_config(&AppConfig::default(), &config_path)
            .context("Failed to write configuration")?;
        tracing::info!("Wrote default configuration to {:?}", config_path);
        return Ok(());
    }

    // Load configuration / 加载配置
    let app_config = config::load_config(&config_path).context("Failed to load configuration")?;
    let registry = blobstream::registry_from_config(&app_config)?;

    match cli.command {
        Command::Cat { path } => cat(&registry, &to_url(&path)?).await?,
        Command::Cp { src, dst } => ops::copy(&registry, &to_url(&src)?, &to_url(&dst)?).await?,
        Command::Ls { path } => {
            for name in ops::listdir(&registry, &to_url(&path)?).await? {
                println!("{}", name);
            }
        }
        Command::Stat { path } => {
            let meta = ops::stat(&registry, &to_url(&path)?).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Init { .. } => {}
    }
    Ok(())
}
