//! rotord - certificate rotation daemon
//!
//! Keeps a signing authority, its trust bundle and one leaf certificate
//! current in a state directory, rotating them as they approach expiry.

mod config;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rotor_core::{
    ArtifactStore, BundleRecord, CertKeyArtifact, CertKeyRecord, ConditionStatusReporter,
    FileStore, RotationCondition, RotationController, SigningAuthority, SyncMode, SystemClock,
    TrustBundle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "rotord")]
#[command(about = "Certificate rotation daemon")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "ROTORD_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rotation controller
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/rotord/config.json")]
        config: PathBuf,

        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/rotord/config.json")]
        output: PathBuf,

        /// Controller name
        #[arg(long, default_value = "rotord")]
        name: String,

        /// State directory
        #[arg(long, default_value = "/var/lib/rotord")]
        state_dir: PathBuf,
    },

    /// Show the stored artifacts and status
    Inspect {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/rotord/config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive("rotord=info".parse()?)
        .add_directive("rotor_core=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.command {
        Commands::Run { config, once } => {
            run_controller(config, once).await?;
        }

        Commands::InitConfig {
            output,
            name,
            state_dir,
        } => {
            init_config(output, &name, state_dir)?;
        }

        Commands::Inspect { config } => {
            inspect(config).await?;
        }
    }

    Ok(())
}

struct Stores {
    cert_keys: Arc<FileStore<CertKeyRecord>>,
    bundles: Arc<FileStore<BundleRecord>>,
    conditions: Arc<FileStore<RotationCondition>>,
}

impl Stores {
    fn open(config: &DaemonConfig) -> Self {
        Self {
            cert_keys: Arc::new(FileStore::new(&config.state_dir)),
            bundles: Arc::new(FileStore::new(&config.state_dir)),
            conditions: Arc::new(FileStore::new(&config.state_dir)),
        }
    }
}

fn build_controller(config: &DaemonConfig) -> anyhow::Result<RotationController> {
    let stores = Stores::open(config);
    let clock = Arc::new(SystemClock);
    let reporter = ConditionStatusReporter::new(
        stores.conditions,
        config.keys.status.clone(),
        &config.rotation.name,
        clock.clone(),
    );

    let controller = RotationController::builder(config.rotation.clone())
        .authority_store(stores.cert_keys.clone(), config.keys.authority.clone())
        .bundle_store(stores.bundles, config.keys.bundle.clone())
        .leaf_store(stores.cert_keys, config.keys.leaf.clone())
        .content(config.content.provider())
        .reporter(Arc::new(reporter))
        .clock(clock)
        .build()?;
    Ok(controller)
}

async fn run_controller(config_path: PathBuf, once: bool) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting rotord");

    let config = DaemonConfig::load(&config_path)?;
    info!(
        name = %config.rotation.name,
        state_dir = %config.state_dir.display(),
        "loaded config"
    );

    let controller = build_controller(&config)?;
    let cancel = CancellationToken::new();

    if once {
        controller
            .sync(SyncMode::RunOnce, &cancel)
            .await
            .context("rotation failed")?;
        info!(name = %config.rotation.name, "artifacts are current");
        return Ok(());
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    controller.run(cancel).await;
    Ok(())
}

fn init_config(output: PathBuf, name: &str, state_dir: PathBuf) -> anyhow::Result<()> {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());

    let mut hostnames = vec![hostname, "localhost".to_string(), "127.0.0.1".to_string()];
    hostnames.dedup();

    let config = DaemonConfig::sample(name, hostnames, state_dir);
    config.save(&output)?;

    println!("Config written to {}", output.display());
    Ok(())
}

async fn inspect(config_path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::load(&config_path)?;
    let stores = Stores::open(&config);
    let now = Utc::now();

    println!("State directory: {}", config.state_dir.display());
    println!();

    let key = &config.keys.authority;
    match stores.cert_keys.read(key).await? {
        None => println!("Authority: (absent)"),
        Some(record) => match SigningAuthority::decode(key, &record) {
            Ok(authority) => {
                let cert = authority.certificate();
                println!("Authority: {}", authority.subject());
                println!("  serial:     {}", cert.serial());
                println!("  not before: {}", cert.not_before());
                println!("  not after:  {}", cert.not_after());
            }
            Err(e) => println!("Authority: unreadable ({e})"),
        },
    }

    match stores.bundles.read(&config.keys.bundle).await? {
        None => println!("Trust bundle: (absent)"),
        Some(record) => {
            let (bundle, dropped) = TrustBundle::parse_lenient(&record.ca_bundle_pem);
            println!("Trust bundle: {} certificate(s)", bundle.len());
            for cert in bundle.certificates() {
                let marker = if rotor_pki::is_expired_at(cert, now) {
                    " (expired)"
                } else {
                    ""
                };
                println!("  {} until {}{marker}", cert.identity(), cert.not_after());
            }
            for entry in dropped {
                println!("  unreadable {entry}");
            }
        }
    }

    let key = &config.keys.leaf;
    match stores.cert_keys.read(key).await? {
        None => println!("Leaf: (absent)"),
        Some(record) => match CertKeyArtifact::decode(key, &record) {
            Ok(leaf) => {
                let cert = leaf.certificate();
                println!("Leaf: {}", cert.subject());
                println!("  issuer:     {}", cert.issuer());
                println!("  serial:     {}", cert.serial());
                println!("  not after:  {}", cert.not_after());
                for (name, value) in leaf.annotations() {
                    println!("  {name}: {value}");
                }
            }
            Err(e) => println!("Leaf: unreadable ({e})"),
        },
    }

    println!();
    match stores.conditions.read(&config.keys.status).await? {
        None => println!("Status: (no tick reported yet)"),
        Some(condition) if condition.degraded => println!(
            "Status: {} degraded since {}: {}",
            condition.condition_type,
            condition.last_transition,
            condition.message.unwrap_or_default()
        ),
        Some(condition) => println!(
            "Status: {} healthy since {}",
            condition.condition_type, condition.last_transition
        ),
    }

    Ok(())
}
