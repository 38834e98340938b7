use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wormhole_bridge::Bridge;
use wormhole_bridge::config::BridgeConfig;
use wormhole_bridge::infrastructure::logging::init_tracing;
use wormhole_bridge::infrastructure::simulated::SimulatedHost;
use wormhole_bridge::models::{DownloadRequest, OsOutcome, SessionRequest};
use wormhole_bridge::services::dispatcher::{ChannelDispatcher, Dispatchers, NativeEvent};
use wormhole_bridge::services::permission::PermissionCheck;
use wormhole_bridge::services::staging::StageSource;

/// Drives the bridge against a simulated device and prints native events as JSON.
#[derive(Parser, Debug)]
#[command(name = "bridge-sim", version, about)]
struct Args {
    /// Use throwaway directories and debug logging
    #[arg(long)]
    dev: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy a local file into the staging cache
    Stage { file: PathBuf },

    /// Publish a file in the downloads area (the file is consumed)
    Finalize {
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        mime: String,
    },

    /// Run a pick-file session whose document picker returns FILE
    Pick {
        file: PathBuf,
        /// Simulate the user dismissing the picker
        #[arg(long)]
        cancel: bool,
    },

    /// Run the permission gate for PERMISSION
    Permission {
        permission: String,
        /// Treat the permission as already held
        #[arg(long)]
        granted: bool,
        /// Deny at the prompt
        #[arg(long)]
        deny: bool,
    },

    /// Run a scan-code session that reads TEXT
    Scan { text: String },

    /// Delete staged files past the retention age
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = if args.dev {
        BridgeConfig::development()
    } else {
        BridgeConfig::from_env()
    };
    init_tracing(&config.log_filter);

    let host = SimulatedHost::new().context("failed to start simulated host")?;
    let (dispatcher, mut events) = ChannelDispatcher::new();
    let bridge = Bridge::new(
        config,
        host.platform(),
        Dispatchers::from_channel(Arc::new(dispatcher)),
    )?;

    match args.command {
        Command::Stage { file } => {
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("cannot open {}", file.display()))?;
            let mut source = StageSource::new(Box::pin(reader));
            source.display_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string);
            let staged = bridge.staging().stage(source).await?;
            println!("{}", serde_json::to_string_pretty(&staged)?);
        }
        Command::Finalize { file, name, mime } => {
            let size = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("cannot stat {}", file.display()))?
                .len();
            let report = bridge
                .finalizer()
                .finalize(&DownloadRequest::new(file, name, mime, size))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Pick { file, cancel } => {
            let reference = host.add_file_content(&file);
            let handle = bridge.begin(SessionRequest::pick_file())?;
            let launch = host.next_launch().await;
            info!("Picker shown for {}", launch.request_id);
            let outcome = if cancel {
                OsOutcome::Cancelled
            } else {
                OsOutcome::Picked(reference)
            };
            host.respond(handle.request_id(), outcome);
        }
        Command::Permission {
            permission,
            granted,
            deny,
        } => {
            if granted {
                host.grant(&permission);
            }
            match bridge.ensure_permission(&permission)? {
                PermissionCheck::Granted(outcome) => {
                    println!("{}", NativeEvent::PermissionResult(outcome).to_json()?);
                }
                PermissionCheck::Requested(handle) => {
                    host.next_launch().await;
                    host.respond(
                        handle.request_id(),
                        OsOutcome::PermissionsResult(vec![(permission, !deny)]),
                    );
                }
            }
        }
        Command::Scan { text } => {
            let handle = bridge.begin(SessionRequest::scan_code())?;
            host.next_launch().await;
            host.respond(handle.request_id(), OsOutcome::Scanned(Some(text)));
        }
        Command::Purge => {
            let removed = bridge.purge_stale_staging().await?;
            println!("{}", serde_json::json!({ "purged": removed }));
        }
    }

    tokio::time::timeout(Duration::from_secs(30), bridge.wait_idle())
        .await
        .context("sessions did not finish")?;

    while let Ok(event) = events.try_recv() {
        println!("{}", event.to_json()?);
    }

    info!("🛑 Done");
    Ok(())
}
