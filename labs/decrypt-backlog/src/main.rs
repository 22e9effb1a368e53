use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vaulter_backup::{
    store::{EventStore, RawEvent},
    BackupDecryptor, HttpBackupClient, SqliteEventStore,
};
use zeroize::Zeroizing;

mod config;
mod export;

use config::VaulterConfig;

/// Decrypt stored Matrix room events with the room keys of a server-side key
/// backup.
#[derive(Parser, Debug)]
struct Cli {
    /// The JSON config file.
    #[clap(short, long, default_value = "vaulter.json")]
    config: PathBuf,

    /// Enable verbose logging output.
    #[clap(short, long, action)]
    verbose: bool,

    /// The sub-command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add the events of a JSON file, an array of room events, to the store.
    Import { events: PathBuf },
    /// Decrypt the undecrypted events of the store.
    Run {
        /// The recovery key of the backup, takes precedence over the config
        /// file.
        #[clap(long, env = "VAULTER_RECOVERY_KEY", hide_env_values = true)]
        recovery_key: Option<String>,

        /// Only decrypt the events of this room.
        #[clap(long)]
        room: Option<String>,

        /// Print the report as JSON.
        #[clap(long, action)]
        json: bool,
    },
    /// Show how many events of each room have been decrypted.
    Status {
        /// Print the status as JSON.
        #[clap(long, action)]
        json: bool,
    },
    /// Write the decrypted history of every room as Markdown, with an index
    /// file linking the rooms.
    Export {
        /// The directory the Markdown files are written to.
        #[clap(short, long, default_value = "export")]
        output: PathBuf,
    },
}

async fn import(store: &SqliteEventStore, path: PathBuf) -> Result<()> {
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Couldn't read {}", path.display()))?;
    let events: Vec<RawEvent> = serde_json::from_str(&contents)?;

    let mut inserted = 0;
    for event in &events {
        if store.insert_raw_event(event).await? {
            inserted += 1;
        }
    }

    println!("Imported {inserted} new events out of {}", events.len());

    Ok(())
}

async fn run(
    config: &VaulterConfig,
    store: Arc<SqliteEventStore>,
    recovery_key: &str,
    room: Option<&str>,
    json: bool,
) -> Result<()> {
    let client = HttpBackupClient::new(
        config.homeserver.clone(),
        config.access_token.as_str(),
        config.request_config(),
    )?;
    let decryptor = BackupDecryptor::new(Arc::new(client), store, config.decryptor_config());

    let result = match room {
        Some(room_id) => decryptor.run_for_room(recovery_key, room_id).await,
        None => decryptor.run_from_store(recovery_key).await,
    };

    decryptor.erase_secrets();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");

        for failed in &report.failed {
            println!("  {} in {}: {}", failed.event_id, failed.room_id, failed.kind);
        }
    }

    Ok(())
}

async fn export_history(store: &SqliteEventStore, output: PathBuf) -> Result<()> {
    let events = store.decrypted_events().await?;
    let written = export::write_export(&output, &events).await?;

    println!(
        "Exported {} events of {} rooms to {}",
        events.len(),
        written.len().saturating_sub(1),
        output.display()
    );

    Ok(())
}

async fn status(store: &SqliteEventStore, json: bool) -> Result<()> {
    let status = store.decryption_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for room in &status.rooms {
        println!(
            "{}: {}/{} decrypted, {} remaining",
            room.room_id,
            room.decrypted,
            room.encrypted,
            room.remaining()
        );
    }

    println!("Total: {}/{} decrypted", status.total_decrypted(), status.total_encrypted());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,vaulter_backup=debug,vaulter_crypto=debug".into()),
            )
            .init();
    }

    let mut config = VaulterConfig::load(&cli.config)?;
    info!(?config, "Loaded the config");

    let store = Arc::new(SqliteEventStore::open(&config.database_path).await?);

    match cli.command {
        Commands::Import { events } => import(&store, events).await,
        Commands::Run { recovery_key, room, json } => {
            let recovery_key: Zeroizing<String> = config.take_recovery_key(recovery_key)?;
            run(&config, store, &recovery_key, room.as_deref(), json).await
        }
        Commands::Status { json } => status(&store, json).await,
        Commands::Export { output } => export_history(&store, output).await,
    }
}
