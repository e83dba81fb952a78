//! # roomdesk
//!
//! Command-line client: signs in, watches rooms and logs every merged
//! snapshot change until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use roomdesk::auth::Credential;
use roomdesk::auth::expiry::parse_expiry_value;
use roomdesk::sync::{EntityUpdate, PollScope};
use roomdesk::{SyncCore, login_error_message};
use roomdesk::settings::loader::{load_settings_from_path, settings_path};
use roomdesk_core::EntityId;
use roomdesk_core::logging::init_subscriber;
use tracing::{info, warn};

/// Realtime session and sync client.
#[derive(Parser, Debug)]
#[command(name = "roomdesk", about = "Realtime session and sync client")]
struct Cli {
    /// Settings file (defaults to `~/.roomdesk/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and log merged snapshots for the given rooms until Ctrl-C.
    Watch {
        /// Bearer token.
        #[arg(long)]
        token: String,

        /// Token expiry: epoch seconds, epoch milliseconds, or RFC 3339.
        /// Read from the expiry page when omitted.
        #[arg(long)]
        expires_at: Option<String>,

        /// Room ids to watch; every listed room when empty.
        #[arg(long = "room")]
        rooms: Vec<String>,
    },
    /// Print the effective settings as JSON.
    Settings,
}

fn credential(token: String, expires_at: Option<&str>) -> Result<Credential> {
    match expires_at {
        Some(raw) => {
            let Some(at) = parse_expiry_value(raw) else {
                bail!("unrecognized expiry: {raw}");
            };
            Ok(Credential::new(token, at))
        }
        None => Ok(Credential::without_expiry(token)),
    }
}

/// The requested rooms, or every room in a listing fetched now.
///
/// Login returns once the link is up, before any snapshot has landed, so the
/// listing is polled here rather than read from the reconciler as-is.
async fn rooms_to_watch(core: &SyncCore, requested: Vec<String>) -> Result<Vec<EntityId>> {
    if !requested.is_empty() {
        return Ok(requested.into_iter().map(EntityId::from).collect());
    }
    core.reconciler()
        .poll(PollScope::All)
        .await
        .context("Failed to list rooms")?;
    Ok(core.reconciler().entity_ids())
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(|| "-".to_string(), |dt| dt.to_rfc3339())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let (token, expires_at, rooms) = match cli.command {
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            return Ok(());
        }
        Command::Watch {
            token,
            expires_at,
            rooms,
        } => (token, expires_at, rooms),
    };

    init_subscriber(&settings.logging.level);
    let credential = credential(token, expires_at.as_deref())?;

    let core = SyncCore::builder(settings).build();
    if let Err(err) = core.login(credential).await {
        bail!(login_error_message(&err));
    }
    info!(
        expires_at = %format_ms(core.tokens().expires_at()),
        next_renewal_at = %format_ms(core.tokens().next_renewal_at()),
        "signed in"
    );

    let rooms = match rooms_to_watch(&core, rooms).await {
        Ok(rooms) => rooms,
        Err(err) => {
            core.logout().await;
            return Err(err);
        }
    };
    let _subscriptions: Vec<_> = rooms
        .iter()
        .map(|room| {
            core.reconciler().subscribe(room, |update| match update {
                EntityUpdate::Changed(snapshot) => match serde_json::to_string(snapshot) {
                    Ok(json) => info!(entity_id = %snapshot.id, snapshot = %json, "room updated"),
                    Err(err) => warn!(entity_id = %snapshot.id, error = %err, "unprintable snapshot"),
                },
                EntityUpdate::PollFailed { error, .. } => {
                    warn!(error = %error, "poll failed; showing last known data");
                }
            })
        })
        .collect();
    info!(rooms = rooms.len(), "watching");

    let mut surface = core.watch_surface();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                info!("interrupted");
                break;
            }
            changed = surface.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *surface.borrow_and_update();
                info!(surface = %state, "surface changed");
                if state.requires_login() {
                    warn!("session ended; sign in again to continue");
                    break;
                }
            }
        }
    }

    core.logout().await;
    Ok(())
}
