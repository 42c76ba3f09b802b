//! PicSort client - loads events through the local, version-checked cache

mod api;
mod session;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use piccache::{
    CacheEntry, CacheStats, CacheStore, EventCache, EventId, EventLoader, EventSnapshot,
    FileStorage, KvStorage, MemoryStorage,
};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API base URL
    #[arg(long, env = "PICSORT_API_URL", default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// Data directory holding the local cache (one picsort process at a time)
    #[arg(short, long, env = "PICSORT_DATA", default_value = "./data")]
    data: PathBuf,

    /// Bearer token for API requests
    #[arg(long, env = "PICSORT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the bearer token [default: <data>/token]
    #[arg(long)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an event, using the cache when the server version still matches
    Load {
        /// Event id
        event_id: u64,

        /// Event name shown in the output
        #[arg(short, long)]
        name: Option<String>,

        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the cached entry for an event without contacting the server
    Show {
        /// Event id
        event_id: u64,
    },

    /// Reclaim space held by superseded cache records
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Load {
            event_id,
            ref name,
            json,
        } => {
            let token_file = args
                .token_file
                .clone()
                .unwrap_or_else(|| args.data.join("token"));
            let session = Session::resolve(args.token.as_deref(), &token_file)?;
            let client = ApiClient::new(&args.api_url, session)?;

            let stats = Arc::new(CacheStats::new());
            let cache = EventCache::new(load_storage(&args.data)).with_stats(Arc::clone(&stats));
            let loader = EventLoader::new(cache, client.clone(), client).with_stats(stats);
            let event_id = EventId(event_id);
            let name = name
                .clone()
                .unwrap_or_else(|| format!("Event {}", event_id));

            let loaded = loader.load_event_with_outcome(event_id, &name).await?;
            info!("Event {} loaded (cache {})", event_id, loaded.outcome);

            if json {
                println!("{}", serde_json::to_string_pretty(&loaded.snapshot)?);
            } else {
                print!("{}", summary(&loaded.snapshot));
            }
        }
        Command::Show { event_id } => {
            let event_id = EventId(event_id);
            let cache = EventCache::new(open_storage(&args.data)?);
            let entry: Option<CacheEntry<EventSnapshot>> = cache.get(event_id).await;

            match entry {
                Some(entry) => print!("{}", describe_entry(&entry, Utc::now())),
                None => println!("No cached data for event {}", event_id),
            }
        }
        Command::Compact => {
            let storage = open_storage(&args.data)?;
            let store = storage.store();
            let reclaimable = store.dead_bytes();
            store.compact().context("Failed to compact cache")?;
            info!("Compacted cache, reclaimed {} bytes", reclaimable);
        }
    }

    Ok(())
}

fn open_storage(data: &Path) -> Result<FileStorage> {
    let storage = FileStorage::open(data)
        .with_context(|| format!("Failed to open cache in {}", data.display()))?;
    info!("Cache opened at {} ({} events)", data.display(), storage.store().len());
    Ok(storage)
}

/// Storage for `load`: an unusable cache only costs a fresh fetch
fn load_storage(data: &Path) -> Arc<dyn KvStorage> {
    match open_storage(data) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            warn!("{:#}, loading without the local cache", e);
            Arc::new(MemoryStorage::new())
        }
    }
}

/// Text rendering of a snapshot: images plus the people strip
fn summary(snapshot: &EventSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} (event {})", snapshot.name, snapshot.id);
    let _ = writeln!(out, "  {} images", snapshot.images.len());

    let strip = snapshot.people_strip();
    if strip.is_empty() {
        let _ = writeln!(out, "  No people yet");
    } else {
        let _ = writeln!(out, "  People:");
        for person in strip {
            let _ = writeln!(out, "    {} - {} photos", person.name, person.photo_count());
        }
    }
    out
}

fn describe_entry(entry: &CacheEntry<EventSnapshot>, now: chrono::DateTime<Utc>) -> String {
    let state = if entry.is_fresh_at(now) {
        "fresh"
    } else {
        "expired"
    };

    let mut out = summary(&entry.data);
    let _ = writeln!(out, "  Version:  {}", entry.updated_at);
    let _ = writeln!(out, "  Cached:   {}", entry.cached_at.to_rfc3339());
    let _ = writeln!(out, "  Expires:  {} ({})", entry.expires_at.to_rfc3339(), state);
    out
}
