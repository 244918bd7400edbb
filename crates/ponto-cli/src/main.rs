use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ponto_core::types::{Encoding, Identity};
use ponto_core::Settings;
use ponto_store::{GalleryStore, HttpAttendanceStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ponto", about = "Ponto face attendance CLI")]
struct Cli {
    /// Settings file (default: $PONTO_CONFIG, else built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from captured face encodings
    Enroll {
        /// Employee ID sent to the attendance store
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// JSON file holding one encoding or a list of encodings
        #[arg(long)]
        encodings: PathBuf,
        /// Store the mean of all captures as a single reference
        #[arg(long)]
        average: bool,
    },
    /// List enrolled identities
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity
    Remove {
        /// Employee ID to remove
        id: String,
    },
    /// Back up the gallery database now
    Backup,
    /// Print the effective, validated configuration as TOML
    Config,
    /// Show gallery size and attendance store health
    Status,
}

/// Accepts `[0.1, ...]` or `[[0.1, ...], ...]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EncodingsFile {
    One(Encoding),
    Many(Vec<Encoding>),
}

fn read_encodings(path: &Path) -> Result<Vec<Encoding>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed: EncodingsFile =
        serde_json::from_str(&text).with_context(|| format!("parsing encodings in {}", path.display()))?;
    Ok(match parsed {
        EncodingsFile::One(encoding) => vec![encoding],
        EncodingsFile::Many(encodings) => encodings,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let gallery_path = settings.storage.gallery_path();
    tracing::debug!(gallery = %gallery_path.display(), backend = %settings.backend.url, "settings loaded");

    match cli.command {
        Commands::Enroll {
            id,
            name,
            encodings,
            average,
        } => {
            let captures = read_encodings(&encodings)?;
            if captures.is_empty() {
                bail!("{} holds no encodings", encodings.display());
            }
            let mut store = GalleryStore::open(&gallery_path)?;
            let identity = Identity::new(id, name);
            let stored = store.enroll(&identity, &captures, average)?;
            println!("Enrolled {identity} with {stored} reference encoding(s)");
        }
        Commands::List { json } => {
            let store = GalleryStore::open(&gallery_path)?;
            let enrolled = store.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&enrolled)?);
            } else if enrolled.is_empty() {
                println!("No identities enrolled");
            } else {
                println!("{:<12} {:<28} {:>9}  Enrolled at", "ID", "Name", "Encodings");
                for row in &enrolled {
                    println!("{:<12} {:<28} {:>9}  {}", row.id, row.name, row.encodings, row.enrolled_at);
                }
                println!("\nTotal: {} identities", enrolled.len());
            }
        }
        Commands::Remove { id } => {
            let mut store = GalleryStore::open(&gallery_path)?;
            if !store.remove(&id)? {
                bail!("identity {id} is not enrolled");
            }
            println!("Removed {id}");
        }
        Commands::Backup => {
            let store = GalleryStore::open(&gallery_path)?;
            let path = store.backup(&settings.storage.backup_dir(), settings.storage.max_backups)?;
            println!("Backup written to {}", path.display());
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
        }
        Commands::Status => {
            let gallery = GalleryStore::open(&gallery_path)?.load_gallery()?;
            println!("gallery: {}", gallery_path.display());
            println!(
                "  {} identities, {} reference encodings",
                gallery.identity_count(),
                gallery.len()
            );

            let store = HttpAttendanceStore::new(&settings.backend.url, settings.backend.timeout())?;
            match store.health().await {
                Ok(body) => println!("store: {} ok {body}", store.base_url()),
                Err(err) => println!("store: {} unavailable ({err})", store.base_url()),
            }
        }
    }

    Ok(())
}
