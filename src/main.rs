use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use nature_album::blob_store::FsBlobStore;
use nature_album::config::Config;
use nature_album::db_pool::create_db_pool;
use nature_album::local_cache::{LocalCache, SqliteCache};
use nature_album::memory_remote::MemoryRemoteStore;
use nature_album::models::{Label, Location, Uid};
use nature_album::social_graph::SocialGraph;
use nature_album::sync_coordinator::{PhotoDraft, SyncCoordinator};
use nature_album::upload_pipeline::MediaUploadPipeline;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Capture photos into labelled albums and manage friends across user partitions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Upload a photo and save it under a label
    Capture {
        uid: String,
        label: String,
        file: PathBuf,
        /// Make this photo the label's album cover
        #[arg(long)]
        representative: bool,
        /// Capture location as <lat>,<lon>
        #[arg(long, value_parser = parse_location, default_value = "0,0", allow_hyphen_values = true)]
        at: Location,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Re-send every local label and photo to the remote store
    Push { uid: String },
    /// Restore labels, photos and albums from the remote store
    Pull { uid: String },
    /// Send, accept or reject a friend request
    Friend {
        #[arg(value_enum)]
        action: FriendAction,
        uid: String,
        target: String,
    },
    /// List friends and pending requests
    Friends { uid: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FriendAction {
    Send,
    Accept,
    Reject,
}

fn parse_location(value: &str) -> Result<Location, String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| "location must look like <lat>,<lon>".to_string())?;
    Ok(Location {
        latitude: lat.trim().parse().map_err(|e| format!("invalid latitude: {}", e))?,
        longitude: lon.trim().parse().map_err(|e| format!("invalid longitude: {}", e))?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let config = Config::from_env().map_err(|e| anyhow!(e.to_string()))?;
    info!("Database: {}", config.db_path);
    info!("Blob store: {}", config.storage.blob_path);
    info!("Remote snapshot: {}", config.storage.remote_snapshot_path);

    let pool = create_db_pool(&config.db_path, config.max_connections)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    let local = Arc::new(SqliteCache::new(pool));
    let remote = Arc::new(
        MemoryRemoteStore::load(&config.storage.remote_snapshot_path)
            .await
            .context("Failed to load remote snapshot")?,
    );
    let blobs = FsBlobStore::new(&config.storage.blob_path).context("Failed to open blob store")?;
    let pipeline = MediaUploadPipeline::new(Arc::new(blobs));
    let coordinator = SyncCoordinator::new(local.clone(), remote.clone(), pipeline);
    let graph = SocialGraph::with_max_attempts(remote.clone(), config.transaction_attempts);

    let outcome = run(cli.command, &local, &coordinator, &graph).await;

    // Persist whatever committed, even when the command failed midway.
    remote
        .save(&config.storage.remote_snapshot_path)
        .await
        .context("Failed to save remote snapshot")?;

    outcome
}

async fn run(
    command: Command,
    local: &SqliteCache,
    coordinator: &SyncCoordinator,
    graph: &SocialGraph,
) -> Result<()> {
    match command {
        Command::Capture {
            uid,
            label,
            file,
            representative,
            at,
            description,
        } => {
            let uid = Uid::parse(uid)?;
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("{} has no file name", file.display()))?
                .to_string();
            let binary = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let label = match local.get_label_by_name(&label).await? {
                Some(existing) => existing,
                None => Label::unsaved(label),
            };

            let saved = coordinator
                .capture(
                    &uid,
                    &label,
                    binary,
                    PhotoDraft {
                        file_name,
                        location: at,
                        description,
                        is_representative: representative,
                    },
                )
                .await?;
            println!(
                "saved photo {} under label {} ({:?})",
                saved.photo_id, saved.label_id, saved.placement
            );
        }
        Command::Push { uid } => {
            let report = coordinator.push_local(&Uid::parse(uid)?).await?;
            println!("pushed {} labels, {} photos", report.labels, report.photos);
        }
        Command::Pull { uid } => {
            let report = coordinator.pull_remote(&Uid::parse(uid)?).await?;
            println!(
                "pulled {} labels, {} photos, {} new albums",
                report.labels, report.photos, report.albums
            );
        }
        Command::Friend {
            action,
            uid,
            target,
        } => {
            let (uid, target) = (Uid::parse(uid)?, Uid::parse(target)?);
            match action {
                FriendAction::Send => graph.send_friend_request(&uid, &target).await?,
                FriendAction::Accept => graph.accept_friend_request(&uid, &target).await?,
                FriendAction::Reject => graph.reject_friend_request(&uid, &target).await?,
            }
            println!("{:?} -> {:?}", action, graph.relationship(&uid, &target).await?);
        }
        Command::Friends { uid } => {
            let uid = Uid::parse(uid)?;
            for friend in graph.friends(&uid).await? {
                println!("friend  {}  since {}", friend.target, friend.added_at.to_rfc3339());
            }
            for request in graph.friend_requests(&uid).await? {
                println!(
                    "request {}  {:?} at {}",
                    request.target,
                    request.status,
                    request.requested_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_capture_with_flags() {
        let cli = Cli::try_parse_from([
            "nature-album",
            "capture",
            "u1",
            "Heron",
            "/tmp/p1.jpg",
            "--representative",
            "--at",
            "37.5, 126.9",
            "--description",
            "river bank",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Command::Capture {
                uid: "u1".to_string(),
                label: "Heron".to_string(),
                file: PathBuf::from("/tmp/p1.jpg"),
                representative: true,
                at: Location {
                    latitude: 37.5,
                    longitude: 126.9,
                },
                description: "river bank".to_string(),
            }
        );
    }

    #[test]
    fn test_capture_defaults() {
        let cli = Cli::try_parse_from(["nature-album", "capture", "u1", "Heron", "p1.jpg"]).unwrap();
        match cli.command {
            Command::Capture {
                representative,
                at,
                description,
                ..
            } => {
                assert!(!representative);
                assert_eq!(
                    at,
                    Location {
                        latitude: 0.0,
                        longitude: 0.0,
                    }
                );
                assert!(description.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_friend_actions() {
        let cli = Cli::try_parse_from(["nature-album", "friend", "reject", "u1", "u2"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Friend {
                action: FriendAction::Reject,
                uid: "u1".to_string(),
                target: "u2".to_string(),
            }
        );
        assert!(Cli::try_parse_from(["nature-album", "friend", "poke", "u1", "u2"]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_input() {
        assert!(Cli::try_parse_from(["nature-album"]).is_err());
        assert!(Cli::try_parse_from(["nature-album", "push"]).is_err());
        assert!(
            Cli::try_parse_from(["nature-album", "capture", "u1", "Heron", "p.jpg", "--at"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["nature-album", "capture", "u1", "Heron", "p.jpg", "--at", "1"])
                .is_err()
        );
    }

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("-33.9,18.4").unwrap(),
            Location {
                latitude: -33.9,
                longitude: 18.4,
            }
        );
        assert!(parse_location("north,18.4").is_err());

        let cli = Cli::try_parse_from([
            "nature-album",
            "capture",
            "u1",
            "Penguin",
            "p.jpg",
            "--at",
            "-33.9,18.4",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Capture { at, .. } if at.latitude == -33.9
        ));
    }
}
