use anyhow::Context;
use clap::{Parser, Subcommand};
use shardsnap::{
    checksums_match, file_sha256, OperationOutcome, RecoveryRequest, ShardKey, SnapshotConfig,
    SnapshotService,
};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "shardsnap")]
#[command(about = "Create, serve and restore checksummed shard snapshots", long_about = None)]
#[command(version)]
struct Args {
    /// Root directory for live shard data
    #[arg(long, default_value = "storage/shards")]
    data_root: PathBuf,

    /// Root directory for snapshot archives
    #[arg(long, default_value = "storage/snapshots")]
    snapshots_root: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a snapshot of one shard
    Create {
        collection: String,
        shard: u32,
        /// Return immediately and build the snapshot in the background
        #[arg(long)]
        no_wait: bool,
    },
    /// List a shard's snapshots in creation order
    List {
        collection: String,
        shard: u32,
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Copy a snapshot archive to a local file
    Fetch {
        collection: String,
        shard: u32,
        name: String,
        output: PathBuf,
    },
    /// Delete a snapshot
    Delete {
        collection: String,
        shard: u32,
        name: String,
        /// Return immediately and delete in the background
        #[arg(long)]
        no_wait: bool,
    },
    /// Recover the shard from a snapshot name or http(s) URL
    Recover {
        collection: String,
        shard: u32,
        location: String,
        /// Expected SHA-256 of the archive bytes
        #[arg(long)]
        checksum: Option<String>,
        /// Return immediately and recover in the background
        #[arg(long)]
        no_wait: bool,
    },
    /// Recompute an archive's checksum and compare with the recorded one
    Verify {
        collection: String,
        shard: u32,
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("shardsnap={}", log_level))
        .init();

    let config = SnapshotConfig {
        data_root: args.data_root,
        snapshots_root: args.snapshots_root,
        ..SnapshotConfig::default()
    };
    let service = SnapshotService::new(config);

    match args.command {
        Command::Create {
            collection,
            shard,
            no_wait,
        } => {
            let key = register(&service, collection, shard)?;
            match service.create_snapshot(&key, !no_wait).await? {
                OperationOutcome::Completed(description) => {
                    info!("✅ created snapshot {}", description.name);
                    println!("{}", serde_json::to_string_pretty(&description)?);
                }
                OperationOutcome::Accepted => {
                    println!("accepted; poll `list` until the snapshot appears");
                    // give the background task a chance before the runtime exits
                    wait_for(&service, &key, |snapshots| !snapshots.is_empty()).await?;
                }
            }
        }
        Command::List {
            collection,
            shard,
            json,
        } => {
            let key = register(&service, collection, shard)?;
            let snapshots = service.list_snapshots(&key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else {
                for snapshot in snapshots {
                    let created = SystemTime::UNIX_EPOCH
                        + Duration::from_secs(snapshot.created_at.max(0) as u64);
                    println!(
                        "{}  {}  {} bytes  {}",
                        snapshot.name,
                        snapshot.checksum,
                        snapshot.size,
                        humantime::format_rfc3339_seconds(created)
                    );
                }
            }
        }
        Command::Fetch {
            collection,
            shard,
            name,
            output,
        } => {
            let key = register(&service, collection, shard)?;
            let mut reader = service.open_snapshot(&key, &name).await?;

            // Progress only when someone is watching
            let pb = if atty::is(atty::Stream::Stderr) {
                let pb = indicatif::ProgressBar::new(reader.description.size);
                pb.set_style(
                    indicatif::ProgressStyle::default_bar()
                        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                        .unwrap()
                        .progress_chars("█▓▒░ "),
                );
                Some(pb)
            } else {
                None
            };

            let mut out = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("create {}", output.display()))?;
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                let n = reader.file.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buffer[..n]).await?;
                if let Some(pb) = &pb {
                    pb.inc(n as u64);
                }
            }
            out.flush().await?;
            if let Some(pb) = &pb {
                pb.finish_with_message("done");
            }
            println!(
                "fetched {} ({} bytes, sha256 {})",
                reader.description.name, reader.description.size, reader.description.checksum
            );
        }
        Command::Delete {
            collection,
            shard,
            name,
            no_wait,
        } => {
            let key = register(&service, collection, shard)?;
            match service.delete_snapshot(&key, &name, !no_wait).await? {
                OperationOutcome::Completed(()) => info!("✅ deleted snapshot {}", name),
                OperationOutcome::Accepted => {
                    println!("accepted; poll `list` until the snapshot disappears");
                    let gone = name.clone();
                    wait_for(&service, &key, move |snapshots| {
                        snapshots.iter().all(|s| s.name != gone)
                    })
                    .await?;
                }
            }
        }
        Command::Recover {
            collection,
            shard,
            location,
            checksum,
            no_wait,
        } => {
            let key = register(&service, collection, shard)?;
            let request = RecoveryRequest { location, checksum };
            match service.recover_shard(&key, request, !no_wait).await? {
                OperationOutcome::Completed(()) => info!("✅ shard {} recovered", key),
                OperationOutcome::Accepted => {
                    println!("accepted; recovery continues in the background");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Command::Verify {
            collection,
            shard,
            name,
        } => {
            let key = register(&service, collection, shard)?;
            let reader = service.open_snapshot(&key, &name).await?;
            let actual = file_sha256(&reader.path).await?;
            if checksums_match(&reader.description.checksum, &actual) {
                println!("✅ {} verified ({})", name, actual);
            } else {
                eprintln!(
                    "❌ checksum mismatch for {}: recorded {}, actual {}",
                    name, reader.description.checksum, actual
                );
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn register(
    service: &SnapshotService,
    collection: String,
    shard: u32,
) -> anyhow::Result<ShardKey> {
    let key = ShardKey::new(collection, shard);
    service
        .catalog()
        .register(key.clone())
        .with_context(|| format!("open shard {}", key))?;
    Ok(key)
}

/// Polls `list` until the predicate holds, for the CLI's `--no-wait`
/// convenience: the process would otherwise exit before the background
/// task ran.
async fn wait_for<F>(
    service: &SnapshotService,
    key: &ShardKey,
    predicate: F,
) -> anyhow::Result<()>
where
    F: Fn(&[shardsnap::SnapshotDescription]) -> bool,
{
    for _ in 0..100 {
        let snapshots = service.list_snapshots(key).await?;
        if predicate(&snapshots) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}
