//! Azurite-fs: command-line access to a filesystem-backed storage account.

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use azurite_fs::{
    Args, BlobSasPermissions, Command, Config, CopyStatus, SharedAccessPolicy, StorageAccount,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let command = args.command.clone();
    let account = StorageAccount::new(Config::from(args));
    run(&account, command).await
}

async fn run(account: &StorageAccount, command: Command) -> CliResult<()> {
    match command {
        Command::Put {
            container,
            blob,
            file,
            content_type,
        } => {
            let mut blob = account.blob(&container, &blob)?;
            let bytes = blob.upload_from_file(&file).await?;
            if content_type.is_some() {
                blob.properties_mut().content_type = content_type;
                blob.set_properties().await?;
            }
            info!("uploaded {} bytes to {}", bytes, blob.uri());
        }
        Command::Get {
            container,
            blob,
            out,
        } => {
            let mut blob = account.blob(&container, &blob)?;
            match out {
                Some(path) => {
                    let bytes = blob.download_to_file(&path).await?;
                    info!("downloaded {} bytes to {}", bytes, path.display());
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    blob.download(&mut stdout).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Stat { container, blob } => {
            let mut blob = account.blob(&container, &blob)?;
            blob.fetch_attributes().await?;
            let report = serde_json::json!({
                "uri": blob.uri(),
                "properties": blob.properties(),
                "metadata": blob.metadata(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::SetMeta {
            container,
            blob,
            pairs,
        } => {
            let mut blob = account.blob(&container, &blob)?;
            for pair in pairs {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
                blob.metadata_mut().insert(key.to_string(), value.to_string());
            }
            blob.set_metadata().await?;
        }
        Command::Copy {
            source,
            container,
            blob,
        } => {
            let mut blob = account.blob(&container, &blob)?;
            let copy_id = blob.start_copy_from(source.as_str()).await?;
            let state = blob.copy_state().ok_or("copy recorded no state")?;
            println!("{} {} {}", copy_id, state.status.as_str(), state.progress());
            if state.status == CopyStatus::Failed {
                return Err(state
                    .status_description
                    .clone()
                    .unwrap_or_else(|| "copy failed".to_string())
                    .into());
            }
        }
        Command::Ls { container, prefix } => {
            let container = account.container(&container)?;
            for name in container.list_blobs(prefix.as_deref()).await? {
                println!("{}", name);
            }
        }
        Command::Rm { container, blob } => {
            account.blob(&container, &blob)?.delete().await?;
        }
        Command::Enqueue { queue, body } => {
            let queue = account.queue(&queue)?;
            queue.create_if_not_exists().await?;
            println!("{}", queue.enqueue(body).await?);
        }
        Command::Dequeue { queue, delete } => {
            let queue = account.queue(&queue)?;
            match queue.dequeue().await? {
                Some(message) => {
                    println!("{}\t{}", message.id, String::from_utf8_lossy(&message.body));
                    if delete {
                        let receipt = message.pop_receipt.unwrap_or_default();
                        queue.delete_message(&message.id, &receipt).await?;
                    }
                }
                None => info!("queue {} is empty", queue.name()),
            }
        }
        Command::Sas {
            container,
            blob,
            perms,
            hours,
        } => {
            let blob = account.blob(&container, &blob)?;
            let permissions = BlobSasPermissions::parse(&perms)
                .ok_or_else(|| format!("unknown permission letters in '{}'", perms))?;
            let policy = SharedAccessPolicy::valid_for(chrono::Duration::hours(hours));
            println!(
                "{}?{}",
                blob.uri(),
                blob.get_shared_access_signature(permissions, &policy)
            );
        }
    }
    Ok(())
}
