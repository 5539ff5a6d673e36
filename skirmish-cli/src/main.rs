use clap::{Parser, Subcommand};
use skirmish::{
    ActionPriority, FileStore, OfflineAction, OfflineActionQueue, QueueStats, RecoveryCoordinator,
    SyncConfig,
};
use skirmish_remote::{HttpInteractionClient, RemoteConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "skirmish", about = "Inspect and replay the offline interaction queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "SKIRMISH_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,
    /// Interaction API base url, overrides remote.json
    #[arg(long, env = "SKIRMISH_API_URL", global = true)]
    endpoint: Option<String>,
    #[arg(long, env = "SKIRMISH_API_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Offline action queue maintenance
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Count queued actions per priority
    Stats,
    /// Show queued actions in drain order
    List {
        #[arg(long)]
        priority: Option<ActionPriority>,
    },
    /// Discard every queued action
    Clear,
    /// Replay queued actions against the interaction API
    Drain,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn open_queue(data_dir: &std::path::Path) -> CliResult<Arc<OfflineActionQueue>> {
    let storage = FileStore::open(data_dir)?;
    Ok(Arc::new(OfflineActionQueue::load(Arc::new(storage))?))
}

fn print_stats(stats: &QueueStats, json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!("total:    {}", stats.total);
    println!("critical: {}", stats.critical);
    println!("high:     {}", stats.high);
    println!("medium:   {}", stats.medium);
    println!("low:      {}", stats.low);
    println!("retrying: {}", stats.retrying);
    if let Some(oldest) = stats.oldest {
        println!("oldest:   {}", oldest.to_rfc3339());
    }
    Ok(())
}

fn print_actions(actions: &[OfflineAction], json: bool) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(actions)?);
        return Ok(());
    }
    if actions.is_empty() {
        println!("offline queue is empty");
        return Ok(());
    }
    for action in actions {
        println!(
            "{}  {:<8}  {}  {}  retries={}  {}",
            action.id,
            action.priority.to_string(),
            action.kind,
            action.interaction_id,
            action.retry_count,
            action.timestamp.to_rfc3339()
        );
    }
    Ok(())
}

async fn drain(cli: &Cli) -> CliResult<()> {
    let mut remote = RemoteConfig::load_or_default(&cli.data_dir);
    if let Some(endpoint) = &cli.endpoint {
        remote.api_url = endpoint.clone();
    }
    if let Some(token) = &cli.token {
        remote.api_token = Some(token.clone());
    }

    let mut config = SyncConfig::from_env();
    config.data_dir = cli.data_dir.clone();
    config.validate()?;

    let queue = open_queue(&config.data_dir)?;
    let client = Arc::new(HttpInteractionClient::new(&remote));
    tracing::info!(
        "[QUEUE] draining {} actions to {}",
        queue.len(),
        client.base_url()
    );
    let coordinator = RecoveryCoordinator::new(config, queue, client, true);
    let report = coordinator.process_offline_queue().await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "replayed {}, failed {}, dropped {}, remaining {}",
            report.replayed, report.failed, report.dropped, report.remaining
        );
    }

    if !report.is_clean() {
        return Err(format!("{} offline actions could not be replayed", report.failed).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &cli.command {
        Command::Queue(QueueCommand::Stats) => {
            let queue = open_queue(&cli.data_dir)?;
            print_stats(&queue.stats(), cli.json)
        }
        Command::Queue(QueueCommand::List { priority }) => {
            let queue = open_queue(&cli.data_dir)?;
            let actions = match priority {
                Some(p) => queue.actions_by_priority(*p),
                None => queue.drain_order(),
            };
            print_actions(&actions, cli.json)
        }
        Command::Queue(QueueCommand::Clear) => {
            let queue = open_queue(&cli.data_dir)?;
            let removed = queue.len();
            queue.clear()?;
            tracing::info!("[QUEUE] cleared {} actions", removed);
            println!("cleared {} offline actions", removed);
            Ok(())
        }
        Command::Queue(QueueCommand::Drain) => drain(&cli).await,
    }
}
