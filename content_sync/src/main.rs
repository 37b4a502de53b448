use anyhow::Result;
use clap::{Parser, Subcommand};
use content_sync::config::SyncConfig;
use content_sync::node::SyncNode;
use content_sync::telemetry;

const STATUS_LOG_LINES: usize = 5;

#[derive(Parser)]
#[command(author, version, about = "Content log sync engine")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every configured group until Ctrl-C
    Run,
    /// Print each group's sync cursor and recent log
    Status,
    /// Fetch and merge one page for a group
    Fetch {
        group: String,
        /// Override the configured page size
        #[arg(long)]
        page_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();

    let mut config = SyncConfig::from_env()?;
    if let Some(Command::Fetch {
        page_size: Some(page_size),
        ..
    }) = &args.command
    {
        config.scheduler.page_size = *page_size;
    }
    let mut node = SyncNode::start(config).await?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            if node.config().groups.initial_groups.is_empty() {
                node.discover_groups().await?;
            }
            node.start_sync()?;
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            node.shutdown().await;
        }
        Command::Status => {
            let cursors = node.cursors()?;
            if cursors.is_empty() {
                println!("No groups tracked yet.");
            }
            for cursor in cursors {
                println!(
                    "{}  latest={}  updated={}  unread={}",
                    cursor.group_id,
                    cursor.latest_trx_id.as_deref().unwrap_or("-"),
                    cursor.last_updated.as_deref().unwrap_or("never"),
                    cursor.unread_count,
                );
                for entry in cursor.log_tail.iter().take(STATUS_LOG_LINES) {
                    println!("    {entry}");
                }
            }
        }
        Command::Fetch { group, .. } => {
            let report = node.fetch_once(&group).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
