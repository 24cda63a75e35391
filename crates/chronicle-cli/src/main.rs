//! `chronicle` binary: operator surface over the transcript store and the
//! compaction pipeline.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use chronicle_compaction::{CompactionConfig, CompactionPipeline};
use chronicle_handoff::{drain_with_retry, HandoffQueue};
use chronicle_store::{AppendOutcome, TranscriptStore};


#[derive(Debug, Parser)]
#[command(
    name = "chronicle",
    about = "Durable chat transcript log with mechanical handoff compaction",
    version
)]
struct Cli {
    /// Product root under which Memory/Chats/<session> lives.
    #[arg(long, env = "CHRONICLE_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append one captured turn to a session log.
    Append {
        #[arg(long)]
        session: String,
        /// Role tag; anything other than `A` is treated as user-authored.
        #[arg(long, default_value = "U")]
        role: char,
        #[arg(long)]
        text: String,
    },
    /// Compact a session transcript into a handoff essence.
    Compact {
        #[arg(long)]
        session: String,
        #[arg(long, default_value = "handoff")]
        mode: String,
        /// Ask the delivery collaborator for a fresh delivery surface.
        #[arg(long)]
        new_session: bool,
    },
    /// Print the structural health report for a session.
    Status {
        #[arg(long)]
        session: String,
        #[arg(long)]
        json: bool,
    },
    /// Repair a possibly truncated session log tail.
    Repair {
        #[arg(long)]
        session: String,
    },
    /// Clear a session log, optionally preserving a timestamped backup.
    Reset {
        #[arg(long)]
        session: String,
        #[arg(long)]
        backup: bool,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    let store = TranscriptStore::new(&cli.root);
    match cli.command {
        Command::Append {
            session,
            role,
            text,
        } => match store.append(&session, role, &text) {
            AppendOutcome::Appended => {
                println!("appended");
                Ok(())
            }
            AppendOutcome::Duplicate => {
                println!("duplicate (nothing written)");
                Ok(())
            }
            AppendOutcome::Rejected => bail!("append rejected: empty session id or text"),
            AppendOutcome::Failed => bail!("append failed; see warnings"),
        },
        Command::Compact {
            session,
            mode,
            new_session,
        } => {
            let pipeline = CompactionPipeline::new(CompactionConfig::default());
            let queue = HandoffQueue::new();
            if !pipeline.run_and_enqueue(&store, &session, &mode, new_session, &queue) {
                bail!("nothing to compact for session {session}");
            }
            queue.complete();
            let delivered = drain_with_retry(
                &queue,
                |payload| {
                    println!("{}", payload.text);
                    true
                },
                Duration::from_millis(250),
                4,
            )
            .await;
            if delivered == 0 {
                bail!("handoff delivery failed for session {session}");
            }
            Ok(())
        }
        Command::Status { session, json } => {
            let report = store.health_report(&session);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("session:                {}", report.session_id);
                println!("log exists:             {}", report.log_exists);
                println!("file bytes:             {}", report.file_bytes);
                println!("records:                {}", report.record_count);
                println!("  user:                 {}", report.user_records);
                println!("  assistant:            {}", report.assistant_records);
                println!("malformed lines:        {}", report.malformed_lines);
                println!("blank lines:            {}", report.blank_lines);
                println!("repair events:          {}", report.repair_events);
                println!("duplicates suppressed:  {}", report.duplicates_suppressed);
            }
            Ok(())
        }
        Command::Repair { session } => {
            let outcome = chronicle_store::repair_truncated_tail(&store.log_path(&session))?;
            if outcome.repaired {
                println!("repaired: removed {} bytes", outcome.bytes_removed);
            } else {
                println!("no repair needed");
            }
            Ok(())
        }
        Command::Reset { session, backup } => {
            if store.reset_log(&session, backup) {
                println!("log reset");
                Ok(())
            } else {
                bail!("log reset failed for session {session}")
            }
        }
    }
}
