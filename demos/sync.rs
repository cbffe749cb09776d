//! One full mirror cycle: poll the CSAF feed, match every active mirror and
//! write updateinfo.xml for each published repository.
//!
//! Run with:
//! ```bash
//! MIRROR__DATABASE_URL=sqlite://mirror.db?mode=rwc cargo run --example sync -- ./out
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use advisory_mirror::workflow::{WorkflowQueue, WorkflowReport, WorkflowRequest, WorkflowRunner};
use advisory_mirror::{Config, MatchRequest, MirrorManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Hold the guard until the end of main.
    let _guard = advisory_mirror::logging::init_logging(&config);

    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("updateinfo"));

    println!("=== Advisory Mirror Sync ===\n");
    println!("Database: {}", config.database_url);
    println!("CSAF feed: {}", config.csaf_base_url);
    println!("Output: {}\n", out_dir.display());

    let manager = Arc::new(MirrorManager::from_config(&config).await?);
    let runner = Arc::new(WorkflowRunner::new(manager, config.workflow.clone()));

    let resumed = runner.resume_interrupted().await?;
    if resumed > 0 {
        println!("Resumed {} interrupted run(s)", resumed);
    }

    let queue = WorkflowQueue::start(Arc::clone(&runner), config.workflow.workers_per_queue);
    let start = Instant::now();

    for request in [
        WorkflowRequest::PollUpstreamAdvisories,
        WorkflowRequest::MatchMirrors(MatchRequest::default()),
        WorkflowRequest::EmitUpdateinfo {
            out_dir: out_dir.clone(),
        },
    ] {
        let name = request.kind().as_str();
        match queue.submit(request).await {
            Ok(outcome) => match outcome.report {
                WorkflowReport::Poll(poll) => println!(
                    "✓ {name}: {} fetched, {} created, {} updated, {} skipped (cursor {:?})",
                    poll.fetched, poll.created, poll.updated, poll.skipped, poll.cursor
                ),
                WorkflowReport::Match(matched) => println!(
                    "✓ {name}: {} mirrors, {} matched, {} blocked, {} overridden, {} created, {} updated, {} errors",
                    matched.mirrors,
                    matched.matched,
                    matched.blocked,
                    matched.overridden,
                    matched.created,
                    matched.updated,
                    matched.errors + matched.repository_errors
                ),
                WorkflowReport::Emit(emitted) => println!(
                    "✓ {name}: {} repositories, {} written, {} unchanged, {} errors",
                    emitted.repositories, emitted.written, emitted.unchanged, emitted.errors
                ),
                WorkflowReport::Block(blocked) => println!(
                    "✓ {name}: {} mirrors, {} matched, {} newly blocked",
                    blocked.mirrors, blocked.matched, blocked.added
                ),
            },
            Err(e) => {
                eprintln!("✗ {name} failed: {e}");
                queue.shutdown().await;
                return Err(e.into());
            }
        }
    }

    queue.shutdown().await;
    println!("\nDone in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}
