//! Cell dispatch simulation
//!
//! Wires a coordinator to simulated cells, feeds it a batch of activities and
//! runs until every activity completed or the timeout expired.
//!
//! Usage:
//!   cargo run --features cli --bin cell_dispatch_sim -- \
//!     --config config/dispatch.yaml \
//!     --activities 20 \
//!     --processes 4
//!
//! Without a config file (or with one that lists no cells) `--cells` default
//! cells are simulated behind an empty selector pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use cell_dispatch::cell::{CellId, SimulatedCell, SimulatedCellConfig};
use cell_dispatch::config::DispatcherConfig;
use cell_dispatch::coordinator::Coordinator;
use cell_dispatch::selector::SelectorRegistry;
use production_model::{Activity, Process};

/// Simulate dispatching activities to cells
#[derive(Parser, Debug)]
#[command(name = "cell_dispatch_sim")]
#[command(about = "Run the session protocol against simulated cells")]
struct Args {
    /// Dispatcher configuration (YAML)
    #[arg(long, short = 'c', env = "CELL_DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Number of activities to dispatch
    #[arg(long, short = 'a', default_value_t = 10)]
    activities: i64,

    /// Number of processes the activities are spread over
    #[arg(long, short = 'p', default_value_t = 3)]
    processes: i64,

    /// Cells to simulate when the config lists none
    #[arg(long, default_value_t = 3)]
    cells: i64,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DispatcherConfig::load_from_file(path)?,
        None => DispatcherConfig::default(),
    };

    let pipeline = config
        .build_pipeline(&SelectorRegistry::with_builtins())
        .context("Building selector pipeline")?;

    let mut cell_configs = config.simulation.cell_configs();
    if cell_configs.is_empty() {
        cell_configs = (1..=args.cells)
            .map(|id| {
                SimulatedCellConfig::new(CellId(id), format!("Cell {}", id))
                    .with_execution_time(config.simulation.execution_time())
                    .with_result_code(config.simulation.result_code)
            })
            .collect();
    }
    let cells: Vec<SimulatedCell> = cell_configs.into_iter().map(SimulatedCell::new).collect();

    let (mut coordinator, events) = Coordinator::new(config.engine_name.clone(), pipeline);
    for cell in &cells {
        coordinator.attach_cell(Arc::new(cell.clone())).await?;
    }

    let processes = args.processes.max(1);
    for id in 1..=args.activities {
        let process = Arc::new(Process::new((id - 1) % processes + 1));
        coordinator
            .enqueue(Activity::new(id, "Operate", process).into_handle())
            .await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let started = Instant::now();
    let runner = tokio::spawn(async move {
        coordinator.run(events, shutdown_rx).await;
        coordinator
    });

    let expected = u64::try_from(args.activities.max(0)).unwrap_or(0);
    let deadline = Duration::from_secs(args.timeout_secs);
    loop {
        let completed: u64 = cells.iter().map(|c| c.completed_activities()).sum();
        if completed >= expected {
            break;
        }
        if started.elapsed() >= deadline {
            tracing::warn!(completed, expected, "Simulation timed out");
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Let the last sequence acknowledgements drain
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send_replace(true);
    let coordinator = runner.await.context("Coordinator task failed")?;

    let stats = coordinator.stats();
    println!("Simulation finished in {:?}", started.elapsed());
    println!(
        "  dispatched: {}  completed: {}  unknown: {}  pending: {}",
        stats.dispatched,
        stats.completed,
        stats.unknown_completions,
        coordinator.pending().count()
    );
    for cell in &cells {
        let publish = cell.publish_stats();
        println!(
            "  cell {:>3} {:<12} activities: {:>3}  events: {} (dropped {})",
            cell.config().id.0,
            cell.config().name,
            cell.completed_activities(),
            publish.published,
            publish.dropped
        );
    }

    Ok(())
}
