use anyhow::Context;
use clap::Parser;
use generator::profile::{homogeneous_grid, GeneratorConfig, GridConfig};
use gui_bridge::bridge::{default_bind_address, HttpBridge};
use gui_bridge::model::StackBoard;
use migcore::interface::ControlSignal;
use migcore::traveltime::{JsonDirectorySource, TravelTimeSource};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio::sync::broadcast;
use workflow::config::WorkflowConfig;
use workflow::runner::{Runner, WorkflowResult};

mod generator;
mod gui_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Real-time migration stack driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Write a homogeneous-velocity travel-time grid before starting
    #[arg(long, default_value_t = false)]
    synthetic_grid: bool,
    /// Seconds of synthetic data per station
    #[arg(long, default_value_t = 30.0)]
    duration: f64,
    #[arg(long, default_value_t = 1.0)]
    packet_seconds: f64,
    /// Grid point the synthetic event originates from
    #[arg(long, default_value_t = 0)]
    source_point: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Keep the HTTP bridge up until Ctrl+C or POST /stop
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long, default_value_t = default_bind_address())]
    bind: SocketAddr,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let workflow_config = match &args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::synthetic(),
    };
    let dirs = workflow_config.resolve_dirs()?;
    log::info!("output directory {}", dirs.out.display());

    let store = JsonDirectorySource::new(&dirs.ttimes, workflow_config.time_grid.clone());
    if args.synthetic_grid {
        let rows = homogeneous_grid(&workflow_config.stations, &GridConfig::default())?;
        for row in &rows {
            store.write(row).context("writing synthetic travel times")?;
        }
        log::info!("wrote {} synthetic travel-time files", rows.len());
    }
    let source: Arc<dyn TravelTimeSource> = Arc::new(store);

    let generator = GeneratorConfig {
        duration: args.duration,
        packet_seconds: args.packet_seconds,
        source_point: args.source_point,
        seed: args.seed,
        ..Default::default()
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    let runner = Runner::new(workflow_config);
    let result = runtime.block_on(async {
        let board = Arc::new(StackBoard::new());
        let mut pipeline = runner.start(source)?;
        let mut control = pipeline.control().subscribe();
        let server = args
            .serve
            .then(|| HttpBridge::new(board.clone(), pipeline.control()).spawn(args.bind));

        let feed = runner.feed(&mut pipeline, &generator, board.clone()).await?;
        if server.is_some() {
            log::info!("stacks ready on http://{}/stacks (Ctrl+C or POST /stop to finish)", args.bind);
            wait_for_stop(&mut control).await?;
        }
        let result = runner.finish(pipeline, feed, &board).await?;
        if let Some(server) = server {
            server.abort();
        }
        Ok::<WorkflowResult, anyhow::Error>(result)
    })?;

    println!(
        "Run -> {} packets, {} stacks, best point {:?} (max stack {:.3}), {} rejected, {} reloads",
        result.packets,
        result.metrics.stacks_emitted,
        result.board.best_point,
        result.board.max_stack,
        result.metrics.rejected,
        result.metrics.reloads
    );
    append_report(&dirs.out, &result)
}

async fn wait_for_stop(control: &mut broadcast::Receiver<ControlSignal>) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            interrupted = signal::ctrl_c() => {
                interrupted.context("awaiting Ctrl+C to exit")?;
                return Ok(());
            }
            received = control.recv() => match received {
                Ok(ControlSignal::Shutdown) | Err(broadcast::error::RecvError::Closed) => return Ok(()),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

fn append_report(out_dir: &Path, result: &WorkflowResult) -> anyhow::Result<()> {
    let report = format!(
        "packets={} stacks={} best_point={} max_stack={:.4} acked={} rejected={} sentinels={} reloads={}\n",
        result.packets,
        result.metrics.stacks_emitted,
        result
            .board
            .best_point
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".into()),
        result.board.max_stack,
        result.metrics.acked,
        result.metrics.rejected,
        result.metrics.sentinels_forwarded,
        result.metrics.reloads
    );
    let report_path = out_dir.join("stack_report.log");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&report_path)
        .with_context(|| format!("opening {}", report_path.display()))?;
    file.write_all(report.as_bytes())?;
    Ok(())
}
