//! quarry CLI: run an executor, submit a pipeline to a set of executors, or
//! explain how a pipeline would be laid out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use quarry_core::prelude::{DispatchMode, EngineConfig, Location};
use quarry_exec::{CsvTableProvider, Executor, ExecutorServer};
use quarry_plan::{create_eplan, describe_eplan, executor_number, PipelineCompiler, QueryCompiler};
use quarry_sched::{ExecutorClient, RunOutcome, Scheduler, StaticTopology, TcpExecutorClient};
use quarry_split::Split;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "quarry: a small distributed SQL engine core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Sequential,
    Parallel,
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Lower bound of the parallelism search (overrides QUARRY_MIN_PARALLELISM)
    #[arg(long)]
    min_parallelism: Option<usize>,

    /// Upper bound of the parallelism search (overrides QUARRY_MAX_PARALLELISM)
    #[arg(long)]
    max_parallelism: Option<usize>,

    /// How dispatch RPCs inside one phase are issued
    #[arg(long, value_enum)]
    dispatch_mode: Option<Mode>,

    /// Keep executors allocated after a failed dispatch instead of aborting them
    #[arg(long)]
    no_abort_on_failure: bool,

    /// Rows per framed batch
    #[arg(long)]
    batch_rows: Option<usize>,

    /// Cap on rows buffered by a local sort
    #[arg(long)]
    sort_limit: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one executor until killed
    Executor {
        /// Executor name; must match the name used by the coordinator
        #[arg(long)]
        name: String,

        /// Address to listen on, e.g. 127.0.0.1:7001
        #[arg(long)]
        listen: String,

        /// Root of the csv tables (overrides QUARRY_DATA_ROOT)
        #[arg(long)]
        data_root: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run a pipeline on a set of executors and print the result as csv
    Submit {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Executors as name=host:port, comma separated
        #[arg(long, env = "QUARRY_EXECUTORS", value_delimiter = ',', required = true)]
        executors: Vec<String>,

        #[arg(long, default_value = "default")]
        catalog: String,

        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Status poll interval in milliseconds
        #[arg(long, default_value_t = 100)]
        poll_ms: u64,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show the physical plan a pipeline would get
    Explain {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Parallelism to lay the plan out at
        #[arg(long, default_value_t = 2)]
        parallelism: usize,

        #[arg(long, default_value = "default")]
        catalog: String,

        #[arg(long, default_value = "public")]
        schema: String,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Executor {
            name,
            listen,
            data_root,
            engine,
        } => run_executor(name, listen, data_root, &engine),
        Commands::Submit {
            pipeline,
            executors,
            catalog,
            schema,
            priority,
            poll_ms,
            timeout_secs,
            engine,
        } => submit(
            &pipeline,
            &executors,
            &catalog,
            &schema,
            priority,
            Duration::from_millis(poll_ms),
            Duration::from_secs(timeout_secs),
            &engine,
        ),
        Commands::Explain {
            pipeline,
            parallelism,
            catalog,
            schema,
        } => explain(&pipeline, parallelism, &catalog, &schema),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// `QUARRY_LOG` takes an `EnvFilter` directive; default `info`.
fn init_logging() {
    let filter = EnvFilter::try_from_env("QUARRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn engine_config(args: &EngineArgs) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env();
    if let Some(v) = args.min_parallelism {
        config.min_parallelism = v;
    }
    if let Some(v) = args.max_parallelism {
        config.max_parallelism = v;
    }
    if let Some(mode) = args.dispatch_mode {
        config.dispatch_mode = match mode {
            Mode::Sequential => DispatchMode::Sequential,
            Mode::Parallel => DispatchMode::Parallel,
        };
    }
    if args.no_abort_on_failure {
        config.abort_on_dispatch_failure = false;
    }
    if let Some(v) = args.batch_rows {
        config.split_batch_rows = v;
    }
    if let Some(v) = args.sort_limit {
        config.sort_buffer_limit_rows = Some(v);
    }
    config.validate()?;
    Ok(config)
}

fn run_executor(
    name: String,
    listen: String,
    data_root: Option<String>,
    args: &EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = engine_config(args)?;
    if let Some(root) = data_root {
        config.data_root = root;
    }
    let location: Location = format!("{name}={listen}").parse()?;
    let provider = Arc::new(CsvTableProvider::new(&config.data_root, config.split_batch_rows));
    let executor = Arc::new(Executor::new(location.clone(), provider, &config));
    let server = ExecutorServer::bind(&location.addr())?;
    info!(
        executor = %location.name,
        addr = %server.local_addr()?,
        data_root = %config.data_root,
        version = quarry_core::VERSION,
        "starting executor"
    );
    server.serve(executor)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn submit(
    pipeline: &Path,
    executors: &[String],
    catalog: &str,
    schema: &str,
    priority: i32,
    poll: Duration,
    timeout: Duration,
    args: &EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = engine_config(args)?;
    let query = fs::read_to_string(pipeline)?;
    let locations = executors
        .iter()
        .map(|s| s.parse::<Location>())
        .collect::<Result<Vec<_>, _>>()?;

    let client = Arc::new(TcpExecutorClient::new());
    let scheduler = Scheduler::new(
        config,
        Arc::new(PipelineCompiler::new()),
        Arc::new(StaticTopology::new(locations)),
        client.clone(),
    );
    let task_id = scheduler.add_task(&query, catalog, schema, priority)?;

    match scheduler.run_task()? {
        RunOutcome::Dispatched {
            parallelism,
            executors,
            ..
        } => info!(task = %task_id, parallelism, executors, "dispatched"),
        RunOutcome::Waiting { required, free, .. } => {
            return Err(format!("pipeline needs {required} executors, {free} available").into())
        }
        RunOutcome::Idle => return Err("task was not queued".into()),
    }

    let started = Instant::now();
    while !scheduler.poll_running()?.contains(&task_id) {
        if started.elapsed() > timeout {
            warn!(task = %task_id, "timed out; aborting");
            if let Some(task) = scheduler.task(task_id) {
                for location in &task.executors {
                    if let Err(e) = client.abort(location, task_id) {
                        warn!(executor = %location.name, error = %e, "abort failed");
                    }
                }
            }
            scheduler.finish_task(task_id, false, Some("timed out".into()))?;
            return Err("timed out waiting for the task".into());
        }
        thread::sleep(poll);
    }

    let task = scheduler
        .task(task_id)
        .ok_or_else(|| format!("task {task_id} vanished"))?;
    if let Some(err) = task.error {
        return Err(format!("task {task_id} failed: {err}").into());
    }
    let split = scheduler.fetch_results(task_id)?;
    print_csv(&split)?;
    info!(task = %task_id, rows = split.num_rows(), elapsed_ms = started.elapsed().as_millis() as u64, "done");
    Ok(())
}

fn print_csv(split: &Split) -> Result<(), Box<dyn std::error::Error>> {
    write_csv(split, io::stdout())
}

/// Header row of column names, then one record per row; nulls are empty cells.
fn write_csv<W: io::Write>(split: &Split, writer: W) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(split.metadata.columns.iter().map(|f| f.name.as_str()))?;
    for r in 0..split.num_rows() {
        out.write_record(split.row(r).iter().map(|v| if v.is_null() { String::new() } else { v.to_string() }))?;
    }
    out.flush()?;
    Ok(())
}

fn explain(
    pipeline: &Path,
    parallelism: usize,
    catalog: &str,
    schema: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let query = fs::read_to_string(pipeline)?;
    let plan = PipelineCompiler::new().compile(&query, catalog, schema)?;
    let needed = executor_number(&plan, parallelism)?;

    let mut free = placeholder_locations(needed);
    let mut nodes = Vec::new();
    let root = create_eplan(&plan, &mut nodes, &mut free, parallelism)?;

    println!("Pipeline Execution Plan");
    println!("=======================");
    println!();
    println!("Logical plan:");
    let mut step = Some(&plan);
    let mut depth = 0;
    while let Some(p) = step {
        println!("  {:indent$}{}", "", p.name(), indent = depth * 2);
        step = p.input();
        depth += 1;
    }
    println!();
    println!("Parallelism: {parallelism}");
    println!("Executors:   {needed} (at parallelism 1: {})", executor_number(&plan, 1)?);
    println!("Root:        {}", root.location.name);
    println!();
    println!("Physical nodes:");
    print!("{}", describe_eplan(&nodes));
    Ok(())
}

/// Stand-in executors for `explain`; only the names are shown.
fn placeholder_locations(n: usize) -> Vec<Location> {
    (0..n)
        .map(|i| Location::new(format!("exec-{i}"), "127.0.0.1", 7000u16.wrapping_add(i as u16)))
        .collect()
}
