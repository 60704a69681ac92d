use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jqs::config::JqsConfig;
use jqs::error::Result;
use jqs::launcher::SystemdLauncher;
use jqs::resources::Accountant;
use jqs::scheduler::Scheduler;
use jqs::store::{record, JobDir, JobRecord, StateStore};
use jqs::{shutdown, submit};

#[derive(Parser, Debug)]
#[command(name = "jqs")]
#[command(about = "A single-host batch job queue with filesystem state")]
struct Cli {
    /// State root directory (default: $JQS_ROOT, then ~/jqs)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a job script with #JS resource directives
    Submit { script: PathBuf },
    /// List all jobs
    Q,
    /// Print a job's full record
    Info { jobid: u64 },
    /// Request cancellation of a job
    Cancel { jobid: u64 },
    /// Show resource usage against the node limits
    Nodes,
    /// Run the scheduling loop in the foreground
    Scheduler {
        /// Run exactly one tick and exit
        #[arg(long)]
        once: bool,
        /// Tick period in seconds
        #[arg(long, default_value = "1")]
        tick_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let is_scheduler = matches!(cli.command, Command::Scheduler { .. });

    if let Err(e) = run(cli).await {
        eprintln!("jqs: {e}");
        // The daemon distinguishes only fatal-init; CLI commands map the
        // error kind to their contract exit codes.
        let code = if is_scheduler { 1 } else { e.exit_code() };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = JqsConfig::resolve(cli.root);

    match cli.command {
        Command::Submit { script } => {
            let store = StateStore::open(&config.root)?;
            let record = submit::submit(&store, &script)?;
            println!("Submitted job {}", record.jobid);
            Ok(())
        }
        Command::Q => {
            let store = StateStore::open(&config.root)?;
            print_job_table(&store)
        }
        Command::Info { jobid } => {
            let store = StateStore::open(&config.root)?;
            let (dir, record) = store.find(jobid)?;
            print!("{}", record::encode(&record));
            println!("directory=\"{dir}\"");
            Ok(())
        }
        Command::Cancel { jobid } => {
            let store = StateStore::open(&config.root)?;
            store.mark_cancel_requested(jobid)?;
            println!("Cancel requested for job {jobid}");
            Ok(())
        }
        Command::Nodes => {
            let store = StateStore::open(&config.root)?;
            let accountant = Accountant::open(store.layout().clone())?;
            let limits = accountant.limits()?;
            let usage = accountant.usage()?;
            println!("cores {}/{}", usage.cores_used, limits.cores_total);
            println!("mem_mb {}/{}", usage.mem_mb_used, limits.mem_mb_total);
            Ok(())
        }
        Command::Scheduler { once, tick_secs } => {
            let config = config.with_tick(Duration::from_secs(tick_secs.max(1)));
            run_scheduler(config, once).await
        }
    }
}

async fn run_scheduler(config: JqsConfig, once: bool) -> Result<()> {
    let store = StateStore::open(&config.root)?;
    let accountant = Accountant::open(store.layout().clone())?;
    let launcher = SystemdLauncher::new(config.kill_grace);
    let mut scheduler = Scheduler::new(store, accountant, launcher, &config);

    tracing::info!(
        root = %config.root.display(),
        tick_secs = config.tick.as_secs(),
        once,
        "starting jqs scheduler"
    );

    if once {
        scheduler.tick_once().await;
        return Ok(());
    }

    let token = shutdown::install_shutdown_handler();
    scheduler.run(token).await;
    Ok(())
}

fn print_job_table(store: &StateStore) -> Result<()> {
    let mut jobs: Vec<JobRecord> = Vec::new();
    for dir in [JobDir::Queue, JobDir::Running, JobDir::Finished] {
        jobs.extend(store.list(dir)?);
    }
    jobs.sort_by_key(|r| r.jobid);

    println!(
        "{:<8} {:<10} {:<20} {:>5} {:>8} {:<19} {:<19} {:<19}",
        "JOBID", "STATE", "NAME", "CORES", "MEM_MB", "SUBMIT", "START", "END"
    );
    for job in jobs {
        println!(
            "{:<8} {:<10} {:<20} {:>5} {:>8} {:<19} {:<19} {:<19}",
            job.jobid,
            job.state,
            truncate(&job.name, 20),
            job.cores,
            job.mem_mb,
            fmt_time(Some(job.submit_time)),
            fmt_time(job.start_time),
            fmt_time(job.end_time),
        );
    }
    Ok(())
}

fn fmt_time(ts: Option<i64>) -> String {
    match ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
