use clap::{Parser, Subcommand, ValueEnum};
use marketpulse::config::Config;
use marketpulse::events::EventRecorder;
use marketpulse::health::HealthEvaluator;
use marketpulse::pipeline::{build_jobs, component_probes, Collaborators};
use marketpulse::scheduler::{RunOnceOutcome, SchedulerError, SchedulerService, StartOptions};
use marketpulse::state::StateStore;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_ALREADY_RUNNING: u8 = 3;
const EXIT_UNKNOWN_JOB: u8 = 4;

#[derive(Parser)]
#[command(name = "marketpulse", version, about = "Market-news scheduler and pipeline driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler in the foreground until interrupted
    Start {
        /// Job-group selection
        #[arg(long, value_enum, default_value_t = Mode::Standard)]
        mode: Mode,

        /// Skip the nightly maintenance job
        #[arg(long)]
        no_maintenance: bool,

        /// Skip the health/recovery monitor loop
        #[arg(long)]
        no_monitor: bool,
    },
    /// Show the last persisted scheduler state
    Status {
        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Execute one job immediately and exit
    RunOnce {
        /// Job id, e.g. news_collection
        job_id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Collection jobs only
    Collection,
    /// Collection, analysis and email report jobs
    Standard,
    /// The combined full-pipeline job
    Pipeline,
    /// The multi-slot time-windowed strategy
    Strategy,
}

impl Mode {
    fn options(self) -> StartOptions {
        match self {
            Mode::Collection => StartOptions::collection_only(),
            Mode::Standard => StartOptions::standard(),
            Mode::Pipeline => StartOptions::full_pipeline(),
            Mode::Strategy => StartOptions::enhanced_strategy(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(&config.observability.log_level)
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Start {
            mode,
            no_maintenance,
            no_monitor,
        } => start(config, mode, no_maintenance, no_monitor).await,
        Command::Status { json } => status(config, json).await,
        Command::RunOnce { job_id } => run_once(config, &job_id).await,
    }
}

/// Rebuild the scheduler service from configuration and persisted state.
async fn build_service(config: Config) -> Result<Arc<SchedulerService>, ExitCode> {
    let store = StateStore::new(config.state.path.clone());
    let persisted = store.load().await;
    let recorder = EventRecorder::resume(
        config.scheduler.history_capacity,
        persisted.counters(),
        persisted.event_history,
        persisted.last_event_by_job,
    );

    let service = match SchedulerService::new(config, store, recorder) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            tracing::error!(error = %err, "scheduler construction failed");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    };

    // Real feed/model/SMTP integrations plug in here; the shipped binary
    // wires inert collaborators.
    let collaborators = Collaborators::inert();
    let jobs = match build_jobs(service.config(), &collaborators) {
        Ok(jobs) => jobs,
        Err(err) => {
            tracing::error!(error = %err, "job catalog construction failed");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    };
    for job in jobs {
        if let Err(err) = service.register(job) {
            tracing::error!(error = %err, "job registration failed");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    }
    service.set_component_probes(component_probes(&collaborators));

    Ok(service)
}

async fn start(config: Config, mode: Mode, no_maintenance: bool, no_monitor: bool) -> ExitCode {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?mode,
        "starting marketpulse scheduler"
    );

    let service = match build_service(config).await {
        Ok(service) => service,
        Err(code) => return code,
    };

    let mut options = mode.options();
    options.maintenance = !no_maintenance;
    options.monitoring = !no_monitor;

    match service.start(options) {
        Ok(()) => {}
        Err(SchedulerError::AlreadyRunning) => return ExitCode::from(EXIT_ALREADY_RUNNING),
        Err(err) => {
            tracing::error!(error = %err, "scheduler start failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "signal handler failed, shutting down"),
    }

    service.stop().await;
    ExitCode::from(EXIT_OK)
}

async fn status(config: Config, json: bool) -> ExitCode {
    let store = StateStore::new(config.state.path.clone());
    let state = store.load().await;

    let recorder = EventRecorder::resume(
        config.scheduler.history_capacity,
        state.counters(),
        state.event_history.clone(),
        state.last_event_by_job.clone(),
    );
    let verdict = HealthEvaluator::new(config.health.clone()).evaluate(&recorder, &[]);

    if json {
        let view = serde_json::json!({
            "running": state.running,
            "start_time": state.start_time,
            "total_executions": state.total_executions,
            "total_failures": state.total_failures,
            "health": verdict,
            "saved_at": state.saved_at,
        });
        match serde_json::to_string_pretty(&view) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                eprintln!("failed to render status: {err}");
                return ExitCode::from(EXIT_FAILURE);
            }
        }
    } else {
        println!(
            "scheduler: {}",
            if state.running { "running" } else { "stopped" }
        );
        if let Some(saved_at) = state.saved_at {
            println!("state saved: {saved_at}");
        }
        println!("executions: {} ({} failed)", state.total_executions, state.total_failures);
        println!(
            "health: {} (failure rate {:.2} over {} events)",
            verdict.status, verdict.failure_rate, verdict.window_len
        );
        for event in state.event_history.iter().rev().take(config.monitor.event_tail) {
            println!(
                "  {} {} {} {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.job_id,
                event.kind,
                event.message
            );
        }
    }
    ExitCode::from(EXIT_OK)
}

async fn run_once(config: Config, job_id: &str) -> ExitCode {
    let service = match build_service(config).await {
        Ok(service) => service,
        Err(code) => return code,
    };

    match service.run_once(job_id).await {
        Ok(RunOnceOutcome::Completed(event)) => {
            println!("{}: {} ({})", event.job_id, event.message, event.kind);
            if event.succeeded() {
                ExitCode::from(EXIT_OK)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
        Ok(RunOnceOutcome::AlreadyRunning(event)) => {
            println!("{}: {}", event.job_id, event.message);
            ExitCode::from(EXIT_ALREADY_RUNNING)
        }
        Err(SchedulerError::UnknownJob(job)) => {
            eprintln!("unknown job: {job}");
            ExitCode::from(EXIT_UNKNOWN_JOB)
        }
        Err(err) => {
            eprintln!("manual execution failed: {err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
