use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use prettytable::{row, Table};
use tokio_util::sync::CancellationToken;

use scheduler_core::{
    ChannelEventSink, FnExecutor, Job, JobPriority, JobSpec, ProgressHandle, Scheduler,
    SchedulerConfig,
};

#[derive(Parser)]
#[command(name = "streamgate", version, about = "StreamGate job scheduler demo CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Number of worker tasks to run.
    #[arg(long, global = true, default_value_t = 4)]
    workers: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch of demo jobs across all priority levels, run them to
    /// completion, and print a results table.
    Run {
        #[arg(long, default_value_t = 20)]
        jobs: usize,
        /// Fraction (0.0-1.0) of jobs that simulate a transient failure.
        #[arg(long, default_value_t = 0.2)]
        fail_rate: f64,
    },
    /// Submit a single job and print its id without waiting for it.
    Submit {
        job_type: String,
        /// JSON payload, e.g. '{"x": 1}'.
        payload: String,
        #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum PriorityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<PriorityArg> for JobPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => JobPriority::Low,
            PriorityArg::Medium => JobPriority::Medium,
            PriorityArg::High => JobPriority::High,
            PriorityArg::Critical => JobPriority::Critical,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = SchedulerConfig::from_env().unwrap_or_default();
    config.max_workers = cli.workers;
    let event_buffer = config.event_buffer;

    let (sink, mut events) = ChannelEventSink::new(event_buffer);
    let scheduler = Scheduler::with_event_sink(config, Arc::new(sink));
    register_demo_executors(&scheduler)?;
    scheduler.start().await?;

    // Drains the lifecycle event channel on its own task so it never backs
    // up and starts dropping events.
    let event_drain = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(event = event.name(), job_id = %event.job().id, "lifecycle event");
        }
    });

    match cli.command {
        Commands::Run { jobs, fail_rate } => run_demo(&scheduler, jobs, fail_rate).await?,
        Commands::Submit {
            job_type,
            payload,
            priority,
        } => {
            let value: serde_json::Value = serde_json::from_str(&payload)?;
            let id = scheduler
                .submit(JobSpec::new(job_type, value).with_priority(priority.into()))
                .await?;
            println!("{} {}", "submitted".green(), id);
        }
    }

    if let Err(err) = scheduler.stop(Duration::from_secs(10)).await {
        tracing::warn!(%err, "scheduler did not drain cleanly within the grace period");
    }
    event_drain.abort();

    Ok(())
}

fn register_demo_executors(scheduler: &Scheduler) -> anyhow::Result<()> {
    scheduler.register_executor(
        "echo",
        Arc::new(FnExecutor(
            |job: Job, _cancel: CancellationToken, progress: ProgressHandle| async move {
                progress.set(100);
                Ok(job.payload)
            },
        )),
    )?;

    scheduler.register_executor(
        "flaky",
        Arc::new(FnExecutor(
            |job: Job, _cancel: CancellationToken, progress: ProgressHandle| async move {
                let should_fail = job
                    .payload
                    .get("fail")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                progress.set(50);
                if should_fail {
                    Err("simulated transient failure".to_string())
                } else {
                    Ok(job.payload)
                }
            },
        )),
    )?;

    Ok(())
}

async fn run_demo(scheduler: &Scheduler, jobs: usize, fail_rate: f64) -> anyhow::Result<()> {
    let mut ids = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let fail = jobs > 0 && (i as f64 / jobs as f64) < fail_rate;
        let priority = match i % 4 {
            0 => JobPriority::Critical,
            1 => JobPriority::High,
            2 => JobPriority::Medium,
            _ => JobPriority::Low,
        };
        let id = scheduler
            .submit(
                JobSpec::new("flaky", serde_json::json!({"seq": i, "fail": fail}))
                    .with_priority(priority),
            )
            .await?;
        ids.push(id);
    }

    loop {
        let stats = scheduler.stats();
        if stats.running == 0 && stats.queue_len == 0 && stats.pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut table = Table::new();
    table.add_row(row!["id", "status", "priority", "retries"]);
    for id in &ids {
        if let Some(job) = scheduler.get(id) {
            table.add_row(row![job.id, job.status, job.priority, job.retry_count]);
        }
    }
    table.printstd();

    let stats = scheduler.stats();
    println!(
        "{} completed={} failed={} cancelled={} avg_runtime={:?}",
        "stats".cyan(),
        stats.completed,
        stats.failed,
        stats.cancelled,
        stats.average_runtime
    );

    Ok(())
}
