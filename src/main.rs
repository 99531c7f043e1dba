use std::{path::PathBuf, process::ExitCode, sync::Arc};

use chrono::Utc;
use clap::Parser;
use tagwarden::{
    clients::ArmClient,
    config::{self, AppConfig},
    jobs::{TaggingPass, start_tagging_worker},
    models::Period,
    observability,
    services::{CostAggregator, Report},
};
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_FILE: &str = "tagwarden.toml";

#[derive(Parser, Debug)]
#[command(name = "tagwarden", version, about = "Azure cost attribution and ownership tagging")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./tagwarden.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print cost per owner and per resource group
    Report {
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
        /// Length of the trailing window in days (overrides cost.lookback_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Resolve owners and stamp lifecycle deadlines
    Tag {
        /// Keep running, one pass every runtime.interval_secs
        #[arg(long)]
        watch: bool,
        /// Log tag changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// One tagging pass followed by the cost report
    Run {
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./tagwarden.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ReportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if let Command::Init { output, force } = &args.command {
        return run_init(output.clone().unwrap_or(config_path), *force);
    }

    let config = match AppConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        config_file = %config_path.display(),
        subscriptions = config.azure.subscription_ids.len(),
        "Starting tagwarden"
    );

    let client = match ArmClient::from_config(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Resource Manager client");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    match args.command {
        Command::Report { format, days } => {
            arm_deadline(&config, &cancel);
            run_report(&config, client, format, days, &cancel).await
        }
        Command::Tag { watch: true, dry_run } => {
            if config.runtime.deadline().is_some() {
                tracing::warn!("runtime.deadline_secs is ignored in watch mode");
            }
            let pass = Arc::new(tagging_pass(&config, client, dry_run));
            start_tagging_worker(pass, config.runtime.interval(), cancel).await;
            ExitCode::SUCCESS
        }
        Command::Tag { watch: false, dry_run } => {
            arm_deadline(&config, &cancel);
            exit_code(run_tagging_once(&config, client, dry_run, &cancel).await)
        }
        Command::Run { format } => {
            arm_deadline(&config, &cancel);
            if !run_tagging_once(&config, client.clone(), false, &cancel).await {
                return ExitCode::FAILURE;
            }
            run_report(&config, client, format, None, &cancel).await
        }
        Command::Init { .. } => ExitCode::SUCCESS,
    }
}

fn tagging_pass(config: &AppConfig, client: Arc<ArmClient>, dry_run: bool) -> TaggingPass {
    TaggingPass::new(
        client.clone(),
        client,
        config.azure.subscription_ids.clone(),
        &config.tagging,
        &config.runtime,
    )
    .with_dry_run(dry_run || config.tagging.dry_run)
}

async fn run_tagging_once(
    config: &AppConfig,
    client: Arc<ArmClient>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> bool {
    let result = tagging_pass(config, client, dry_run).run(cancel).await;

    if result.cancelled {
        tracing::error!("Tagging pass cancelled before completion");
        return false;
    }
    true
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_report(
    config: &AppConfig,
    client: Arc<ArmClient>,
    format: ReportFormat,
    days: Option<u32>,
    cancel: &CancellationToken,
) -> ExitCode {
    let days = days.unwrap_or(config.cost.lookback_days).max(1);
    let period = Period::trailing_days(Utc::now(), days);

    let aggregator = CostAggregator::new(client.clone(), client, config.tagging.owner_tag.clone())
        .with_max_pages(config.cost.max_pages)
        .with_concurrency(config.runtime.subscription_concurrency);

    let summary = match aggregator
        .aggregate(&config.azure.subscription_ids, period, cancel)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Cost aggregation failed");
            return ExitCode::FAILURE;
        }
    };

    let report = Report::from_summary(&summary);
    match format {
        ReportFormat::Text => print!("{}", report.render_text()),
        ReportFormat::Json => match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize report");
                return ExitCode::FAILURE;
            }
        },
    }

    ExitCode::SUCCESS
}

/// Cancel the run once `runtime.deadline_secs` elapses.
fn arm_deadline(config: &AppConfig, cancel: &CancellationToken) {
    let Some(deadline) = config.runtime.deadline() else {
        return;
    };
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_secs = deadline.as_secs(), "Run deadline reached, cancelling");
                cancel.cancel();
            }
        }
    });
}

async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling outstanding work");
    cancel.cancel();
}

fn run_init(output_path: PathBuf, force: bool) -> ExitCode {
    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        return ExitCode::FAILURE;
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = std::fs::write(&output_path, config::default_config_toml()) {
        eprintln!("Failed to write {}: {}", output_path.display(), e);
        return ExitCode::FAILURE;
    }

    println!("Created config file: {}", output_path.display());
    ExitCode::SUCCESS
}
