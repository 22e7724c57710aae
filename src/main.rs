use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use observatory::config::{LoggingConfig, ObservatoryConfig};
use observatory::crawl::LaunchOutcome;
use observatory::Services;

#[derive(Parser)]
#[command(
    name = "observatory",
    about = "Web accessibility observatory: crawl lifecycle and report generation",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $OBSERVATORY_CONFIG, then /etc/observatory/observatory.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Mark crawls and executions left running by a dead process as failed
    Reconcile,

    /// Stop every running crawl and execution
    StopAll,

    /// Build the reports of one execution and notify by mail when done
    GenerateReports {
        /// Observatory id
        #[arg(long)]
        observatory: i64,

        /// Execution id
        #[arg(long)]
        execution: i64,

        /// Address that receives the completion mail
        #[arg(long)]
        email: String,
    },

    /// Drive a single crawl
    Crawl {
        #[command(subcommand)]
        action: CrawlCommand,
    },

    /// Start or finish an observatory execution
    Execution {
        #[command(subcommand)]
        action: ExecutionCommand,
    },
}

#[derive(Subcommand)]
enum ExecutionCommand {
    /// Open the next execution of an observatory
    Launch {
        /// Observatory id
        observatory: i64,
    },

    /// Mark a running execution as finished
    Finish {
        /// Execution id
        id: i64,
    },
}

#[derive(Subcommand)]
enum CrawlCommand {
    /// Launch a crawl
    Launch {
        /// Crawl id
        id: i64,

        /// Execution the run belongs to
        #[arg(long)]
        execution: Option<i64>,
    },

    /// Mark a running crawl as finished
    Finish {
        /// Crawl id
        id: i64,
    },

    /// Show a crawl's status
    Status {
        /// Crawl id
        id: i64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ObservatoryConfig::load(path)?,
        None => ObservatoryConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting observatory daemon");
            observatory::serve(config).await?;
        }
        Commands::Reconcile => {
            let services = Services::open(&config)?;
            let summary = services.crawls.fail_all()?;
            println!(
                "Marked {} crawl(s) and {} execution(s) as failed.",
                summary.crawls, summary.executions
            );
        }
        Commands::StopAll => {
            let services = Services::open(&config)?;
            let summary = services.crawls.stop_all()?;
            println!(
                "Stopped {} crawl(s) and {} execution(s).",
                summary.crawls, summary.executions
            );
        }
        Commands::GenerateReports {
            observatory,
            execution,
            email,
        } => {
            let services = Services::open(&config)?;
            let job = services
                .reports
                .job_for_execution(observatory, execution, &email)?;
            let summary = services.reports.generate_reports(job).await;

            println!("\n=== Report generation {} ===", summary.batch_id);
            println!("{:<16} {}", "Built:", summary.built);
            println!("{:<16} {}", "Already built:", summary.already_built);
            println!("{:<16} {}", "No evaluations:", summary.no_evaluations);
            println!("{:<16} {}", "Busy:", summary.busy);
            println!("{:<16} {}", "Failed:", summary.failed);
            println!("{:<16} {}", "Notified:", summary.notified);
            println!();
        }
        Commands::Crawl { action } => {
            let services = Services::open(&config)?;
            match action {
                CrawlCommand::Launch { id, execution } => {
                    match services.crawls.launch(id, execution)? {
                        LaunchOutcome::Launched => println!("Crawl {} launched.", id),
                        LaunchOutcome::Rejected => {
                            println!("Crawl {} not launched: another crawl is running.", id)
                        }
                    }
                }
                CrawlCommand::Finish { id } => match services.crawls.finish(id)? {
                    Some(fulfilled) => println!(
                        "Crawl {} finished (fulfilled crawling {}, execution {}).",
                        id, fulfilled.id, fulfilled.execution_id
                    ),
                    None => println!("Crawl {} finished.", id),
                },
                CrawlCommand::Status { id } => {
                    let crawl = services.crawls.crawl(id)?;
                    println!("{}", serde_json::to_string_pretty(&crawl)?);
                }
            }
        }
        Commands::Execution { action } => {
            let services = Services::open(&config)?;
            match action {
                ExecutionCommand::Launch { observatory } => {
                    let execution = services.store.launch_execution(observatory)?;
                    println!(
                        "Execution {} (#{}) of observatory {} launched.",
                        execution.id, execution.ordinal, observatory
                    );
                }
                ExecutionCommand::Finish { id } => {
                    if services.store.finish_execution(id)? {
                        println!("Execution {} finished.", id);
                    } else {
                        println!("Execution {} was not running.", id);
                    }
                }
            }
        }
    }

    Ok(())
}
