use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use gpuwarden::analysis::{AnalysisRecord, ReviewStatus, Sweeper};
use gpuwarden::config::{Config, LoggingConfig};
use gpuwarden::jobs::{EligibilityPolicy, SqliteJobStore};
use gpuwarden::storage::{RecordStore, SqliteRecordStore};

#[derive(Parser)]
#[command(
    name = "gpuwarden",
    about = "GPU-abuse patrol: LLM-scored inspection of idle GPU workloads",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $GPUWARDEN_CONFIG, then /etc/gpuwarden/gpuwarden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (analysis worker + periodic patrol)
    Serve,

    /// Analyze the running pod of one job now
    AnalyzeJob {
        /// Job name
        name: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Analyze one pod now, skipping the eligibility checks
    AnalyzePod {
        #[arg(long)]
        namespace: String,

        #[arg(long)]
        pod: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Queue every eligible running job and wait for the analyses to finish
    TriggerAll,

    /// List live findings, highest phase 2 score first
    List {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Record an admin decision on a finding
    Review {
        /// Finding id
        #[arg(long)]
        id: i64,

        #[arg(long, value_enum)]
        status: ReviewChoice,
    },

    /// Run the retention passes (both when neither flag is given)
    Sweep {
        /// Drop live findings whose job no longer qualifies
        #[arg(long)]
        stale: bool,

        /// Drop reviewed findings older than the retention window
        #[arg(long)]
        overtime: bool,
    },

    /// Check that the LLM endpoint answers and serves the configured model
    LlmCheck,

    /// Inspect the patrol schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Preview patrol times in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReviewChoice {
    Confirmed,
    Ignored,
}

impl From<ReviewChoice> for ReviewStatus {
    fn from(c: ReviewChoice) -> Self {
        match c {
            ReviewChoice::Confirmed => ReviewStatus::Confirmed,
            ReviewChoice::Ignored => ReviewStatus::Ignored,
        }
    }
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_record(record: &AnalysisRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    println!("\n=== GPU Analysis: {} ===", record.job_name);
    println!("Record:   {}", record.id.map(|i| i.to_string()).unwrap_or_default());
    println!("Pod:      {}/{}", record.namespace, record.pod_name);
    println!("User:     {}", record.user_name);
    println!("Command:  {}", record.command);
    println!("Phase 1:  {} ({})", record.phase1_score, record.phase1_reason);
    if record.phase2_evaluated() {
        println!("Phase 2:  {} ({})", record.phase2_score, record.phase2_reason);
    } else {
        println!("Phase 2:  not evaluated");
    }
    println!("Review:   {}", record.review_status);
    println!();
    Ok(())
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting gpuwarden daemon");
            gpuwarden::serve(config).await?;
        }
        Commands::AnalyzeJob { name, json } => {
            let (service, _worker) = gpuwarden::build_service(&config)?;
            let record = service.analyze_job(&name).await?;
            print_record(&record, json)?;
        }
        Commands::AnalyzePod { namespace, pod, json } => {
            let (service, _worker) = gpuwarden::build_service(&config)?;
            let record = service.analyze_pod(&namespace, &pod).await?;
            print_record(&record, json)?;
        }
        Commands::TriggerAll => {
            let (service, worker) = gpuwarden::build_service(&config)?;
            let handler = service.job_handler();
            let queued = service.trigger_all_eligible().await;
            // Dropping the service closes the queue; the worker then drains it and exits.
            drop(service);
            worker.run(handler).await;
            let queued = queued?;
            println!("Analyzed {} job(s).", queued);
        }
        Commands::List { json } => {
            let records = SqliteRecordStore::new(gpuwarden::open_database(&config)?).list_live_ranked()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No live findings.");
            } else {
                println!(
                    "{:<6} | {:<24} | {:<12} | {:>3} | {:>3} | {:<9} | Command",
                    "ID", "Job", "User", "P1", "P2", "Review"
                );
                println!("{:-<6}-|-{:-<24}-|-{:-<12}-|-{:-<3}-|-{:-<3}-|-{:-<9}-|-{:-<30}", "", "", "", "", "", "", "");
                for r in &records {
                    let p2 = if r.phase2_evaluated() {
                        r.phase2_score.to_string()
                    } else {
                        "-".to_string()
                    };
                    println!(
                        "{:<6} | {:<24} | {:<12} | {:>3} | {:>3} | {:<9} | {}",
                        r.id.unwrap_or_default(),
                        shorten(&r.job_name, 24),
                        shorten(&r.user_name, 12),
                        r.phase1_score,
                        p2,
                        r.review_status.to_string(),
                        shorten(&r.command, 60)
                    );
                }
            }
        }
        Commands::Review { id, status } => {
            let store = SqliteRecordStore::new(gpuwarden::open_database(&config)?);
            let status = ReviewStatus::from(status);
            if !store.set_review_status(id, status)? {
                bail!("analysis record {} not found", id);
            }
            println!("Record {} marked {}.", id, status);
        }
        Commands::Sweep { stale, overtime } => {
            let pool = gpuwarden::open_database(&config)?;
            let sweeper = Sweeper::new(
                Arc::new(SqliteJobStore::new(pool.clone())),
                Arc::new(SqliteRecordStore::new(pool)),
                EligibilityPolicy::from_config(&config.analysis),
                config.patrol.retention(),
            );
            let both = !stale && !overtime;
            if stale || both {
                let n = sweeper.sweep_stale().await?;
                println!("Stale findings removed:    {}", n);
            }
            if overtime || both {
                let n = sweeper.sweep_overtime()?;
                println!("Overtime findings removed: {}", n);
            }
        }
        Commands::LlmCheck => {
            if let Some(problem) = config.llm.readiness_problem() {
                bail!("{}", problem);
            }
            let client = gpuwarden::llm::OpenAiClient::new(&config.llm)?;
            client
                .check_connection()
                .await
                .context("LLM endpoint check failed")?;
            println!("LLM endpoint OK, model '{}' available.", config.llm.model);
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::DryRun { hours } => {
                let schedule = gpuwarden::scheduler::PatrolSchedule::parse(&config.patrol.cron)?;
                let preview = schedule.preview(chrono::Utc::now(), hours);
                if !config.patrol.enabled {
                    println!("Periodic patrol is disabled in the configuration.");
                }
                if preview.is_empty() {
                    println!("No patrols scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming patrols (next {} hours, cron '{}'):", hours, schedule.expr());
                    for t in preview {
                        println!("{}", t.to_rfc3339());
                    }
                }
            }
        },
    }

    Ok(())
}
