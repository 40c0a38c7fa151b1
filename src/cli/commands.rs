//! CLI command definitions for agent-forge.
//!
//! Every command builds one [`Dispatcher`] from the environment plus flag
//! overrides (Redis, or an in-process store with `--memory`), runs one
//! operation and prints the outcome as JSON. `worker`
//! runs the worker pool until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::agents::Agent;
use crate::config::{DependencyPolicy, ForgeConfig};
use crate::dispatcher::{Dispatcher, JobRequest};
use crate::error::ForgeError;
use crate::llm::ChatClient;
use crate::results::ExportFormat;
use crate::scheduler::Priority;
use crate::store::MemoryStore;
use crate::uploads::NewUpload;
use crate::workflow::WorkflowOptions;

/// Multi-agent job dispatcher backed by Redis.
#[derive(Parser, Debug)]
#[command(name = "agent-forge")]
#[command(about = "Dispatch jobs and workflows to LLM-backed agents")]
#[command(version)]
#[command(
    long_about = "agent-forge queues jobs on Redis priority lists, runs workers that hand them to an LLM collaborator, and reports on results, workflows and system health.\n\nExample usage:\n  agent-forge enqueue \"Audit the payment module\" --priority high\n  agent-forge worker --workers 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Use an in-process store instead of Redis; state is lost on exit.
    #[arg(long, global = true)]
    pub memory: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run worker loops until interrupted.
    Worker(WorkerArgs),

    /// Queue a single job.
    Enqueue(EnqueueArgs),

    /// Create and inspect multi-step workflows.
    #[command(alias = "wf")]
    Workflow(WorkflowArgs),

    /// Queue a QA review of an existing job's output.
    Review(ReviewArgs),

    /// List, fetch and export results.
    Results(ResultsArgs),

    /// Manage agents.
    Agents(AgentsArgs),

    /// Register and list uploaded archives.
    Uploads(UploadsArgs),

    /// Print the health snapshot.
    Health,

    /// Print the analytics summary.
    Analytics,

    /// Print hourly result counts for the last 24 hours.
    Trends,

    /// Write and list Markdown summary reports.
    Reports(ReportsArgs),
}

/// Arguments for `agent-forge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of worker loops.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Idle poll interval in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Dependency policy: strict or advisory.
    #[arg(long)]
    pub dependency_policy: Option<DependencyPolicy>,
}

/// Arguments for `agent-forge enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Task description.
    pub task: String,

    /// Priority tier: high, normal or low.
    #[arg(short, long, default_value = "normal")]
    pub priority: Priority,

    /// Target agent; auto-assigned when omitted.
    #[arg(short, long)]
    pub agent: Option<String>,
}

#[derive(Parser, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum WorkflowSubcommand {
    /// Create a workflow for a task.
    Create {
        task: String,

        /// Add QA validation and final admin feedback.
        #[arg(long)]
        qa: bool,

        /// Add final admin feedback without QA.
        #[arg(long)]
        feedback: bool,

        /// Do not link steps with depends_on.
        #[arg(long)]
        no_dependencies: bool,

        #[arg(short, long, default_value = "normal")]
        priority: Priority,

        /// Agent for the specialist step.
        #[arg(long)]
        specialist: Option<String>,
    },

    /// Show a workflow's derived status.
    Status { workflow_id: Uuid },

    /// List recent workflows.
    List {
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(short = 'n', long, default_value = "20")]
        limit: u64,
    },

    /// Show the results produced by a workflow's steps.
    Results { workflow_id: Uuid },
}

/// Arguments for `agent-forge review`.
#[derive(Parser, Debug)]
pub struct ReviewArgs {
    /// Job whose output should be reviewed.
    pub job_id: Uuid,

    /// Review instructions.
    pub prompt: String,
}

#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub command: ResultsSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ResultsSubcommand {
    /// List recent results.
    List {
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(short = 'n', long, default_value = "20")]
        limit: u64,
        /// Only results produced by this agent.
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Fetch one result by job id.
    Get { job_id: Uuid },

    /// Export recent results to a file.
    Export {
        /// json or text.
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
        #[arg(short = 'n', long, default_value = "50")]
        limit: u64,
        /// Directory to write into.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Per-agent performance over recent results.
    Performance {
        #[arg(short = 'n', long, default_value = "200")]
        sample: u64,
    },
}

#[derive(Parser, Debug)]
pub struct AgentsArgs {
    #[command(subcommand)]
    pub command: AgentsSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum AgentsSubcommand {
    /// List registered agents.
    List {
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(short = 'n', long, default_value = "50")]
        limit: u64,
    },

    /// Create the default agents if missing.
    Seed,

    /// Register or update an agent.
    Register {
        name: String,
        role: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Comma-separated skill tags.
        #[arg(short, long)]
        skills: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Parser, Debug)]
pub struct UploadsArgs {
    #[command(subcommand)]
    pub command: UploadsSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum UploadsSubcommand {
    /// Register a stored archive and queue its analysis.
    Register {
        /// Path of the stored .zip archive.
        path: PathBuf,
        #[arg(short, long)]
        project: Option<String>,
    },

    /// List recent uploads.
    List {
        #[arg(long, default_value = "0")]
        offset: u64,
        #[arg(short = 'n', long, default_value = "20")]
        limit: u64,
    },
}

#[derive(Parser, Debug)]
pub struct ReportsArgs {
    #[command(subcommand)]
    pub command: ReportsSubcommand,

    /// Report directory.
    #[arg(short, long, default_value = "reports", global = true)]
    pub dir: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
pub enum ReportsSubcommand {
    /// Write a report from current analytics.
    Generate,

    /// List the newest reports.
    List,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = ForgeConfig::from_env()?;
    if let Some(url) = cli.redis_url {
        config = config.with_redis_url(url);
    }
    if let Commands::Worker(args) = &cli.command {
        config = apply_worker_overrides(config, args);
    }
    let dispatcher = connect(config, cli.memory).await?;

    match cli.command {
        Commands::Worker(_) => run_worker_command(&dispatcher).await,
        Commands::Enqueue(args) => {
            let mut request = JobRequest::new(args.task).with_priority(args.priority);
            if let Some(agent) = args.agent {
                request = request.with_agent(agent);
            }
            let job_id = dispatcher.enqueue_job(request).await?;
            print_json(&serde_json::json!({
                "status": "queued",
                "job_id": job_id,
                "priority": args.priority,
            }))
        }
        Commands::Workflow(args) => run_workflow_command(&dispatcher, args.command).await,
        Commands::Review(args) => {
            let review_job_id = dispatcher.admin_review(args.job_id, &args.prompt).await?;
            print_json(&serde_json::json!({
                "status": "admin_review_queued",
                "review_job_id": review_job_id,
                "original_job_id": args.job_id,
            }))
        }
        Commands::Results(args) => run_results_command(&dispatcher, args.command).await,
        Commands::Agents(args) => run_agents_command(&dispatcher, args.command).await,
        Commands::Uploads(args) => run_uploads_command(&dispatcher, args.command).await,
        Commands::Health => print_json(&dispatcher.health_snapshot().await?),
        Commands::Analytics => print_json(&dispatcher.analytics_summary().await?),
        Commands::Trends => {
            print_json(&serde_json::json!({ "series": dispatcher.trends_24h().await? }))
        }
        Commands::Reports(args) => match args.command {
            ReportsSubcommand::Generate => {
                print_json(&dispatcher.generate_report(&args.dir).await?)
            }
            ReportsSubcommand::List => print_json(&dispatcher.list_reports(&args.dir).await?),
        },
    }
}

async fn connect(config: ForgeConfig, memory: bool) -> anyhow::Result<Dispatcher> {
    if !memory {
        return Ok(Dispatcher::connect(config).await?);
    }
    config.validate()?;
    let provider = ChatClient::from_config(&config)?;
    info!("Using in-process store");
    Ok(Dispatcher::with_store(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(provider),
    )?)
}

fn apply_worker_overrides(mut config: ForgeConfig, args: &WorkerArgs) -> ForgeConfig {
    if let Some(workers) = args.workers {
        config = config.with_num_workers(workers);
    }
    if let Some(ms) = args.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(policy) = args.dependency_policy {
        config = config.with_dependency_policy(policy);
    }
    config
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_worker_command(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let seeded = dispatcher.seed_agents().await?;
    if seeded > 0 {
        info!(seeded, "Seeded default agents");
    }

    let mut pool = dispatcher.worker_pool();
    pool.start()?;
    info!(
        workers = pool.num_workers(),
        policy = %dispatcher.config().dependency_policy,
        "Workers running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    pool.shutdown().await?;

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        deferred = stats.jobs_deferred,
        "Workers stopped"
    );
    Ok(())
}

async fn run_workflow_command(
    dispatcher: &Dispatcher,
    command: WorkflowSubcommand,
) -> anyhow::Result<()> {
    match command {
        WorkflowSubcommand::Create {
            task,
            qa,
            feedback,
            no_dependencies,
            priority,
            specialist,
        } => {
            let mut options = WorkflowOptions::default().with_priority(priority);
            if qa {
                options = options.with_qa();
            }
            if feedback {
                options = options.with_feedback();
            }
            if no_dependencies {
                options = options.without_dependencies();
            }
            if let Some(agent) = specialist {
                options = options.with_specialist(agent);
            }
            let workflow = dispatcher.create_workflow(&task, options).await?;
            print_json(&workflow)
        }
        WorkflowSubcommand::Status { workflow_id } => {
            let report = dispatcher
                .get_workflow_status(workflow_id)
                .await?
                .ok_or_else(|| ForgeError::not_found("workflow", workflow_id))?;
            print_json(&report)
        }
        WorkflowSubcommand::List { offset, limit } => {
            print_json(&dispatcher.list_workflows(offset, limit).await?)
        }
        WorkflowSubcommand::Results { workflow_id } => {
            let results = dispatcher
                .results_for_workflow(workflow_id)
                .await?
                .ok_or_else(|| ForgeError::not_found("workflow", workflow_id))?;
            print_json(&results)
        }
    }
}

async fn run_results_command(
    dispatcher: &Dispatcher,
    command: ResultsSubcommand,
) -> anyhow::Result<()> {
    match command {
        ResultsSubcommand::List {
            offset,
            limit,
            agent,
        } => {
            let results = match agent {
                Some(agent) => dispatcher.results_by_agent(&agent, limit as usize).await?,
                None => dispatcher.list_results(offset, limit).await?,
            };
            print_json(&results)
        }
        ResultsSubcommand::Get { job_id } => {
            let result = dispatcher
                .get_result(job_id)
                .await?
                .ok_or_else(|| ForgeError::not_found("result", job_id))?;
            print_json(&result)
        }
        ResultsSubcommand::Export {
            format,
            limit,
            output,
        } => {
            let path = dispatcher.export_results(format, limit, &output).await?;
            print_json(&serde_json::json!({ "exported": path }))
        }
        ResultsSubcommand::Performance { sample } => {
            print_json(&dispatcher.agent_performance(sample).await?)
        }
    }
}

async fn run_agents_command(
    dispatcher: &Dispatcher,
    command: AgentsSubcommand,
) -> anyhow::Result<()> {
    match command {
        AgentsSubcommand::List { offset, limit } => {
            print_json(&dispatcher.list_agents(offset, limit).await?)
        }
        AgentsSubcommand::Seed => {
            let created = dispatcher.seed_agents().await?;
            print_json(&serde_json::json!({ "created": created }))
        }
        AgentsSubcommand::Register {
            name,
            role,
            description,
            skills,
            model,
        } => {
            let mut agent = Agent::new(name, role).with_skills(parse_skills(skills.as_deref()));
            if let Some(description) = description {
                agent = agent.with_description(description);
            }
            if let Some(model) = model {
                agent = agent.with_model(model);
            }
            print_json(&dispatcher.register_agent(agent).await?)
        }
    }
}

async fn run_uploads_command(
    dispatcher: &Dispatcher,
    command: UploadsSubcommand,
) -> anyhow::Result<()> {
    match command {
        UploadsSubcommand::Register { path, project } => {
            let size = tokio::fs::metadata(&path).await?.len();
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))?;
            let record = dispatcher
                .register_upload(NewUpload {
                    filename,
                    size,
                    file_path: Some(path.display().to_string()),
                    project,
                })
                .await?;
            print_json(&record)
        }
        UploadsSubcommand::List { offset, limit } => {
            print_json(&dispatcher.list_uploads(offset, limit).await?)
        }
    }
}

fn parse_skills(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
