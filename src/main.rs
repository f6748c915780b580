//! # TaskMaster: deadline notifier and policy tool
//!
//! Usage:
//!   taskmaster run                              # Start the notification scheduler
//!   taskmaster scan reminders --dry-run         # List tomorrow's reminder candidates
//!   taskmaster scan overdue                     # Run the overdue scan once now
//!   taskmaster tiers                            # Show the configured rate-limit tiers
//!   taskmaster check --client 10.0.0.1 --user u1 --tier task-creation --create-task

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskmaster_core::{Principal, Role, SystemClock, TaskmasterConfig};
use taskmaster_scheduler::{
    CronScheduler, DeadlineScanner, NotificationKind, SmtpMailer, SqliteStore, schedule_deadline_jobs,
    utc_offset,
};
use taskmaster_security::rate_limit::format_duration_secs;
use taskmaster_security::{
    GateDecision, GateRequest, QuotaPolicy, RateLimitDecision, RateLimiter, RequestGate, RouteSpec,
};

#[derive(Parser)]
#[command(
    name = "taskmaster",
    version,
    about = "⏰ TaskMaster: deadline notifications, rate limits and access policy"
)]
struct Cli {
    /// Config file (default: ~/.taskmaster/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daily reminder and overdue scans until Ctrl-C
    Run,
    /// Run one scan immediately
    Scan {
        /// reminders | overdue
        kind: NotificationKind,
        /// List candidates without sending or marking
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the rate-limit tier table
    Tiers,
    /// Evaluate the request gate once for a hypothetical request
    Check {
        /// Client identity used as the rate-limit key
        #[arg(long)]
        client: String,
        /// Authenticated user id (omit for an anonymous request)
        #[arg(long)]
        user: Option<String>,
        /// Rate-limit tier of the route
        #[arg(long, default_value = "general")]
        tier: String,
        /// Comma-separated roles the route requires
        #[arg(long, value_delimiter = ',')]
        require: Vec<Role>,
        /// Route creates a task (applies the quota)
        #[arg(long)]
        create_task: bool,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<TaskmasterConfig> {
    let config = match path {
        Some(p) => TaskmasterConfig::load_from(&expand_path(p))?,
        None => TaskmasterConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "taskmaster=debug,taskmaster_core=debug,taskmaster_security=debug,taskmaster_scheduler=debug"
    } else {
        "taskmaster=info,taskmaster_core=info,taskmaster_security=info,taskmaster_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run_daemon(&config).await,
        Command::Scan { kind, dry_run } => scan_once(&config, kind, dry_run).await,
        Command::Tiers => print_tiers(&config),
        Command::Check {
            client,
            user,
            tier,
            require,
            create_task,
        } => check_request(&config, &client, user.as_deref(), &tier, require, create_task),
    }
}

fn open_store(config: &TaskmasterConfig) -> Result<Arc<SqliteStore>> {
    let db_path = expand_path(&config.store.db_path);
    tracing::debug!("Opening store at {}", db_path.display());
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

fn build_scanner(config: &TaskmasterConfig, store: Arc<SqliteStore>) -> Result<DeadlineScanner> {
    let mailer = Arc::new(SmtpMailer::from_config(&config.smtp)?);
    let offset = utc_offset(config.scheduler.utc_offset_minutes)?;
    Ok(DeadlineScanner::new(
        store.clone(),
        store,
        mailer,
        Arc::new(SystemClock),
        offset,
    ))
}

async fn run_daemon(config: &TaskmasterConfig) -> Result<()> {
    let store = open_store(config)?;
    let scanner = Arc::new(build_scanner(config, store)?);

    let mut scheduler = CronScheduler::new(
        Arc::new(SystemClock),
        utc_offset(config.scheduler.utc_offset_minutes)?,
        std::time::Duration::from_secs(config.scheduler.check_interval_secs.max(1)),
    )
    .with_shutdown_grace(std::time::Duration::from_secs(config.scheduler.shutdown_grace_secs));
    schedule_deadline_jobs(&mut scheduler, scanner, &config.scheduler)?;
    for job in scheduler.jobs() {
        tracing::info!("✅ {} scheduled ({}), next run {:?}", job.name, job.expression, job.next_run);
    }

    let handle = scheduler.handle();
    let running = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down...");
    handle.stop();
    running.await?;
    Ok(())
}

async fn scan_once(config: &TaskmasterConfig, kind: NotificationKind, dry_run: bool) -> Result<()> {
    let store = open_store(config)?;
    let scanner = build_scanner(config, store)?;

    if dry_run {
        let tasks = scanner.preview(kind)?;
        println!("🧪 {} candidate(s) for {kind}:", tasks.len());
        for task in &tasks {
            let due = task.due_date.map(|d| d.to_rfc3339()).unwrap_or_default();
            println!("  - {} (owner: {}, due: {due})", task.title, task.owner_id);
        }
        return Ok(());
    }

    let report = scanner.run(kind).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_tiers(config: &TaskmasterConfig) -> Result<()> {
    println!(
        "Rate limiting: {}",
        if config.rate_limit.enabled { "enabled" } else { "disabled" }
    );
    for tier in &config.rate_limit.tiers {
        let bypass: Vec<&str> = tier.bypass_roles.iter().map(Role::as_str).collect();
        println!(
            "  {:<14} {:>4} / {:<10} bypass: {:<15} {}",
            tier.name,
            tier.limit,
            format_duration_secs(tier.window_secs),
            if bypass.is_empty() { "none".to_string() } else { bypass.join(",") },
            if tier.skip_successful { "(successful requests refunded)" } else { "" }
        );
    }
    Ok(())
}

fn check_request(
    config: &TaskmasterConfig,
    client: &str,
    user: Option<&str>,
    tier: &str,
    require: Vec<Role>,
    create_task: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let principal = match user {
        Some(id) => match store.user_role(id)? {
            Some(role) => Some(Principal::new(id, role)),
            None => {
                tracing::warn!("⚠️ User '{id}' not found; treating request as anonymous");
                None
            }
        },
        None => None,
    };

    let limiter = RateLimiter::from_config(&config.rate_limit, Arc::new(SystemClock))?;
    let gate = RequestGate::new(Arc::new(limiter), QuotaPolicy::from_config(&config.quota), store);

    let mut route = RouteSpec::new(tier).require(&require);
    if create_task {
        route = route.creating_task();
    }

    let decision = gate.check(&GateRequest {
        client,
        principal: principal.as_ref(),
        route: &route,
    })?;

    match decision {
        GateDecision::Allow(pass) => {
            println!("✅ 200 allowed");
            if let RateLimitDecision::Allow(allowance) = &pass.rate_limit {
                for (name, value) in allowance.headers() {
                    println!("  {name}: {value}");
                }
            }
            if let Some(count) = pass.task_count {
                println!("  active tasks: {count}");
            }
        }
        GateDecision::Deny(denial) => {
            println!("⛔ {} denied", denial.status_code());
            println!("{}", serde_json::to_string_pretty(&denial.body())?);
        }
    }
    Ok(())
}
