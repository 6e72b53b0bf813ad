use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use testpilot::category::Category;
use testpilot::config::{Config, StorageBackend};
use testpilot::engine::{Engine, Pacing, RunRequest};
use testpilot::model::CaseStatus;
use testpilot::observer::{ChannelObserver, RunEvent};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "testpilot",
    about = "Staged website test runs with live progress and pass/fail reports",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the selected checks against a website
    Run {
        /// Website URL; https:// is assumed when no scheme is given
        url: String,

        /// Category to run (repeatable, in order). Defaults to all.
        #[arg(long = "category", short = 'c')]
        categories: Vec<Category>,

        /// Seed for reproducible simulated outcomes
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the artificial pauses between steps
        #[arg(long)]
        no_delay: bool,

        /// Keep results in memory only
        #[arg(long)]
        ephemeral: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// List registered projects
    Projects {
        #[arg(long)]
        json: bool,
    },

    /// List the available test categories
    Categories,

    /// Dashboard statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Custom test script helpers
    Script {
        #[command(subcommand)]
        action: ScriptAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List all runs
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show one run and its cases
    Show {
        /// Run id
        id: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ScriptAction {
    /// Write a script template to a file
    New {
        /// Template: default, login, form, navigation
        #[arg(long, default_value = "default")]
        template: String,

        /// Output file (.js or .ts)
        #[arg(long, default_value = testpilot::script::DEFAULT_FILE_NAME)]
        output: PathBuf,
    },

    /// Validate a script file name and read it
    Check {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.path = db;
    }
    testpilot::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting TestPilot API server");
            testpilot::serve(&config).await?;
        }
        Commands::Run {
            url,
            categories,
            seed,
            no_delay,
            ephemeral,
            json,
        } => {
            if seed.is_some() {
                config.execution.seed = seed;
            }
            if ephemeral {
                config.storage.backend = StorageBackend::Memory;
            }
            let pacing = if no_delay {
                Pacing::default()
            } else {
                testpilot::pacing(&config.execution)
            };
            let categories = if categories.is_empty() {
                Category::ALL.to_vec()
            } else {
                categories
            };
            run_once(&config, pacing, RunRequest::new(url, categories), json).await?;
        }
        Commands::Runs { action } => {
            let store = testpilot::storage::open(&config.storage)?;
            match action {
                RunsAction::List { json } => {
                    let runs = store.list_runs().await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&runs)?);
                    } else if runs.is_empty() {
                        println!("No runs found.");
                    } else {
                        println!("{:<36} | {:<10} | {:<25} | Cases", "Run", "Status", "Started");
                        println!("{:-<36}-|-{:-<10}-|-{:-<25}-|-{:-<5}", "", "", "", "");
                        for run in runs {
                            println!(
                                "{:<36} | {:<10} | {:<25} | {}",
                                run.id,
                                run.status,
                                run.start_time.to_rfc3339(),
                                run.test_cases.len()
                            );
                        }
                    }
                }
                RunsAction::Show { id, json } => {
                    let run = store.get_run(&id).await?;
                    let cases = store.list_cases_by_run(&id).await?;
                    if json {
                        let out = serde_json::json!({ "run": run, "cases": cases });
                        println!("{}", serde_json::to_string_pretty(&out)?);
                    } else {
                        println!("Run:     {}", run.id);
                        println!("Project: {}", run.project_id);
                        println!("Status:  {}", run.status);
                        println!("Started: {}", run.start_time.to_rfc3339());
                        if let Some(end) = run.end_time {
                            println!("Ended:   {}", end.to_rfc3339());
                        }
                        println!();
                        for case in cases {
                            println!("{} [{}] {}ms", case.name, case.status, case.duration);
                            for line in &case.logs {
                                println!("    {}", line);
                            }
                        }
                    }
                }
            }
            store.close().await?;
        }
        Commands::Projects { json } => {
            let store = testpilot::storage::open(&config.storage)?;
            let projects = store.list_projects().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects found.");
            } else {
                for p in projects {
                    println!("{} | {} | {} | {} run(s)", p.id, p.name, p.url, p.test_runs.len());
                }
            }
            store.close().await?;
        }
        Commands::Categories => {
            println!("{:<12} | {:<16} | Description", "Key", "Label");
            println!("{:-<12}-|-{:-<16}-|-{:-<32}", "", "", "");
            for c in testpilot::category::catalog() {
                println!("{:<12} | {:<16} | {}", c.key, c.label, c.description);
            }
        }
        Commands::Stats { json } => {
            let store = testpilot::storage::open(&config.storage)?;
            let stats = testpilot::projects::dashboard(store.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Projects:     {}", stats.total_projects);
                println!("Active runs:  {}", stats.active_runs);
                println!("Success rate: {}%", stats.success_rate);
            }
            store.close().await?;
        }
        Commands::Script { action } => match action {
            ScriptAction::New { template, output } => {
                let body = testpilot::script::template(&template)?;
                testpilot::script::save(&output, body)?;
                println!("Template '{}' written to {}", template, output.display());
            }
            ScriptAction::Check { file } => {
                let body = testpilot::script::load(&file)?;
                println!("{} OK ({} lines)", file.display(), body.lines().count());
            }
        },
    }

    Ok(())
}

/// Execute one run in the foreground, streaming its log to stdout.
async fn run_once(config: &Config, pacing: Pacing, request: RunRequest, json: bool) -> Result<()> {
    let store = testpilot::storage::open(&config.storage)?;
    let executor = testpilot::build_executor(&config.execution)?;
    let (observer, mut events) = ChannelObserver::new();
    let engine = Engine::new(store.clone(), executor)
        .with_pacing(pacing)
        .with_observer(Arc::new(observer));

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if json {
                continue;
            }
            match event {
                RunEvent::Log { entry, .. } => println!("{}", entry.message),
                RunEvent::Progress { percent, .. } => println!("    progress: {:.0}%", percent),
                RunEvent::CaseComplete { .. } | RunEvent::RunComplete { .. } => {}
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current category...");
            ctrl_c.cancel();
        }
    });

    let result = engine.run(request, cancel).await;
    drop(engine);
    let _ = printer.await;
    let summary = result.context("Test run failed")?;

    let cases = store.list_cases_by_run(&summary.run_id).await?;
    let project = testpilot::projects::register_completed_run(store.as_ref(), &summary).await?;

    if json {
        let out = serde_json::json!({ "summary": summary, "cases": cases, "project": project });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("\n=== TestPilot Report ===");
        println!("Target: {}", summary.target);
        println!("Status: {}", summary.status);
        println!("{:<20} | {:<6} | Duration", "Test", "Result");
        println!("{:-<20}-|-{:-<6}-|-{:-<10}", "", "", "");
        for case in &cases {
            let result = match case.status {
                CaseStatus::Pass => "PASS",
                CaseStatus::Fail => "FAIL",
            };
            println!("{:<20} | {:<6} | {}ms", case.name, result, case.duration);
        }
        println!(
            "\n{}/{} tests passed ({} failed)",
            summary.passed, summary.total, summary.failed
        );
        if let Some(p) = project {
            println!("Project: {} ({})", p.name, p.id);
        }
    }

    store.close().await?;
    Ok(())
}
