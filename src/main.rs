// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! agentmeter main entry point - reports, pricing queries and backfill.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use uuid::Uuid;

use agentmeter::config::{self, CliOverrides, MetricsConfig};
use agentmeter::cost::{format_cost, TokenUsage};
use agentmeter::ingest::{publish_parsed, read_debug_log, replay_log};
use agentmeter::metrics::{ExportFormat, ExportOptions, MetricsApi};
use agentmeter::telemetry::{init_telemetry, TelemetryConfig};
use agentmeter::{EventBus, RelationalSink, StreamingSink, VERSION};

/// agentmeter - telemetry for autonomous coding-agent sessions.
#[derive(Parser)]
#[command(name = "agentmeter")]
#[command(author, version, about = "Telemetry for autonomous coding-agent sessions", long_about = None)]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "AGENTMETER_DB", global = true)]
    db: Option<PathBuf>,

    /// Directory for JSONL logs
    #[arg(long, env = "AGENTMETER_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Workspace root used to find config files (defaults to the nearest directory with one)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text", global = true)]
    output_format: OutputFormat,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Show debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for report commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize one session
    Summary {
        session: String,
    },

    /// List iterations with derived metrics
    Iterations {
        /// Only iterations of this session
        session: Option<String>,
    },

    /// Show the latest iteration of a session
    Progress {
        session: String,
    },

    /// Export a session as JSON or CSV
    Export {
        session: String,
        /// json or csv
        #[arg(long, default_value = "json")]
        format: String,
        /// Leave per-iteration rows out of JSON exports
        #[arg(long)]
        no_iterations: bool,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Price one usage
    Cost {
        model: String,
        prompt_tokens: u64,
        completion_tokens: u64,
    },

    /// Price one usage against several models
    Compare {
        prompt_tokens: u64,
        completion_tokens: u64,
        /// Models to compare
        #[arg(required = true, num_args = 1..)]
        models: Vec<String>,
    },

    /// Show the pricing table
    Pricing,

    /// Analyze a JSONL event log
    Analyze {
        path: PathBuf,
    },

    /// Replay a JSONL event log into the database
    Replay {
        path: PathBuf,
        /// Print per-sink delivery statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Ingest an agent CLI debug log as events of one iteration
    Ingest {
        path: PathBuf,
        /// Session id (defaults to the log's thread id, or a fresh id)
        #[arg(long)]
        session: Option<String>,
        /// Iteration id (defaults to a fresh id)
        #[arg(long)]
        iteration: Option<String>,
        /// Iteration number within the session
        #[arg(long, default_value_t = 1)]
        iteration_number: u32,
        /// Model used to price the recovered token usage
        #[arg(long)]
        model: Option<String>,
        /// Print per-sink delivery statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose, cli.debug))?;

    let workspace_root = match &cli.workspace {
        Some(root) => root.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            config::find_workspace_root(&cwd).unwrap_or(cwd)
        }
    };
    let overrides = CliOverrides {
        db_path: cli.db.clone(),
        log_dir: cli.log_dir.clone(),
        ..Default::default()
    };
    let config = config::load_config(&workspace_root, overrides)?;

    handle_command(cli.command, &config, cli.output_format).await
}

async fn handle_command(command: Commands, config: &MetricsConfig, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Summary { session } => {
            let api = open_api(config)?;
            let summary = api.session_summary(&session).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("{}", format!("Session {}", summary.session_id).bright_blue().bold());
            let counts = &summary.iterations;
            println!(
                "Iterations: {} ({} success, {} failed, {} awaiting input, {} running)",
                counts.total.to_string().bright_white(),
                counts.success.to_string().green(),
                counts.failed.to_string().red(),
                counts.awaiting_input,
                counts.running
            );
            println!("Duration:   {} ms", summary.total_duration_ms);
            println!(
                "Tokens:     {} ({} prompt / {} completion) over {} LLM calls",
                summary.tokens.total_tokens, summary.tokens.prompt_tokens, summary.tokens.completion_tokens,
                summary.llm_calls
            );
            println!(
                "Cost:       {} ({} LLM + {} tools)",
                format_cost(summary.total_cost_usd).bright_yellow(),
                format_cost(summary.llm_cost_usd),
                format_cost(summary.tool_cost_usd)
            );
            if !summary.cost_by_model.is_empty() {
                println!("\n{}", "## Cost by model".bright_cyan());
                for (model, cost) in &summary.cost_by_model {
                    println!("  {:<36} {}", model, format_cost(*cost));
                }
            }
            if !summary.tool_usage.is_empty() {
                println!("\n{}", "## Tools".bright_cyan());
                for tool in &summary.tool_usage {
                    println!(
                        "  {:<24} {:>5} calls  {:>5.1}% ok  {:>8.1} ms avg",
                        tool.tool_name,
                        tool.calls,
                        tool.success_rate * 100.0,
                        tool.avg_duration_ms
                    );
                }
            }
            if !summary.file_edits.is_empty() {
                println!("\n{}", "## Files".bright_cyan());
                for edit in &summary.file_edits {
                    println!(
                        "  {} ({} edits, {}, {})",
                        edit.file_path,
                        edit.edits,
                        format!("+{}", edit.lines_added).green(),
                        format!("-{}", edit.lines_removed).red()
                    );
                }
            }
            let tests = &summary.tests;
            if tests.runs > 0 {
                println!(
                    "\nTests: {} runs, {} passed, {} failed, {} skipped",
                    tests.runs, tests.passed, tests.failed, tests.skipped
                );
            }
            let git = &summary.git;
            if git.operations > 0 {
                println!(
                    "Git:   {} operations ({} failed, {} conflicts), {} files, +{} -{}",
                    git.operations, git.failures, git.conflicts, git.files_changed, git.insertions, git.deletions
                );
            }
        }
        Commands::Iterations { session } => {
            let api = open_api(config)?;
            let rows = match &session {
                Some(session) => api.iteration_metrics(session).await?,
                None => api.all_iteration_metrics().await?,
            };
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("{}", "No iterations recorded".dimmed());
                return Ok(());
            }
            for row in rows {
                let status = match row.status.as_deref() {
                    Some("success") => "success".green(),
                    Some("failed") => "failed".red(),
                    Some(other) => other.yellow(),
                    None => "running".cyan(),
                };
                println!(
                    "{} #{:<3} {:<10} {:>7} tok  {:>10}  {:>3} tools ({:.0}% ok)  +{} -{}",
                    row.iteration_id.bright_white(),
                    row.iteration_number,
                    status,
                    row.total_tokens,
                    format_cost(row.cost_usd),
                    row.tool_calls,
                    row.tool_success_rate * 100.0,
                    row.loc_added,
                    row.loc_deleted
                );
            }
        }
        Commands::Progress { session } => {
            let api = open_api(config)?;
            let Some(progress) = api.session_progress(&session).await? else {
                println!("{}", format!("No iterations for session {}", session).dimmed());
                return Ok(());
            };
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
                return Ok(());
            }
            let latest = &progress.latest_iteration;
            println!("{}", format!("Session {}", progress.session_id).bright_blue().bold());
            println!(
                "Iterations: {} started, {} finished",
                progress.iterations_started, progress.iterations_finished
            );
            println!(
                "Latest:     #{} {} ({})",
                latest.iteration_number,
                latest.id.bright_white(),
                latest.status.as_deref().unwrap_or("running")
            );
            println!("Cost:       {}", format_cost(latest.total_cost_usd));
        }
        Commands::Export {
            session,
            format: export_format,
            no_iterations,
            output,
        } => {
            let api = open_api(config)?;
            let options = ExportOptions {
                format: export_format.parse::<ExportFormat>()?,
                include_iterations: !no_iterations,
            };
            let exported = api.export_metrics(&session, &options).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, exported)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported {} to {}", session, path.display());
                }
                None => println!("{}", exported),
            }
        }
        Commands::Cost {
            model,
            prompt_tokens,
            completion_tokens,
        } => {
            let calculator = config.build_calculator()?;
            let cost = calculator.calculate_cost(&TokenUsage::new(model, prompt_tokens, completion_tokens));
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&cost)?);
                return Ok(());
            }
            println!(
                "{} {}",
                cost.model.bright_white(),
                format_cost(cost.total_cost).bright_yellow().bold()
            );
            println!(
                "  prompt {}  completion {}",
                format_cost(cost.prompt_cost),
                format_cost(cost.completion_cost)
            );
            if cost.used_fallback() {
                println!("{}", "  priced with the fallback entry (model not in table)".dimmed());
            }
        }
        Commands::Compare {
            prompt_tokens,
            completion_tokens,
            models,
        } => {
            let calculator = config.build_calculator()?;
            let usage = TokenUsage::new("", prompt_tokens, completion_tokens);
            let names: Vec<&str> = models.iter().map(String::as_str).collect();
            let comparison = calculator.compare_models(&usage, &names);
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&comparison)?);
                return Ok(());
            }
            println!(
                "{}",
                format!("{} prompt + {} completion tokens", prompt_tokens, completion_tokens)
                    .bright_blue()
                    .bold()
            );
            for entry in comparison {
                println!(
                    "  {:<36} {:>10}  saves {} ({:.1}%)",
                    entry.model,
                    format_cost(entry.cost.total_cost),
                    format_cost(entry.savings),
                    entry.savings_percent
                );
            }
        }
        Commands::Pricing => {
            let calculator = config.build_calculator()?;
            let mut models = calculator.list_models();
            models.sort_by(|a, b| a.name.cmp(&b.name));
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&models)?);
                return Ok(());
            }
            println!("{}", "Pricing (USD per 1k tokens)".bright_blue().bold());
            for model in models {
                println!(
                    "  {:<36} prompt {:>8.4}  completion {:>8.4}",
                    model.name, model.prompt_price_per_1k, model.completion_price_per_1k
                );
            }
        }
        Commands::Analyze { path } => {
            let events = StreamingSink::read_all_events(&path).await?;
            let analytics = StreamingSink::analyze_events(&events);
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&analytics)?);
                return Ok(());
            }
            println!(
                "{}",
                format!("{} events in {}", analytics.total_events, path.display())
                    .bright_blue()
                    .bold()
            );
            let mut kinds: Vec<_> = analytics.events_by_kind.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                println!("  {:<28} {}", kind, count);
            }
            let mut sessions: Vec<_> = analytics.sessions.iter().collect();
            sessions.sort_by(|a, b| a.0.cmp(b.0));
            for (session, totals) in sessions {
                println!(
                    "\n{} {} iterations, {} LLM calls, {} tool calls, {} recorded",
                    session.bright_white(),
                    totals.iterations,
                    totals.llm_calls,
                    totals.tool_calls,
                    format_cost(totals.recorded_llm_cost_usd)
                );
            }
            let mut tools: Vec<_> = analytics.tools.iter().collect();
            tools.sort_by(|a, b| b.1.calls.cmp(&a.1.calls).then(a.0.cmp(b.0)));
            if !tools.is_empty() {
                println!("\n{}", "## Tools".bright_cyan());
                for (name, counts) in tools {
                    println!(
                        "  {:<24} {:>5} calls  {:>5.1}% ok",
                        name,
                        counts.calls,
                        counts.success_rate() * 100.0
                    );
                }
            }
        }
        Commands::Replay { path, stats } => {
            let calculator = Arc::new(config.build_calculator()?);
            let sink = RelationalSink::open(&config.db_path)
                .with_context(|| format!("opening {}", config.db_path.display()))?
                .with_calculator(calculator);
            let bus = EventBus::new().with_sink(Arc::new(sink));
            let report = replay_log(&path, &bus).await?;
            bus.close().await;
            if stats {
                eprint!("{}", bus.metrics().snapshot().format_report());
            }
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "Replayed {} events into {} ({} skipped, {} partial failures)",
                report.published.to_string().green(),
                config.db_path.display(),
                report.skipped,
                report.partial_failures
            );
        }
        Commands::Ingest {
            path,
            session,
            iteration,
            iteration_number,
            model,
            stats,
        } => {
            let parsed = read_debug_log(&path).await?;
            let session = session
                .or_else(|| parsed.thread_id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let iteration = iteration.unwrap_or_else(|| Uuid::new_v4().to_string());
            let pipeline = config.build_pipeline().await?;
            let report = publish_parsed(
                &parsed,
                &pipeline.bus,
                &session,
                &iteration,
                iteration_number,
                model.as_deref(),
            )
            .await;
            pipeline.shutdown().await;
            if stats {
                eprint!("{}", pipeline.bus.metrics().snapshot().format_report());
            }
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "Ingested {} tool calls and {} usage records from {}",
                report.tool_calls,
                report.llm_usage,
                path.display()
            );
            println!(
                "{}",
                format!("session {} iteration {} ({})", session, iteration, report.status.as_str()).dimmed()
            );
            if report.partial_failures > 0 {
                println!(
                    "{}",
                    format!("{} events rejected by a sink", report.partial_failures).yellow()
                );
            }
            if let Some(thread) = &report.thread_id {
                println!("{}", format!("thread {}", thread).dimmed());
            }
            if parsed.skipped_lines > 0 {
                println!("{}", format!("{} non-JSON lines skipped", parsed.skipped_lines).dimmed());
            }
        }
        Commands::Version => {
            println!("agentmeter {}", VERSION);
        }
    }
    Ok(())
}

/// Open the configured database for reading.
fn open_api(config: &MetricsConfig) -> anyhow::Result<MetricsApi> {
    ensure_exists(&config.db_path)?;
    let calculator = Arc::new(config.build_calculator()?);
    let sink = RelationalSink::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?
        .with_calculator(calculator.clone());
    Ok(MetricsApi::new(Arc::new(sink), calculator))
}

fn ensure_exists(db_path: &Path) -> anyhow::Result<()> {
    if !db_path.exists() {
        anyhow::bail!(
            "no metrics database at {} (set --db or dbPath in .agentmeter.json)",
            db_path.display()
        );
    }
    Ok(())
}

