use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Cli;
use cli::commands::{Commands, RunArgs};
use privloop::audit::AuditLog;
use privloop::config::{Config, Provider};
use privloop::domain::{RunReport, TerminationReason};
use privloop::llm::{AnthropicClient, ClientSettings, LlmClient, OpenAiClient};
use privloop::recon::{RawReconOutput, parse_with_stats};
use privloop::runner::RunLoop;
use privloop::session::SshTransport;

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("privloop")
        .join("logs")
}

fn setup_logging(log_dir: &Path, file_name: &str, verbose: bool) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join(file_name);

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(log_file)
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Run report".bold());
    println!("  run id:      {}", report.run_id);
    println!("  target:      {}", report.target);

    let reason = report.reason.to_string();
    let reason = match &report.reason {
        TerminationReason::Achieved => reason.green().bold(),
        TerminationReason::InternalFault(_) => reason.red().bold(),
        TerminationReason::ConnectFailed | TerminationReason::ReconUnavailable => reason.red(),
        _ => reason.yellow(),
    };
    println!("  outcome:     {}", reason);
    println!("  iterations:  {}", report.iterations);
    println!(
        "  actions:     {} executed, {} refused, {} duplicates skipped",
        report.executed, report.refused, report.duplicates
    );
    if let Some(command) = &report.achieved_by {
        println!("  achieved by: {}", command.green());
    }
    if let Some(profile) = &report.profile {
        println!(
            "  profile:     {} / {} / kernel {} / {}",
            profile.hostname, profile.os, profile.kernel, profile.id
        );
    }
    if let Some(path) = &report.audit_path {
        println!("  audit trail: {}", path.display());
    }
}

async fn execute_run<L: LlmClient + 'static>(config: Config, llm: Arc<L>, verbose: bool) -> Result<RunReport> {
    let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
    let run_loop = RunLoop::new(config, SshTransport::new(), llm).context("Failed to prepare run")?;

    let log_file = setup_logging(&log_dir, &format!("privloop-{}.log", run_loop.run_id()), verbose)
        .context("Failed to setup logging")?;

    println!("{} {}", "Run".cyan().bold(), run_loop.run_id());
    println!("  log:   {}", log_file.display());
    println!("  audit: {}", run_loop.audit_path().display());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("{}", "Interrupt received, stopping run...".yellow());
            on_signal.cancel();
        }
    });

    Ok(run_loop.run(cancel).await)
}

async fn handle_run_command(args: &RunArgs, mut config: Config, verbose: bool) -> Result<RunReport> {
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let settings = ClientSettings::from_config(&config.llm);
    let key_env = config.llm.effective_api_key_env();
    println!(
        "{} {} via {}",
        "Target".cyan().bold(),
        config.target.label(),
        settings.model
    );

    match config.llm.provider {
        Provider::Openai => {
            let client = OpenAiClient::from_env(&key_env, settings).context("Failed to create OpenAI client")?;
            execute_run(config, Arc::new(client), verbose).await
        }
        Provider::Anthropic => {
            let client =
                AnthropicClient::from_env(&key_env, settings).context("Failed to create Anthropic client")?;
            execute_run(config, Arc::new(client), verbose).await
        }
    }
}

fn handle_findings_command(file: &Path) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let raw = RawReconOutput::new(String::from_utf8_lossy(&bytes).into_owned(), false);
    let (findings, stats) = parse_with_stats(&raw);

    for (index, finding) in findings.ranked() {
        let confidence = if finding.is_confirmed() {
            "confirmed".red().bold()
        } else {
            "possible".yellow()
        };
        println!(
            "[{}] {} ({}) line {}: {}",
            index,
            finding.category.label().bold(),
            confidence,
            finding.line,
            finding.evidence
        );
    }

    println!();
    println!(
        "{} findings ({} confirmed) from {} lines in {} sections",
        findings.len(),
        findings.confirmed_count(),
        stats.total_lines,
        stats.sections
    );
    if stats.is_degraded() {
        println!(
            "{} {} dropped lines, invalid utf-8: {}",
            "Parse degraded:".yellow(),
            stats.dropped_lines,
            stats.invalid_utf8
        );
    }
    Ok(())
}

fn handle_verify_audit_command(file: &Path) -> Result<()> {
    let records = AuditLog::verify(file).with_context(|| format!("Audit trail {} failed verification", file.display()))?;
    println!("{} {} records, hash chain intact", "Verified:".green(), records);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match &cli.command {
        Commands::Run(args) => {
            let report = handle_run_command(args, config, cli.is_verbose())
                .await
                .context("Run failed")?;
            print_report(&report);
            if report.reason.is_fault() {
                std::process::exit(1);
            }
        }
        Commands::Findings { file } => {
            let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
            setup_logging(&log_dir, "privloop.log", cli.is_verbose()).context("Failed to setup logging")?;
            handle_findings_command(file)?;
        }
        Commands::VerifyAudit { file } => {
            let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
            setup_logging(&log_dir, "privloop.log", cli.is_verbose()).context("Failed to setup logging")?;
            handle_verify_audit_command(file)?;
        }
    }

    Ok(())
}
