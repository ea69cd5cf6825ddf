//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: assess one target
//! - findings: parse a saved recon output offline
//! - verify-audit: check an audit trail's hash chain

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use privloop::config::{Config, Provider};

/// Privloop - iterative recon, reasoning and action against an authorized target
#[derive(Parser, Debug)]
#[command(name = "privloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assessment loop against one target
    Run(RunArgs),

    /// Parse a saved recon output and print the findings
    Findings {
        /// File holding raw enumeration output
        file: PathBuf,
    },

    /// Verify the hash chain of an audit trail
    VerifyAudit {
        /// Audit log (.jsonl) to verify
        file: PathBuf,
    },
}

/// Target and policy flags for `run`; each one overrides the config file
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Target host name or address
    #[arg(long)]
    pub host: Option<String>,

    /// Login user on the target
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password credential
    #[arg(long, conflicts_with = "key_file")]
    pub password: Option<String>,

    /// Private key credential
    #[arg(short, long)]
    pub key_file: Option<PathBuf>,

    /// SSH port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Iteration budget
    #[arg(short, long)]
    pub max_iterations: Option<u32>,

    /// Allow actions classified as destructive
    #[arg(long)]
    pub allow_destructive: bool,

    /// Allow re-running a command already in history
    #[arg(long)]
    pub force_repeat: bool,

    /// Local enumeration script to upload
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Reasoning service provider
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<Provider>,

    /// Model name for the reasoning service
    #[arg(long)]
    pub model: Option<String>,
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    match s.to_ascii_lowercase().as_str() {
        "openai" => Ok(Provider::Openai),
        "anthropic" => Ok(Provider::Anthropic),
        other => Err(format!("unknown provider '{}' (expected openai or anthropic)", other)),
    }
}

impl RunArgs {
    /// Layer the flags over a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.target.host = host.clone();
        }
        if let Some(user) = &self.user {
            config.target.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.target.password = Some(password.clone());
            config.target.key_file = None;
        }
        if let Some(key_file) = &self.key_file {
            config.target.key_file = Some(key_file.clone());
            config.target.password = None;
        }
        if let Some(port) = self.port {
            config.target.port = port;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.policy.max_iterations = max_iterations;
        }
        if self.allow_destructive {
            config.policy.allow_destructive = true;
        }
        if self.force_repeat {
            config.policy.force_repeat = true;
        }
        if let Some(script) = &self.script {
            config.recon.local_script = Some(script.clone());
        }
        if let Some(provider) = self.provider {
            if provider != config.llm.provider {
                // The configured model and key variable belong to the old provider
                config.llm.model.clear();
                config.llm.api_key_env.clear();
            }
            config.llm.provider = provider;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
    }
}
