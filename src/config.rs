//! Run configuration
//!
//! Every setting a run needs is carried in an explicit `Config` passed to the
//! orchestrator. Nothing is read from process-wide state after loading, so
//! runs in the same process stay isolated.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PrivloopError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_dir: Option<PathBuf>,
    pub target: TargetConfig,
    pub llm: LlmConfig,
    pub recon: ReconConfig,
    pub policy: PolicyConfig,
    pub reasoner: ReasonerConfig,
    pub audit: AuditConfig,
}

/// Credential supplied for the remote session
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
}

impl Credential {
    /// Kind label safe to log or audit
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::KeyFile(_) => "key",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            key_file: None,
            connect_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl TargetConfig {
    /// The single credential configured for this target
    pub fn credential(&self) -> Result<Credential> {
        match (&self.password, &self.key_file) {
            (Some(_), Some(_)) => Err(PrivloopError::Config(
                "provide either a password or a key file, not both".to_string(),
            )),
            (Some(password), None) => Ok(Credential::Password(password.clone())),
            (None, Some(path)) => Ok(Credential::KeyFile(path.clone())),
            (None, None) => Err(PrivloopError::Config(
                "a password or a key file is required".to_string(),
            )),
        }
    }

    /// `user@host:port` label used in logs and reports
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Openai => "gpt-4",
            Provider::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Empty means the provider's default model
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Environment variable holding the API key; empty means the provider default
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Openai,
            model: String::new(),
            max_tokens: 4096,
            timeout_secs: 120,
            temperature: 0.3,
            api_key_env: String::new(),
        }
    }
}

impl LlmConfig {
    pub fn effective_model(&self) -> String {
        if self.model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.model.clone()
        }
    }

    pub fn effective_api_key_env(&self) -> String {
        if self.api_key_env.is_empty() {
            self.provider.default_api_key_env().to_string()
        } else {
            self.api_key_env.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Local enumeration script uploaded once per run
    pub local_script: Option<PathBuf>,
    pub remote_path: String,
    pub interpreter: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Consecutive recon failures before giving up
    pub failure_threshold: u32,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            local_script: None,
            remote_path: "/tmp/linpeas.sh".to_string(),
            interpreter: "sh".to_string(),
            args: vec!["-a".to_string()],
            timeout_secs: 900,
            max_output_bytes: 4 * 1024 * 1024,
            failure_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_iterations: u32,
    /// Operator authorization for destructive-tier actions
    pub allow_destructive: bool,
    /// Allow re-running a literal command already in history
    pub force_repeat: bool,
    pub action_timeout_secs: u64,
    pub max_captured_output: usize,
    /// Effective uid that counts as escalated when the post-action identity check reports it
    pub escalated_uid: u32,
    pub success_markers: Vec<String>,
    pub destructive_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            allow_destructive: false,
            force_repeat: false,
            action_timeout_secs: 120,
            max_captured_output: 64 * 1024,
            escalated_uid: 0,
            success_markers: vec![r"uid=0".to_string(), r"\(root\)".to_string(), r"root@".to_string()],
            destructive_patterns: vec![
                r"\brm\s+-[a-zA-Z]*[rf]".to_string(),
                r"\bmkfs(\.\w+)?\b".to_string(),
                r"\bdd\b.*\bof=/dev/".to_string(),
                r"\b(shutdown|reboot|halt|poweroff)\b".to_string(),
                r":\(\)\s*\{".to_string(),
                r"\bchmod\s+-R\s+[0-7]*7{3}\s+/(\s|$)".to_string(),
                r">\s*/etc/(passwd|shadow|sudoers)\b".to_string(),
                r"\buserdel\b".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Number of most recent iterations included as context
    pub history_window: usize,
    pub max_context_chars: usize,
    pub max_findings: usize,
    pub max_evidence_chars: usize,
    pub max_output_excerpt: usize,
    /// Extra attempts after an empty plan or service error
    pub retries: u32,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            history_window: 4,
            max_context_chars: 12_000,
            max_findings: 40,
            max_evidence_chars: 240,
            max_output_excerpt: 600,
            retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("privloop")
                .join("audit"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Check the settings a run cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.target.host.trim().is_empty() {
            return Err(PrivloopError::Config("target host is required".to_string()));
        }
        if self.target.username.trim().is_empty() {
            return Err(PrivloopError::Config("target username is required".to_string()));
        }
        validate_host(&self.target.host)?;
        validate_username(&self.target.username)?;
        if self.target.port == 0 {
            return Err(PrivloopError::Config("target port must be non-zero".to_string()));
        }
        self.target.credential()?;
        if self.policy.max_iterations == 0 {
            return Err(PrivloopError::Config("max_iterations must be at least 1".to_string()));
        }
        if self.recon.failure_threshold == 0 {
            return Err(PrivloopError::Config("recon failure_threshold must be at least 1".to_string()));
        }
        for pattern in self
            .policy
            .success_markers
            .iter()
            .chain(&self.policy.destructive_patterns)
        {
            regex::Regex::new(pattern)
                .map_err(|e| PrivloopError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
        }
        Ok(())
    }
}

/// Hostname or IP literal; nothing a shell or option parser could read as syntax
pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() || host.len() > 253 {
        return Err(PrivloopError::Config("invalid target host: length out of bounds".to_string()));
    }
    if host.starts_with('-') {
        return Err(PrivloopError::Config("invalid target host: leading '-'".to_string()));
    }
    let valid_chars = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ':');
    if !valid_chars {
        return Err(PrivloopError::Config(format!(
            "invalid target host '{}': contains illegal characters",
            host
        )));
    }
    Ok(())
}

/// Login name: alphanumerics, underscore, hyphen and dot
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 32 {
        return Err(PrivloopError::Config("invalid target username: length out of bounds".to_string()));
    }
    if username.starts_with('-') {
        return Err(PrivloopError::Config("invalid target username: leading '-'".to_string()));
    }
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid_chars {
        return Err(PrivloopError::Config(format!(
            "invalid target username '{}': contains illegal characters",
            username
        )));
    }
    Ok(())
}
