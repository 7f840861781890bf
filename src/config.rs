//! Configuration for logic-mcp.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file,
//! environment variables, command-line flags (applied by `main`).
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! mode = "http"
//! port = 8080
//! stateful = true
//!
//! [solver]
//! binary = "/usr/local/bin/swipl"
//! timeout_secs = 10
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "LOGIC_MCP_CONFIG";
/// Env var overriding `solver.binary`.
pub const SWIPL_ENV: &str = "LOGIC_MCP_SWIPL";
/// Env var overriding `server.port`.
pub const PORT_ENV: &str = "LOGIC_MCP_PORT";

/// Transport the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// JSON-RPC over stdin/stdout, one session for the process
    Stdio,
    /// JSON-RPC over HTTP POST /mcp
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker threads serving HTTP connections
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// HTTP only: keep one engine per `Mcp-Session-Id` instead of one per call
    #[serde(default)]
    pub stateful: bool,
    /// Stateful sessions unused this long are closed
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// SWI-Prolog executable, looked up on PATH unless it is a path
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Deadline for the solver work of one tool call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Where per-session scratch directories go (default: OS temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_mode() -> Mode {
    Mode::Stdio
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_workers() -> usize {
    8
}
fn default_session_idle_secs() -> u64 {
    30 * 60
}
fn default_binary() -> String {
    "swipl".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            stateful: false,
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_secs: default_timeout_secs(),
            temp_dir: None,
        }
    }
}

impl SolverConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl Config {
    /// Load configuration: explicit path, else `$LOGIC_MCP_CONFIG`, else the
    /// user config file if present, else defaults. Env overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(binary) = lookup(SWIPL_ENV).filter(|b| !b.is_empty()) {
            self.solver.binary = binary;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", PORT_ENV, port))?;
        }
        Ok(())
    }
}

/// User config file: `<config_dir>/logic-mcp/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("logic-mcp").join("config.toml"))
}
