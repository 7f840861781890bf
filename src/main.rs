use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use logic_mcp::config::{Config, Mode};
use logic_mcp::mcp::{http, stdio};
use logic_mcp::prolog::CancelToken;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "MCP server exposing SWI-Prolog reasoning tools", long_about = None)]
struct Cli {
    /// Config file (default: $LOGIC_MCP_CONFIG, then the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transport to serve on
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// HTTP bind host
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// HTTP worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// HTTP: keep one engine per Mcp-Session-Id
    #[arg(long)]
    stateful: bool,

    /// HTTP: close sessions idle this many seconds
    #[arg(long)]
    session_idle_secs: Option<u64>,

    /// SWI-Prolog executable
    #[arg(long)]
    swipl: Option<String>,

    /// Solver deadline per tool call, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log filter when RUST_LOG is unset (e.g. "debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.server.mode = mode;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(workers) = self.workers {
            config.server.workers = workers;
        }
        if self.stateful {
            config.server.stateful = true;
        }
        if let Some(secs) = self.session_idle_secs {
            config.server.session_idle_secs = secs;
        }
        if let Some(swipl) = self.swipl {
            config.solver.binary = swipl;
        }
        if let Some(secs) = self.timeout_secs {
            config.solver.timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    // stdout belongs to the protocol in stdio mode
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .context("Failed to install signal handler")?;
    }
    let shutdown = CancelToken::from_flag(flag);

    tracing::info!(
        mode = ?config.server.mode,
        solver = %config.solver.binary,
        timeout_secs = config.solver.timeout_secs,
        "starting logic-mcp"
    );

    match config.server.mode {
        Mode::Stdio => stdio::run(&config, shutdown),
        Mode::Http => http::run(&config, shutdown),
    }
}
