//! Setup shared by the deskpilot binaries: logging, configuration, and
//! agent construction.

use std::path::PathBuf;

use clap::Args;
use deskpilot_core::{platform, Agent, AgentConfig, AutomationError};
use tracing_subscriber::EnvFilter;

/// Flags every binary accepts.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the run audit directory
    #[arg(long, global = true)]
    pub runs_dir: Option<PathBuf>,
}

/// Log to stderr so stdout stays free for output.  `RUST_LOG` wins over
/// `--verbose`.  Also routes `log` records from the core.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load the configuration, apply overrides, and build a native agent.
pub fn build_agent(args: &CommonArgs) -> Result<Agent, AutomationError> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(dir) = &args.runs_dir {
        config = config.with_runs_dir(dir);
    }

    if !platform::enable_per_monitor_dpi_awareness() {
        log::debug!("DPI awareness: {}", platform::dpi_awareness_mode());
    }
    Ok(Agent::native(config))
}
