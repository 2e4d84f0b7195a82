//! Simlink Runner - Random-Policy Episode Driver
//!
//! Launches a simulation through `simlink-core` and plays episodes with a
//! uniformly random discrete policy. Useful to smoke-test a simulation build
//! and its wire protocol.
//!
//! # Usage
//!
//! ```bash
//! # Paths from the config file
//! simlink-runner
//!
//! # Explicit paths, headless, three episodes
//! simlink-runner --executable /opt/godot/godot --payload envs/plane.pck \
//!     --headless --episodes 3
//!
//! # Verbose logging
//! RUST_LOG=simlink_core=debug simlink-runner
//! ```

mod episode;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use simlink_core::{default_config_path, load_config_from_path, ConfigOverrides, Session};
use tracing::{info, warn};

use episode::{run_episode, RandomPolicy};

/// Simlink Runner - drive a simulation with a random policy
#[derive(Parser, Debug)]
#[command(name = "simlink-runner")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SIMLINK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Simulation executable
    #[arg(long, value_name = "PATH")]
    executable: Option<PathBuf>,

    /// Packaged environment passed via --main-pack
    #[arg(long, value_name = "PATH")]
    payload: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Session seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run with rendering
    #[arg(long, conflicts_with = "headless")]
    render: bool,

    /// Run without rendering
    #[arg(long)]
    headless: bool,

    /// Number of episodes to play
    #[arg(short = 'n', long, default_value_t = 1)]
    episodes: u32,

    /// Step limit per episode
    #[arg(long, default_value_t = 1000)]
    max_steps: u64,

    /// Size of the discrete action space
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    actions: u32,

    /// How long to wait for the simulation to connect, in milliseconds
    #[arg(long, value_name = "MS")]
    accept_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SIMLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let render = match (self.render, self.headless) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        ConfigOverrides {
            executable: self.executable.clone(),
            payload: self.payload.clone(),
            host: self.host.clone(),
            port: self.port,
            seed: self.seed,
            render,
            accept_timeout: self.accept_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("simlink_runner={level},simlink_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Simlink runner starting");

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command-line override")?;
    info!(source = %config.source, "Configuration resolved");

    let launch = config
        .launch_spec()
        .context("Simulation executable and payload are required (--executable, --payload)")?;
    let render = config.session.render;
    info!(command = %launch.command_line(render), "Launch command");

    let mut session = Session::new(config.session.clone(), launch);
    let mut policy = RandomPolicy::new(args.actions, session.seed());
    info!(seed = session.seed(), episodes = args.episodes, "Session ready");

    for episode in 1..=args.episodes {
        let summary = run_episode(&mut session, &mut policy, render, args.max_steps)
            .with_context(|| format!("Episode {episode} failed"))?;

        if !summary.done {
            warn!(episode, max_steps = args.max_steps, "Episode hit the step limit");
        }
        info!(
            episode,
            steps = summary.steps,
            done = summary.done,
            returns = ?summary.returns,
            metrics = %summary.metrics,
            "Episode finished"
        );
    }

    session.close().context("Failed to close session")?;
    info!("Simlink runner finished");
    Ok(())
}
