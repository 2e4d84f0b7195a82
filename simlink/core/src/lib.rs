//! Simlink Core - Step-Environment Driver for External Simulations
//!
//! This crate turns a real-time simulation process into a synchronous,
//! step-based environment. It launches the simulation, waits for it to
//! connect back over TCP, and exchanges length-prefixed JSON messages with
//! it behind a `reset` / `step` / `close` contract.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Caller                               │
//! │              reset(render) / step(actions) / close()          │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │                         Session                               │
//! │   state machine · seed generator · roster · episode metrics   │
//! │        │                                      │               │
//! │  ┌─────┴──────────────┐            ┌──────────┴───────────┐   │
//! │  │ ProcessSupervisor  │            │     TcpTransport      │   │
//! │  │ spawn / wait / kill│            │ listen · accept · I/O │   │
//! │  └─────┬──────────────┘            └──────────┬───────────┘   │
//! └────────┼──────────────────────────────────────┼───────────────┘
//!          │ spawns                               │ frames
//!          ▼                                      ▼
//!   ┌──────────────────────────────────────────────────────┐
//!   │                 Simulation process                    │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Session`]: owns the simulation and drives episodes
//! - [`SessionConfig`]: host, port, seed, render mode, deadlines
//! - [`LaunchSpec`]: executable, payload and extra arguments
//! - [`AgentAction`], [`AgentState`], [`AgentReward`]: per-agent views
//! - [`CancelHandle`]: abort a blocked accept or receive from another thread
//!
//! # Quick Start
//!
//! ```ignore
//! use simlink_core::{AgentAction, LaunchSpec, Session, SessionConfig};
//!
//! let launch = LaunchSpec::new("/opt/godot/godot", "/srv/envs/plane.pck");
//! let mut session = Session::new(SessionConfig::default(), launch);
//!
//! let states = session.reset(false)?;
//! let outcome = session.step(vec![AgentAction::new("Plane", 2)])?;
//! println!("{:?} done={}", outcome.rewards, outcome.done);
//! session.close()?;
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: framing codec, blocking TCP transport, cancellation
//! - [`messages`]: request/response types and the embedded-literal parser
//! - [`process`]: simulation process supervision
//! - [`session`]: the episode state machine
//! - [`metrics`]: per-episode auxiliary metrics
//! - [`config`]: TOML file and environment configuration
//!
//! # Blocking I/O
//!
//! Everything here blocks the calling thread. There is no async runtime and
//! no background thread.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod messages;
pub mod metrics;
pub mod process;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, SimlinkConfig,
};
pub use messages::{
    parse_literal, ActionError, ActionId, AgentAction, AgentReport, AgentReward, AgentState,
    LiteralError, Request, RequestEnvelope, Response,
};
pub use metrics::{EpisodeMetrics, MetricSample};
pub use process::{LaunchSpec, ProcessError, ProcessSupervisor, SimulationProcess};
pub use session::{
    ResetOptions, Session, SessionConfig, SessionError, SessionState, StepOutcome,
};
pub use transport::{CancelHandle, FrameError, TcpTransport, TransportConfig, TransportError};
