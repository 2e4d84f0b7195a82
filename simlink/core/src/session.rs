//! Session Controller
//!
//! A [`Session`] turns a real-time simulation into a synchronous step
//! environment: `reset` starts an episode, `step` advances it, `close` shuts
//! everything down. The session exclusively owns the simulation process and
//! the socket to it.
//!
//! # State Machine
//!
//! ```text
//! Idle ──reset──► Launching ──► AwaitingConnection ──► Ready
//!                                                       │ ▲
//!                                         send request  ▼ │ response
//!                                               AwaitingResponse
//!
//! Ready ──close──► Closed (terminal)
//! ```
//!
//! Changing the render mode on `reset` while a simulation is running tears
//! the process and connection down (after sending a terminate request) and
//! relaunches both.

use std::fmt;
use std::net::SocketAddr;
use std::ops::Range;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::{
    ActionError, AgentAction, AgentReward, AgentState, Request, RequestEnvelope, Response,
};
use crate::metrics::EpisodeMetrics;
use crate::process::{LaunchSpec, ProcessError, ProcessSupervisor, SimulationProcess};
use crate::transport::{CancelHandle, TcpTransport, TransportConfig, TransportError};

/// Default listen host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 4242;

/// Range a session seed is drawn from when none is configured
pub const SESSION_SEED_RANGE: Range<u64> = 0..100_000;

/// Range per-episode seeds are drawn from
pub const EPISODE_SEED_RANGE: Range<u64> = 0..1_000_000;

// ============================================================================
// Configuration
// ============================================================================

/// Session configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Host the listener binds to
    pub host: String,

    /// Port the listener binds to (0 = any free port)
    pub port: u16,

    /// Session seed; drawn at random when `None`
    pub seed: Option<u64>,

    /// Render mode assumed before the first reset
    pub render: bool,

    /// Bounded process shutdown; `None` waits forever
    pub shutdown_timeout: Option<Duration>,

    /// Socket deadlines and limits
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            seed: None,
            render: true,
            shutdown_timeout: None,
            transport: TransportConfig::default(),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Session lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No simulation running
    Idle,
    /// Starting the simulation process
    Launching,
    /// Waiting for the simulation to connect
    AwaitingConnection,
    /// Connected, no request outstanding
    Ready,
    /// A request was sent and its response has not arrived
    AwaitingResponse,
    /// Shut down; terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::AwaitingConnection => "awaiting connection",
            Self::Ready => "ready",
            Self::AwaitingResponse => "awaiting response",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to the session caller
#[derive(Debug, Error)]
pub enum SessionError {
    /// Starting or stopping the simulation failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The socket failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The simulation sent something the protocol does not allow
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An action value could not be used
    #[error("invalid action for agent '{agent}': {reason}")]
    InvalidAction {
        /// Agent the action was for
        agent: String,
        /// Why it was rejected
        #[source]
        reason: ActionError,
    },

    /// The operation is not allowed in the current state
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },
}

// ============================================================================
// Call Types
// ============================================================================

/// Options for starting an episode
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResetOptions {
    /// Run the simulation with rendering
    pub render: bool,
    /// Episode seed; drawn from the session generator when `None`
    pub seed: Option<u64>,
    /// Free-form parameters forwarded in the init request
    pub params: Option<Map<String, Value>>,
}

impl ResetOptions {
    /// Options with the given render mode and nothing else
    #[must_use]
    pub fn new(render: bool) -> Self {
        Self {
            render,
            ..Self::default()
        }
    }

    /// Use a fixed episode seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Forward parameters to the simulation
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

/// Result of one step
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome {
    /// Per-agent states, in simulation order
    pub states: Vec<AgentState>,
    /// Per-agent rewards normalised by the frame count
    pub rewards: Vec<AgentReward>,
    /// Whether the episode ended
    pub done: bool,
    /// Frames simulated during the step
    pub n_frames: u32,
}

// ============================================================================
// Session
// ============================================================================

/// Synchronous step-environment driver for one simulation instance
#[derive(Debug)]
pub struct Session<P: SimulationProcess = ProcessSupervisor> {
    config: SessionConfig,
    process: P,
    transport: TcpTransport,
    state: SessionState,
    render: bool,
    seed: u64,
    rng: StdRng,
    roster: Vec<String>,
    metrics: EpisodeMetrics,
    last_episode_seed: Option<u64>,
}

impl Session<ProcessSupervisor> {
    /// Create a session that launches a real simulation executable
    #[must_use]
    pub fn new(config: SessionConfig, launch: LaunchSpec) -> Self {
        Self::with_process(config, ProcessSupervisor::new(launch))
    }
}

impl<P: SimulationProcess> Session<P> {
    /// Create a session over any [`SimulationProcess`]
    pub fn with_process(config: SessionConfig, process: P) -> Self {
        let seed = config
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(SESSION_SEED_RANGE));
        let transport = TcpTransport::new(config.transport.clone());
        tracing::debug!(seed, host = %config.host, port = config.port, "Session created");

        Self {
            render: config.render,
            config,
            process,
            transport,
            state: SessionState::Idle,
            seed,
            rng: StdRng::seed_from_u64(seed),
            roster: Vec::new(),
            metrics: EpisodeMetrics::new(),
            last_episode_seed: None,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current render mode
    #[must_use]
    pub fn render(&self) -> bool {
        self.render
    }

    /// Session seed
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed sent with the most recent init request
    #[must_use]
    pub fn last_episode_seed(&self) -> Option<u64> {
        self.last_episode_seed
    }

    /// Agent names reported at the last reset, in simulation order
    #[must_use]
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Metrics accumulated during the current episode
    #[must_use]
    pub fn metrics(&self) -> &EpisodeMetrics {
        &self.metrics
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Address the listener is bound to, while listening
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Whether a simulation process is owned
    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.process.is_launched()
    }

    /// Handle that aborts a blocked accept or receive from another thread
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.transport.cancel_handle()
    }

    /// Replace the session seed and restart the episode seed sequence
    pub fn set_seed(&mut self, seed: u64) {
        tracing::debug!(seed, "Session reseeded");
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Start a new episode with the given render mode
    ///
    /// # Errors
    ///
    /// See [`reset_with`](Self::reset_with).
    pub fn reset(&mut self, render: bool) -> Result<Vec<AgentState>, SessionError> {
        self.reset_with(ResetOptions::new(render))
    }

    /// Start a new episode
    ///
    /// Launches the simulation and waits for it to connect if needed, then
    /// sends an init request and returns the initial agent states.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] if closed or a response is pending
    /// - [`SessionError::Process`] if the simulation cannot be launched
    /// - [`SessionError::Transport`] if binding, accepting or the exchange fails
    pub fn reset_with(&mut self, options: ResetOptions) -> Result<Vec<AgentState>, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::AwaitingConnection | SessionState::Ready => {}
            state => {
                return Err(SessionError::InvalidState {
                    operation: "reset",
                    state,
                })
            }
        }

        let ResetOptions {
            render,
            seed,
            params,
        } = options;

        if render != self.render && self.process.is_launched() {
            tracing::info!(
                from = self.render,
                to = render,
                "Render mode changed, restarting simulation"
            );
            let shutdown = self.shutdown_simulation();
            self.transition(SessionState::Idle);
            shutdown?;
        }
        self.render = render;

        self.transition(SessionState::Launching);
        if let Err(e) = self.process.ensure_running(render) {
            self.transition(SessionState::Idle);
            return Err(e.into());
        }

        self.transition(SessionState::AwaitingConnection);
        self.open_connection()?;
        self.transition(SessionState::Ready);

        let seed = seed.unwrap_or_else(|| self.rng.gen_range(EPISODE_SEED_RANGE));
        let response = self.exchange(Request::Init { seed, params })?;

        self.last_episode_seed = Some(seed);
        self.roster = response.agent_names();
        self.metrics.clear();
        tracing::info!(seed, agents = ?self.roster, "Episode started");
        Ok(response.states())
    }

    /// Advance the simulation by one step
    ///
    /// Every action must name an agent reported at the last reset.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session is ready
    /// - [`SessionError::ProtocolViolation`] for unknown agents or a zero frame count
    /// - [`SessionError::Transport`] if the exchange fails
    pub fn step(&mut self, actions: Vec<AgentAction>) -> Result<StepOutcome, SessionError> {
        self.require_ready("step")?;

        if let Some(unknown) = actions.iter().find(|a| !self.roster.contains(&a.name)) {
            return Err(SessionError::ProtocolViolation(format!(
                "action for unknown agent '{}'",
                unknown.name
            )));
        }

        let response = self.exchange(Request::Action { actions })?;
        let n_frames = match response.n_frames {
            Some(n) if n > 0 => n,
            Some(_) => {
                return Err(SessionError::ProtocolViolation(
                    "step response reported zero frames".into(),
                ))
            }
            None => {
                return Err(SessionError::ProtocolViolation(
                    "step response is missing n_frames".into(),
                ))
            }
        };

        let (states, mut rewards) = response.split();
        let frames = f64::from(n_frames);
        for reward in &mut rewards {
            reward.reward /= frames;
        }
        self.metrics.record(&response);

        tracing::debug!(n_frames, done = response.done, "Step complete");
        Ok(StepOutcome {
            states,
            rewards,
            done: response.done,
            n_frames,
        })
    }

    /// Advance one step from loosely typed action values
    ///
    /// Each value must be an integer; `1.5` or `"2"` are rejected before
    /// anything is sent.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidAction`] for non-integer values, otherwise as [`step`](Self::step).
    pub fn step_values<I, S>(&mut self, actions: I) -> Result<StepOutcome, SessionError>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let actions = actions
            .into_iter()
            .map(|(name, value)| {
                let name = name.into();
                AgentAction::from_value(name.clone(), &value)
                    .map_err(|reason| SessionError::InvalidAction {
                        agent: name,
                        reason,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.step(actions)
    }

    /// Shut the simulation down and release the socket
    ///
    /// Sends a terminate request, closes the connection and waits for the
    /// process to exit. Closing an idle or closed session only marks it closed.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] while launching or awaiting a response
    /// - [`SessionError::Transport`] or [`SessionError::Process`] if shutdown
    ///   fails; the socket is released and the session is closed regardless
    pub fn close(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Idle | SessionState::AwaitingConnection | SessionState::Ready => {}
            state => {
                return Err(SessionError::InvalidState {
                    operation: "close",
                    state,
                })
            }
        }

        let shutdown = self.shutdown_simulation();
        self.roster.clear();
        self.transition(SessionState::Closed);
        tracing::info!("Session closed");
        shutdown
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Session state change");
            self.state = next;
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn open_connection(&mut self) -> Result<(), SessionError> {
        if self.transport.is_connected() {
            return Ok(());
        }
        if !self.transport.is_listening() {
            self.transport.listen(&self.config.host, self.config.port)?;
        }
        self.transport.accept_once()?;
        Ok(())
    }

    /// One request/response turn
    ///
    /// On failure the session stays in `AwaitingResponse`: the stream
    /// position is unknown and the session cannot be reused.
    fn exchange(&mut self, request: Request) -> Result<Response, SessionError> {
        let envelope = RequestEnvelope::new(request, self.render);
        tracing::debug!(kind = envelope.request.kind(), render = self.render, "Sending request");
        tracing::trace!(request = ?envelope, "Request body");

        self.transition(SessionState::AwaitingResponse);
        self.transport.send(&envelope)?;
        let response: Response = self.transport.receive()?;
        self.transition(SessionState::Ready);

        tracing::debug!(agents = response.states_data.len(), "Response received");
        tracing::trace!(response = ?response, "Response body");
        Ok(response)
    }

    /// Terminate request, socket teardown, process exit
    ///
    /// The socket and the process are released even when the terminate
    /// request cannot be delivered; the first error is returned afterwards.
    fn shutdown_simulation(&mut self) -> Result<(), SessionError> {
        let connected = self.transport.is_connected();
        let mut send_error = None;
        if connected {
            let envelope = RequestEnvelope::new(Request::Terminate, self.render);
            tracing::debug!(render = self.render, "Sending terminate request");
            if let Err(e) = self.transport.send(&envelope) {
                tracing::warn!(error = %e, "Terminate request not delivered");
                send_error = Some(e);
            }
        }
        let told_to_stop = connected && send_error.is_none();
        self.transport.teardown();

        let stopped = if self.process.is_launched() {
            let result = match (told_to_stop, self.config.shutdown_timeout) {
                (true, None) => self.process.terminate(),
                (true, Some(timeout)) => self.process.terminate_within(timeout),
                // Not connected or unreachable: it cannot be asked to stop
                (false, _) => {
                    tracing::warn!("Simulation cannot be asked to stop, killing it");
                    self.process.terminate_within(Duration::ZERO)
                }
            };
            tracing::info!("Simulation stopped");
            result
        } else {
            Ok(())
        };

        if let Some(e) = send_error {
            return Err(e.into());
        }
        Ok(stopped?)
    }
}
