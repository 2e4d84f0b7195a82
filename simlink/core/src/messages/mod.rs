//! Simulation Messages
//!
//! Typed requests sent to the simulation and responses read back from it.
//!
//! # Wire Shapes
//!
//! Every request carries the same three flags so the simulation can dispatch
//! on them without a type tag:
//!
//! ```text
//! {"initialization": bool, "termination": bool, "render": bool,
//!  "seed"?: uint, "params"?: object, "actions_data"?: [{"name", "action"}]}
//! ```
//!
//! `seed` is present iff `initialization`; `params` only on initialization;
//! `actions_data` iff neither flag is set.
//!
//! Responses list one report per agent, in the order the simulation chose:
//!
//! ```text
//! {"states_data": [{"name", "state", "reward", "metrics"?}], "n_frames": uint, "done": bool}
//! ```

pub mod literal;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use literal::{parse_literal, LiteralError};

// ============================================================================
// Actions
// ============================================================================

/// A discrete action identifier
///
/// Only integers are actions. Any integer type converts losslessly or is
/// rejected; floats and strings are never coerced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub i64);

macro_rules! action_id_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ActionId {
                fn from(v: $t) -> Self {
                    Self(i64::from(v))
                }
            }
        )*
    };
}

action_id_from!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! action_id_try_from {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for ActionId {
                type Error = ActionError;

                fn try_from(v: $t) -> Result<Self, Self::Error> {
                    i64::try_from(v)
                        .map(Self)
                        .map_err(|_| ActionError::OutOfRange(v.to_string()))
                }
            }
        )*
    };
}

action_id_try_from!(u64, usize, isize, i128, u128);

impl TryFrom<&Value> for ActionId {
    type Error = ActionError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self(i))
                } else if n.is_u64() {
                    Err(ActionError::OutOfRange(n.to_string()))
                } else {
                    Err(ActionError::NotAnInteger(n.to_string()))
                }
            }
            other => Err(ActionError::NotAnInteger(other.to_string())),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a value was refused as an action
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The value is not an integer
    #[error("action must be an integer, got {0}")]
    NotAnInteger(String),

    /// The integer does not fit the wire representation
    #[error("action {0} does not fit in a signed 64-bit integer")]
    OutOfRange(String),
}

/// One agent's chosen action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Agent name, as reported by the simulation
    pub name: String,
    /// Discrete action id
    pub action: ActionId,
}

impl AgentAction {
    /// Create an action from any lossless integer representation
    pub fn new(name: impl Into<String>, action: impl Into<ActionId>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
        }
    }

    /// Create an action from an untyped JSON value
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] if `value` is not an integer in range.
    pub fn from_value(name: impl Into<String>, value: &Value) -> Result<Self, ActionError> {
        Ok(Self {
            name: name.into(),
            action: ActionId::try_from(value)?,
        })
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A request to the simulation
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Start a new episode
    Init {
        /// Episode seed
        seed: u64,
        /// Optional simulation parameters for this episode
        params: Option<Map<String, Value>>,
    },
    /// Apply one action per agent and advance the simulation
    Action {
        /// Actions, one per agent
        actions: Vec<AgentAction>,
    },
    /// Stop the simulation
    Terminate,
}

impl Request {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Action { .. } => "action",
            Self::Terminate => "terminate",
        }
    }
}

/// A request together with the render flag it is sent with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireRequest", try_from = "WireRequest")]
pub struct RequestEnvelope {
    /// The request
    pub request: Request,
    /// Whether the simulation is rendering
    pub render: bool,
}

impl RequestEnvelope {
    /// Wrap a request with the current render flag
    #[must_use]
    pub fn new(request: Request, render: bool) -> Self {
        Self { request, render }
    }
}

/// Flat on-the-wire shape of a request
#[derive(Clone, Debug, Serialize, Deserialize)]
struct WireRequest {
    initialization: bool,
    termination: bool,
    render: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actions_data: Option<Vec<AgentAction>>,
}

impl From<RequestEnvelope> for WireRequest {
    fn from(envelope: RequestEnvelope) -> Self {
        let mut wire = Self {
            initialization: false,
            termination: false,
            render: envelope.render,
            seed: None,
            params: None,
            actions_data: None,
        };
        match envelope.request {
            Request::Init { seed, params } => {
                wire.initialization = true;
                wire.seed = Some(seed);
                wire.params = params;
            }
            Request::Action { actions } => wire.actions_data = Some(actions),
            Request::Terminate => wire.termination = true,
        }
        wire
    }
}

impl TryFrom<WireRequest> for RequestEnvelope {
    type Error = String;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let request = match (wire.initialization, wire.termination) {
            (true, true) => {
                return Err("initialization and termination are mutually exclusive".to_string())
            }
            (true, false) => Request::Init {
                seed: wire
                    .seed
                    .ok_or_else(|| "initialization request without seed".to_string())?,
                params: wire.params,
            },
            (false, true) => Request::Terminate,
            (false, false) => Request::Action {
                actions: wire
                    .actions_data
                    .ok_or_else(|| "action request without actions_data".to_string())?,
            },
        };
        Ok(Self {
            request,
            render: wire.render,
        })
    }
}

// ============================================================================
// Responses
// ============================================================================

/// One agent's entry in a simulation response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Agent name
    pub name: String,
    /// Observed state; string-encoded literals are already expanded
    #[serde(default, deserialize_with = "literal::deserialize_state")]
    pub state: Value,
    /// Reward accumulated over the frames of this step
    #[serde(default)]
    pub reward: f64,
    /// Auxiliary per-step metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
}

/// A response from the simulation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Per-agent reports, in simulation order
    pub states_data: Vec<AgentReport>,
    /// Number of simulated frames covered by this response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_frames: Option<u32>,
    /// Whether the episode has ended
    #[serde(default)]
    pub done: bool,
}

/// Agent state view handed to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent name
    pub name: String,
    /// Observed state
    pub state: Value,
}

/// Agent reward view handed to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentReward {
    /// Agent name
    pub name: String,
    /// Reward
    pub reward: f64,
}

impl Response {
    /// Agent names in simulation order
    #[must_use]
    pub fn agent_names(&self) -> Vec<String> {
        self.states_data.iter().map(|a| a.name.clone()).collect()
    }

    /// Split into state and raw reward views, preserving agent order
    #[must_use]
    pub fn split(&self) -> (Vec<AgentState>, Vec<AgentReward>) {
        self.states_data
            .iter()
            .map(|a| {
                (
                    AgentState {
                        name: a.name.clone(),
                        state: a.state.clone(),
                    },
                    AgentReward {
                        name: a.name.clone(),
                        reward: a.reward,
                    },
                )
            })
            .unzip()
    }

    /// State view only
    #[must_use]
    pub fn states(&self) -> Vec<AgentState> {
        self.split().0
    }
}
