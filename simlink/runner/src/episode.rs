//! Episode loop
//!
//! Drives one episode with a uniformly random discrete policy and keeps a
//! per-agent running return.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use simlink_core::{AgentAction, AgentReward, Session, SessionError, SimulationProcess};

/// Picks a uniformly random action for every agent
#[derive(Debug)]
pub struct RandomPolicy {
    n_actions: u32,
    rng: StdRng,
}

impl RandomPolicy {
    /// Policy over actions `0..n_actions`; `n_actions` must be positive
    pub fn new(n_actions: u32, seed: u64) -> Self {
        Self {
            n_actions: n_actions.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// One action per agent, in roster order
    pub fn act(&mut self, roster: &[String]) -> Vec<AgentAction> {
        roster
            .iter()
            .map(|name| AgentAction::new(name.as_str(), self.rng.gen_range(0..self.n_actions)))
            .collect()
    }
}

/// What happened during one episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    /// Steps taken
    pub steps: u64,
    /// Whether the simulation reported the episode as finished
    pub done: bool,
    /// Sum of normalised rewards per agent, in roster order
    pub returns: Vec<(String, f64)>,
    /// Metric summary reported by the session
    pub metrics: Value,
}

/// Add one step's rewards to the running totals
pub fn accumulate(returns: &mut Vec<(String, f64)>, rewards: &[AgentReward]) {
    for reward in rewards {
        match returns.iter_mut().find(|(name, _)| *name == reward.name) {
            Some((_, total)) => *total += reward.reward,
            None => returns.push((reward.name.clone(), reward.reward)),
        }
    }
}

/// Run one episode of at most `max_steps` steps
pub fn run_episode<P: SimulationProcess>(
    session: &mut Session<P>,
    policy: &mut RandomPolicy,
    render: bool,
    max_steps: u64,
) -> Result<EpisodeSummary, SessionError> {
    let states = session.reset(render)?;
    let mut returns: Vec<(String, f64)> = states.iter().map(|s| (s.name.clone(), 0.0)).collect();

    let mut steps = 0;
    let mut done = false;
    while steps < max_steps && !done {
        let actions = policy.act(session.roster());
        let outcome = session.step(actions)?;
        accumulate(&mut returns, &outcome.rewards);
        done = outcome.done;
        steps += 1;
        tracing::trace!(step = steps, n_frames = outcome.n_frames, "Step");
    }

    Ok(EpisodeSummary {
        steps,
        done,
        returns,
        metrics: session.metrics().summary(),
    })
}
