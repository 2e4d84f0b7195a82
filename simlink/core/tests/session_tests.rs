//! Session tests against an in-process simulation

mod common;

use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use simlink_core::{
    AgentAction, AgentReward, Request, RequestEnvelope, ResetOptions, Session, SessionConfig,
    SessionError, SessionState, TransportConfig, TransportError,
};

use common::{free_port, plane_responder, roster_responder, FakeSimulation, Reply, Responder};

fn session_with(responder: Responder, seed: u64) -> (Session<FakeSimulation>, common::Journal) {
    let port = free_port();
    let fake = FakeSimulation::new(port, responder);
    let journal = fake.journal();
    let config = SessionConfig {
        port,
        seed: Some(seed),
        render: false,
        transport: TransportConfig::default()
            .with_accept_timeout(Duration::from_secs(10))
            .with_read_timeout(Duration::from_secs(10)),
        ..SessionConfig::default()
    };
    (Session::with_process(config, fake), journal)
}

#[test]
fn test_plane_episode_end_to_end() {
    let (mut session, journal) = session_with(plane_responder(4, 8.0), 42);

    let states = session.reset(false).unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name, "Plane");
    assert_eq!(states[0].state, json!([0.0, 100.0]));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.roster().to_vec(), vec!["Plane".to_string()]);

    let outcome = session.step(vec![AgentAction::new("Plane", 2)]).unwrap();
    assert_eq!(
        outcome.rewards,
        vec![AgentReward {
            name: "Plane".into(),
            reward: 2.0
        }]
    );
    assert_eq!(
        serde_json::to_value(&outcome.rewards).unwrap(),
        json!([{"name": "Plane", "reward": 2.0}])
    );
    assert_eq!(outcome.states[0].state, json!([1.0, 2.0]));
    assert_eq!(outcome.n_frames, 4);
    assert!(!outcome.done);

    session.close().unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    let requests = journal.requests();
    assert_eq!(journal.launches(), vec![false]);
    assert_eq!(journal.kinds(), vec![(0, "init"), (0, "action"), (0, "terminate")]);
    assert!(requests.iter().all(|r| !r.envelope.render));

    match &requests[0].envelope.request {
        Request::Init { seed, params } => {
            assert!(*seed < 1_000_000);
            assert_eq!(*params, None);
        }
        other => panic!("expected init, got {other:?}"),
    }
    assert_eq!(
        requests[1].envelope.request,
        Request::Action {
            actions: vec![AgentAction::new("Plane", 2)]
        }
    );
}

#[test]
fn test_render_change_relaunches_once() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);

    session.reset(true).unwrap();
    session.reset(false).unwrap();

    assert_eq!(journal.launches(), vec![true, false]);
    assert_eq!(
        journal.kinds(),
        vec![(0, "init"), (0, "terminate"), (1, "init")]
    );

    // Terminate goes out with the old render flag, the new init with the new one
    let requests = journal.requests();
    assert!(requests[1].envelope.render);
    assert!(!requests[2].envelope.render);

    session.close().unwrap();
    assert_eq!(journal.count("terminate"), 2);
}

#[test]
fn test_same_render_mode_reuses_connection() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);

    session.reset(false).unwrap();
    let addr = session.local_addr();
    session.reset(false).unwrap();

    assert_eq!(session.local_addr(), addr);
    assert_eq!(journal.launches(), vec![false]);
    assert_eq!(journal.kinds(), vec![(0, "init"), (0, "init")]);
    session.close().unwrap();
}

#[test]
fn test_close_sends_one_terminate_and_frees_port() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);
    session.reset(false).unwrap();
    let addr = session.local_addr().unwrap();

    session.close().unwrap();
    session.close().unwrap();

    assert_eq!(journal.count("terminate"), 1);
    assert_eq!(session.local_addr(), None);
    assert!(!session.is_launched());
    assert!(TcpStream::connect(addr).is_err());

    let err = session.reset(false).unwrap_err();
    assert!(
        matches!(
            err,
            SessionError::InvalidState {
                operation: "reset",
                state: SessionState::Closed
            }
        ),
        "got {err:?}"
    );
}

#[test]
fn test_close_after_lost_connection_still_releases_everything() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);
    session.reset(false).unwrap();
    let addr = session.local_addr().unwrap();

    session.cancel_handle().cancel();
    let err = session.close().unwrap_err();
    assert!(
        matches!(err, SessionError::Transport(ref e) if e.is_connection_lost()),
        "got {err:?}"
    );

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.local_addr(), None);
    assert!(!session.is_launched());
    assert!(TcpStream::connect(addr).is_err());
    assert_eq!(journal.count("terminate"), 0);

    session.close().unwrap();
}

#[test]
fn test_render_change_after_lost_connection_releases_everything() {
    let (mut session, _journal) = session_with(plane_responder(1, 0.0), 1);
    session.reset(false).unwrap();
    let addr = session.local_addr().unwrap();

    session.cancel_handle().cancel();
    let err = session.reset(true).unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)), "got {err:?}");

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.local_addr(), None);
    assert!(!session.is_launched());
    assert!(TcpStream::connect(addr).is_err());
}

#[derive(Clone, Default)]
struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_request_and_response_bodies_logged_at_trace() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let (mut session, _journal) = session_with(plane_responder(4, 8.0), 42);
    tracing::subscriber::with_default(subscriber, || {
        session.reset(false).unwrap();
        session.step(vec![AgentAction::new("Plane", 2)]).unwrap();
    });
    session.close().unwrap();

    let logs = String::from_utf8(captured.0.lock().clone()).unwrap();
    assert!(logs.contains("Request body"), "{logs}");
    assert!(logs.contains("Response body"), "{logs}");
    assert!(logs.contains("Plane"), "{logs}");
    assert!(logs.contains("n_frames: Some(4)"), "{logs}");
}

#[test]
fn test_zero_frame_count_is_protocol_violation() {
    let (mut session, _journal) = session_with(plane_responder(0, 8.0), 1);
    session.reset(false).unwrap();

    let err = session.step(vec![AgentAction::new("Plane", 0)]).unwrap_err();
    assert!(matches!(err, SessionError::ProtocolViolation(_)), "got {err:?}");
}

#[test]
fn test_agent_order_preserved_and_rewards_scaled() {
    let (mut session, _journal) = session_with(roster_responder(&["A", "B", "C"], 5, 10.0), 1);

    let states = session.reset(false).unwrap();
    let names: Vec<_> = states.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);

    let outcome = session
        .step(vec![
            AgentAction::new("C", 1),
            AgentAction::new("A", 0),
            AgentAction::new("B", 3),
        ])
        .unwrap();
    let rewards: Vec<_> = outcome
        .rewards
        .iter()
        .map(|r| (r.name.as_str(), r.reward))
        .collect();
    assert_eq!(rewards, vec![("A", 2.0), ("B", 2.0), ("C", 2.0)]);
    assert!(outcome.done);

    // done does not close the session
    assert_eq!(session.state(), SessionState::Ready);
    session.close().unwrap();
}

#[test]
fn test_unknown_agent_rejected_before_send() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);
    session.reset(false).unwrap();
    let before = journal.requests().len();

    let err = session.step(vec![AgentAction::new("Ghost", 1)]).unwrap_err();
    assert!(matches!(err, SessionError::ProtocolViolation(_)), "got {err:?}");
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(journal.requests().len(), before);

    session.close().unwrap();
}

#[test]
fn test_non_integer_actions_rejected_before_send() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);
    session.reset(false).unwrap();
    let before = journal.requests().len();

    for bad in [json!(1.5), json!("2")] {
        let err = session.step_values([("Plane", bad)]).unwrap_err();
        assert!(
            matches!(err, SessionError::InvalidAction { ref agent, .. } if agent == "Plane"),
            "got {err:?}"
        );
    }
    assert_eq!(journal.requests().len(), before);

    let outcome = session.step_values([("Plane", json!(3))]).unwrap();
    assert_eq!(outcome.n_frames, 1);
    session.close().unwrap();
}

#[test]
fn test_episode_seeds_are_deterministic() {
    let (mut first, first_journal) = session_with(plane_responder(1, 0.0), 7);
    let (mut second, second_journal) = session_with(plane_responder(1, 0.0), 7);

    for _ in 0..3 {
        first.reset(false).unwrap();
        second.reset(false).unwrap();
    }
    let seeds = first_journal.init_seeds();
    assert_eq!(seeds, second_journal.init_seeds());
    assert_eq!(seeds.len(), 3);
    assert!(seeds.windows(2).any(|w| w[0] != w[1]));
    assert_eq!(first.last_episode_seed(), seeds.last().copied());

    // Reseeding restarts the sequence
    first.set_seed(7);
    first.reset(false).unwrap();
    assert_eq!(first_journal.init_seeds()[3], seeds[0]);

    first.close().unwrap();
    second.close().unwrap();
}

#[test]
fn test_reset_with_seed_and_params() {
    let (mut session, journal) = session_with(plane_responder(1, 0.0), 1);
    let mut params = Map::new();
    params.insert("wind".into(), Value::from(3));

    session
        .reset_with(ResetOptions::new(false).with_seed(123).with_params(params.clone()))
        .unwrap();

    assert_eq!(
        journal.requests()[0].envelope.request,
        Request::Init {
            seed: 123,
            params: Some(params)
        }
    );
    assert_eq!(session.last_episode_seed(), Some(123));
    session.close().unwrap();
}

#[test]
fn test_metrics_accumulate_and_reset() {
    let (mut session, _journal) = session_with(plane_responder(2, 1.0), 1);
    session.reset(false).unwrap();

    for _ in 0..3 {
        session.step(vec![AgentAction::new("Plane", 1)]).unwrap();
    }
    let metrics = session.metrics();
    assert_eq!(metrics.steps(), 3);
    assert_eq!(metrics.get("regions").map(<[_]>::len), Some(3));
    assert_eq!(metrics.get("misc"), None);

    session.reset(false).unwrap();
    assert!(session.metrics().is_empty());
    session.close().unwrap();
}

#[test]
fn test_simulation_hangup_is_connection_lost() {
    let responder: Responder = Arc::new(|envelope: &RequestEnvelope| match envelope.request {
        Request::Init { .. } => Reply::Json(json!({"states_data": [{"name": "Plane"}]})),
        _ => Reply::Hangup,
    });
    let (mut session, _journal) = session_with(responder, 1);
    session.reset(false).unwrap();

    let err = session.step(vec![AgentAction::new("Plane", 1)]).unwrap_err();
    assert!(
        matches!(err, SessionError::Transport(TransportError::ConnectionLost { .. })),
        "got {err:?}"
    );
    assert_eq!(session.state(), SessionState::AwaitingResponse);
    assert!(matches!(
        session.close(),
        Err(SessionError::InvalidState { operation: "close", .. })
    ));
}

#[test]
fn test_cancel_aborts_waiting_for_connection() {
    let port = free_port();
    let config = SessionConfig {
        port,
        seed: Some(1),
        ..SessionConfig::default()
    };
    let mut session = Session::with_process(config, FakeSimulation::silent(port));

    let handle = session.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
    });

    let err = session.reset(true).unwrap_err();
    assert!(
        matches!(err, SessionError::Transport(TransportError::Cancelled)),
        "got {err:?}"
    );
    assert_eq!(session.state(), SessionState::AwaitingConnection);
    canceller.join().unwrap();

    session.close().unwrap();
    assert!(!session.is_launched());
}
