//! In-process simulation stand-in
//!
//! `FakeSimulation` implements `SimulationProcess` with a thread that
//! connects to the session's listener and answers frames the way a real
//! simulation would, recording every request it sees.

#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use simlink_core::transport::frame;
use simlink_core::{ProcessError, Request, RequestEnvelope, SimulationProcess};

/// What the fake does with one request
pub enum Reply {
    /// Answer with this JSON
    Json(Value),
    /// Hang up without answering
    Hangup,
}

/// Decides the reply for each non-terminate request
pub type Responder = Arc<dyn Fn(&RequestEnvelope) -> Reply + Send + Sync>;

/// A request seen by the fake, tagged with the launch it arrived on
#[derive(Clone, Debug)]
pub struct Recorded {
    /// Zero-based launch index
    pub launch: usize,
    /// The request
    pub envelope: RequestEnvelope,
}

/// Shared record of everything the fake observed
#[derive(Clone, Debug, Default)]
pub struct Journal {
    /// Render flag of each launch
    pub launches: Arc<Mutex<Vec<bool>>>,
    /// Requests in arrival order
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Journal {
    pub fn launches(&self) -> Vec<bool> {
        self.launches.lock().clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn kinds(&self) -> Vec<(usize, &'static str)> {
        self.requests
            .lock()
            .iter()
            .map(|r| (r.launch, r.envelope.request.kind()))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.envelope.request.kind() == kind)
            .count()
    }

    pub fn init_seeds(&self) -> Vec<u64> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r.envelope.request {
                Request::Init { seed, .. } => Some(seed),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeSimulation {
    port: u16,
    responder: Responder,
    journal: Journal,
    connects: bool,
    worker: Option<JoinHandle<()>>,
}

impl FakeSimulation {
    pub fn new(port: u16, responder: Responder) -> Self {
        Self {
            port,
            responder,
            journal: Journal::default(),
            connects: true,
            worker: None,
        }
    }

    /// A simulation that launches but never connects
    pub fn silent(port: u16) -> Self {
        Self {
            connects: false,
            ..Self::new(port, plane_responder(1, 0.0))
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl SimulationProcess for FakeSimulation {
    fn ensure_running(&mut self, render: bool) -> Result<(), ProcessError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let launch = {
            let mut launches = self.journal.launches.lock();
            launches.push(render);
            launches.len() - 1
        };
        if !self.connects {
            self.worker = Some(thread::spawn(|| {}));
            return Ok(());
        }

        let port = self.port;
        let responder = Arc::clone(&self.responder);
        let requests = Arc::clone(&self.journal.requests);
        self.worker = Some(thread::spawn(move || {
            let Some(mut stream) = connect_with_retry(port) else {
                return;
            };
            loop {
                let Ok(envelope) = frame::decode::<RequestEnvelope, _>(&mut stream) else {
                    return;
                };
                let terminate = envelope.request == Request::Terminate;
                let reply = if terminate {
                    None
                } else {
                    Some(responder(&envelope))
                };
                requests.lock().push(Recorded { launch, envelope });

                match reply {
                    None | Some(Reply::Hangup) => return,
                    Some(Reply::Json(value)) => {
                        let Ok(bytes) = frame::encode(&value) else {
                            return;
                        };
                        if std::io::Write::write_all(&mut stream, &bytes).is_err() {
                            return;
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    fn is_launched(&self) -> bool {
        self.worker.is_some()
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }

    fn terminate_within(&mut self, _timeout: Duration) -> Result<(), ProcessError> {
        self.terminate()
    }
}

fn connect_with_retry(port: u16) -> Option<TcpStream> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            return Some(stream);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

/// A port that was free a moment ago
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Single "Plane" agent: init returns its position, each step reports
/// `reward` over `n_frames` frames with a string-encoded state
pub fn plane_responder(n_frames: u32, reward: f64) -> Responder {
    Arc::new(move |envelope: &RequestEnvelope| match &envelope.request {
        Request::Init { .. } => Reply::Json(json!({
            "states_data": [{"name": "Plane", "state": [0.0, 100.0], "reward": 0}]
        })),
        _ => Reply::Json(json!({
            "states_data": [{
                "name": "Plane",
                "state": "(1.0, 2.0)",
                "reward": reward,
                "metrics": {"regions": 3, "misc": null}
            }],
            "n_frames": n_frames,
            "done": false
        })),
    })
}

/// Agents `names`, each rewarded `reward` per step over `n_frames` frames
pub fn roster_responder(names: &'static [&'static str], n_frames: u32, reward: f64) -> Responder {
    Arc::new(move |envelope: &RequestEnvelope| {
        let agents: Vec<Value> = names
            .iter()
            .map(|name| json!({"name": name, "state": {"id": name}, "reward": reward}))
            .collect();
        match &envelope.request {
            Request::Init { .. } => Reply::Json(json!({"states_data": agents})),
            _ => Reply::Json(json!({"states_data": agents, "n_frames": n_frames, "done": true})),
        }
    })
}
