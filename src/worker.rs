use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::ModelSpec;
use crate::error::GatewayError;
use crate::models::PredictRequest;

/// `"<modelName>-<ordinal>"`, globally unique, assigned once at
/// [`crate::manager::WorkerManager`] construction and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(model: &str, ordinal: usize) -> Self {
        WorkerId(format!("{}-{}", model, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        WorkerId(s)
    }
}

/// The three orthogonal booleans of spec §4.1 collapse onto four reachable
/// combinations, so they are represented here as one tagged state rather
/// than three independent flags (see DESIGN.md for the reachable-states
/// argument). `launched()`/`loaded()`/`busy()` below reconstruct the
/// booleans for callers and tests that reason in those terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Down,
    Booting,
    Idle,
    Busy,
}

struct Inner {
    phase: Phase,
    pid: Option<u32>,
    start_time: Option<Instant>,
    /// Bumped on every `start()`; a watcher task captures the generation it
    /// was spawned under and drops its exit notification if the worker has
    /// since been restarted under it, so a forcibly-killed subprocess from a
    /// superseded launch can't resurrect a dead generation's failure signal.
    generation: u64,
}

/// Owns one managed subprocess serving one model replica. The Worker
/// identity is permanent; the subprocess behind it is restarted by the
/// [`crate::supervisor`] after a crash.
pub struct Worker {
    pub id: WorkerId,
    pub model: ModelSpec,
    pub port: u16,
    inner: Mutex<Inner>,
    predict_lock: AsyncMutex<()>,
    failures: UnboundedSender<WorkerId>,
}

impl Worker {
    pub fn new(id: WorkerId, model: ModelSpec, port: u16, failures: UnboundedSender<WorkerId>) -> Arc<Self> {
        Arc::new(Worker {
            id,
            model,
            port,
            inner: Mutex::new(Inner {
                phase: Phase::Down,
                pid: None,
                start_time: None,
                generation: 0,
            }),
            predict_lock: AsyncMutex::new(()),
            failures,
        })
    }

    pub fn launched(&self) -> bool {
        !matches!(self.inner.lock().unwrap().phase, Phase::Down)
    }

    pub fn loaded(&self) -> bool {
        matches!(self.inner.lock().unwrap().phase, Phase::Idle | Phase::Busy)
    }

    pub fn busy(&self) -> bool {
        matches!(self.inner.lock().unwrap().phase, Phase::Busy)
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().unwrap().pid
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.lock().unwrap().start_time.map(|t| t.elapsed())
    }

    pub fn elapsed_string(&self) -> String {
        match self.elapsed() {
            None => "not running".to_string(),
            Some(d) => {
                let secs = d.as_secs();
                let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
                let mut out = String::new();
                if h > 0 {
                    out.push_str(&format!("{} hours ", h));
                }
                if m > 0 {
                    out.push_str(&format!("{} minutes ", m));
                }
                out.push_str(&format!("{} seconds", s));
                out
            }
        }
    }

    /// Spawns the worker subprocess as `<runtime> worker.py <id> <path>
    /// <port> <handler>`, idempotent in effect: any supervision of a prior
    /// subprocess under this Worker is cancelled by bumping the generation
    /// counter, so an exit event from the old subprocess is dropped instead
    /// of being mistaken for this launch's failure.
    pub fn start(self: &Arc<Self>, runtime: &str) {
        let mut cmd = Command::new(runtime);
        cmd.arg("worker.py")
            .arg(self.id.as_str())
            .arg(&self.model.path)
            .arg(self.port.to_string())
            .arg(&self.model.handler)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let generation = {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            inner.generation
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("worker {}: failed to spawn subprocess: {}", self.id, e);
                let mut inner = self.inner.lock().unwrap();
                inner.phase = Phase::Down;
                let _ = self.failures.send(self.id.clone());
                return;
            }
        };

        let pid = child.id();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = Phase::Booting;
            inner.pid = pid;
            inner.start_time = Some(Instant::now());
        }
        info!("worker {}: launched on port {}", self.id, self.port);

        let this = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await;

            let mut inner = this.inner.lock().unwrap();
            if inner.generation != generation {
                // superseded by a later start(); this exit belongs to a
                // generation we no longer supervise.
                return;
            }
            inner.phase = Phase::Down;
            inner.pid = None;
            inner.start_time = None;
            drop(inner);

            match status {
                Ok(status) if status.success() => {
                    warn!(
                        "worker {}: subprocess exited cleanly after {}, restarting anyway",
                        this.id,
                        this.elapsed_string()
                    );
                }
                Ok(status) => {
                    error!(
                        "worker {}: subprocess exited with {}, worked for {}",
                        this.id,
                        status,
                        this.elapsed_string()
                    );
                }
                Err(e) => {
                    error!("worker {}: failed to wait on subprocess: {}", this.id, e);
                }
            }

            let _ = this.failures.send(this.id.clone());
        });
    }

    /// Called by the `/model-ready` callback once the subprocess has
    /// finished loading its model. The only path to `loaded = true`. Per
    /// spec §4.1 the only reachable edge into `MarkReady` is from
    /// `Booting` (i.e. after `Start()`), so this only succeeds out of
    /// `Phase::Booting`; it returns `false` without touching the phase
    /// otherwise. That rejects a stray or duplicate `/model-ready` POST
    /// arriving while `Busy` (which would flip the worker back to idle and
    /// let it be handed a second ticket mid-request), and also one
    /// arriving while `Down` (no subprocess was ever started for this
    /// worker, so there is nothing to mark ready and no exit event will
    /// ever come along to let the supervisor notice). Callers must only
    /// republish on idle on a `true` return.
    pub fn mark_ready(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.phase, Phase::Booting) {
            return false;
        }
        inner.phase = Phase::Idle;
        true
    }

    /// Called when the dispatcher hands this worker a ticket. Only
    /// succeeds from `Idle`, so a stale idle notification for a worker
    /// that has since crashed (and is therefore `Down`) cannot be turned
    /// into an assignment.
    pub fn mark_busy(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.phase, Phase::Idle) {
            return false;
        }
        inner.phase = Phase::Busy;
        true
    }

    /// Called when a request finishes (`Release`). Returns whether the
    /// transition actually happened; a duplicate `Release` of an
    /// already-idle worker is a no-op and must not re-publish it onto the
    /// idle stream (spec §8 idempotence).
    pub fn mark_idle(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.phase, Phase::Busy) {
            inner.phase = Phase::Idle;
            true
        } else {
            false
        }
    }

    /// POSTs `request` to the worker subprocess over loopback HTTP and
    /// returns its decoded JSON body. Self-serializing beyond the
    /// dispatcher's own mutual-exclusion guarantee, so a duplicate release
    /// can't cause two concurrent in-flight predicts against one worker.
    pub async fn predict(&self, request: &PredictRequest) -> Result<serde_json::Value, GatewayError> {
        let _guard = self.predict_lock.lock().await;

        let url = format!("http://127.0.0.1:{}/predict", self.port);
        let client = awc::Client::default();

        let mut resp = client
            .post(&url)
            .insert_header(("Content-Type", "application/json"))
            .send_json(request)
            .await
            .map_err(|e| GatewayError::WorkerPredict(format!("worker {}: request failed: {}", self.id, e)))?;

        let status = resp.status();
        let body = resp
            .body()
            .await
            .map_err(|e| GatewayError::WorkerPredict(format!("worker {}: failed to read response body: {}", self.id, e)))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            return Err(GatewayError::WorkerPredict(text));
        }

        serde_json::from_slice(&body)
            .map_err(|e| GatewayError::WorkerPredict(format!("worker {}: failed to decode response: {}", self.id, e)))
    }
}
