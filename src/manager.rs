use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Mutex;

use crate::config::{Config, LoadingStrategy};
use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::queue::Ticket;
use crate::worker::{Worker, WorkerId};
use crate::{supervisor, telemetry};

/// Owns every [`Worker`], indexed by id and by model, and the per-model
/// [`Dispatcher`]s. The worker map is built once at construction and never
/// mutated afterwards, so it needs no lock for reads (spec §5).
pub struct WorkerManager {
    workers: HashMap<WorkerId, Arc<Worker>>,
    dispatchers: HashMap<String, Dispatcher>,
    pub worker_runtime: String,
    ticket_seq: AtomicU64,
    pending_loops: Mutex<Option<PendingLoops>>,
}

struct PendingLoops {
    dispatcher_loops: Vec<(String, UnboundedReceiver<Ticket>, UnboundedReceiver<WorkerId>)>,
    failures_rx: UnboundedReceiver<WorkerId>,
}

impl WorkerManager {
    /// Pre-allocates one [`Worker`] per configured replica with sequential
    /// ports starting above 7777, and one [`Dispatcher`] per model.
    pub fn new(cfg: &Config, worker_runtime: String) -> Arc<Self> {
        let mut port: u16 = 7777;
        let mut workers = HashMap::new();
        let mut dispatchers = HashMap::new();
        let mut dispatcher_loops = Vec::new();
        let (failures_tx, failures_rx) = unbounded_channel();

        for model in cfg.models.values() {
            let (dispatcher, requests_rx, idle_rx) = Dispatcher::new();
            dispatcher_loops.push((model.name.clone(), requests_rx, idle_rx));
            dispatchers.insert(model.name.clone(), dispatcher);

            for ordinal in 1..=model.workers {
                port += 1;
                let id = WorkerId::new(&model.name, ordinal);
                let worker = Worker::new(id.clone(), model.clone(), port, failures_tx.clone());
                workers.insert(id, worker);
            }
        }

        Arc::new(WorkerManager {
            workers,
            dispatchers,
            worker_runtime,
            ticket_seq: AtomicU64::new(0),
            pending_loops: Mutex::new(Some(PendingLoops {
                dispatcher_loops,
                failures_rx,
            })),
        })
    }

    pub fn worker(&self, id: &WorkerId) -> Option<Arc<Worker>> {
        self.workers.get(id).cloned()
    }

    pub fn dispatcher(&self, model: &str) -> Option<&Dispatcher> {
        self.dispatchers.get(model)
    }

    /// Launches the dispatcher loops, the supervisor loop, and the
    /// telemetry printer. Split out from [`Self::start_workers`] so tests
    /// can exercise dispatch/supervision without spawning real
    /// subprocesses; `initialize` runs both in sequence.
    pub async fn spawn_background_loops(self: &Arc<Self>) {
        let mut pending = self.pending_loops.lock().await.take().expect("spawn_background_loops called twice");

        for (model, requests_rx, idle_rx) in pending.dispatcher_loops.drain(..) {
            let dispatcher = self.dispatchers.get(&model).expect("dispatcher exists for every configured model");
            let queue = dispatcher.queue.clone();
            let idle_tx = dispatcher.idle_tx.clone();
            let workers = Arc::new(self.workers_for_model(&model));
            tokio::spawn(Dispatcher::run(model, queue, requests_rx, idle_rx, idle_tx, workers));
        }

        tokio::spawn(supervisor::run(self.clone(), pending.failures_rx));
        tokio::spawn(telemetry::run(self.clone()));
    }

    /// Starts every worker's subprocess, in parallel by default, or
    /// sequentially (each `Start` blocked on `loaded`, polled at 1 Hz)
    /// when `WORKERS_LOADING_STRATEGY=sequential` (spec §4.5).
    pub async fn start_workers(self: &Arc<Self>, strategy: LoadingStrategy) {
        info!("starting {} workers ({:?} loading)", self.workers.len(), strategy);
        match strategy {
            LoadingStrategy::Parallel => {
                for worker in self.workers.values() {
                    worker.start(&self.worker_runtime);
                }
            }
            LoadingStrategy::Sequential => {
                for worker in self.workers.values() {
                    worker.start(&self.worker_runtime);
                    let mut interval = tokio::time::interval(Duration::from_secs(1));
                    while !worker.loaded() {
                        interval.tick().await;
                    }
                }
            }
        }
    }

    pub async fn initialize(self: &Arc<Self>, strategy: LoadingStrategy) {
        self.spawn_background_loops().await;
        self.start_workers(strategy).await;
    }

    fn workers_for_model(&self, model: &str) -> HashMap<WorkerId, Arc<Worker>> {
        self.workers
            .iter()
            .filter(|(_, w)| w.model.name == model)
            .map(|(id, w)| (id.clone(), w.clone()))
            .collect()
    }

    /// Enqueues a ticket on the model's dispatcher and blocks until it is
    /// matched with an idle worker. No timeout at this layer (spec §4.5).
    pub async fn acquire(&self, model: &str, priority: i64) -> Result<Arc<Worker>, GatewayError> {
        let dispatcher = self.dispatchers.get(model).ok_or(GatewayError::UnknownModel)?;

        let seq = self.ticket_seq.fetch_add(1, Ordering::Relaxed);
        let (ticket, rx) = Ticket::new(priority, seq);
        dispatcher
            .requests_tx
            .send(ticket)
            .map_err(|_| GatewayError::UnknownModel)?;

        rx.await.map_err(|_| GatewayError::UnknownModel)
    }

    /// Clears `busy` and publishes the worker's id on its model's idle
    /// stream. No-op if the id is unknown (spec §4.5). Also a no-op if the
    /// worker was not actually `Busy`: a duplicate `Release` beyond the
    /// first must not re-publish an idle notification for a worker that's
    /// already idle (or has since been reassigned), which would let the
    /// dispatcher double-assign it (spec §8 idempotence).
    pub fn release(&self, id: &WorkerId) {
        let worker = match self.workers.get(id) {
            Some(w) => w,
            None => return,
        };
        if !worker.mark_idle() {
            return;
        }
        if let Some(dispatcher) = self.dispatchers.get(&worker.model.name) {
            let _ = dispatcher.idle_tx.send(id.clone());
        }
    }

    /// The subprocess-to-manager readiness callback: the only path by
    /// which a newly-booted or restarted worker enters the pool. A no-op
    /// if the worker is currently `Busy`: a stray duplicate `/model-ready`
    /// POST must not hijack a worker mid-request.
    pub fn mark_ready(&self, id: &WorkerId) {
        let worker = match self.workers.get(id) {
            Some(w) => w,
            None => return,
        };
        if !worker.mark_ready() {
            return;
        }
        if let Some(dispatcher) = self.dispatchers.get(&worker.model.name) {
            let _ = dispatcher.idle_tx.send(id.clone());
        }
    }

    pub fn workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.workers.values()
    }
}
