use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::queue::{PriorityQueue, Ticket};
use crate::worker::{Worker, WorkerId};

/// Per-model mailboxes plus the heap the dispatcher task owns. The queue
/// lives behind a mutex (rather than being fully confined to the
/// dispatcher task) because the supervisor's eviction sweep also needs to
/// reach into it (spec §5 explicitly allows this when the two are shared).
pub struct Dispatcher {
    pub requests_tx: UnboundedSender<Ticket>,
    pub idle_tx: UnboundedSender<WorkerId>,
    pub queue: Arc<Mutex<PriorityQueue>>,
}

impl Dispatcher {
    /// Builds the channels and queue for one model. Does not start the
    /// loop (`spawn` does that once the runtime is up), mirroring spec
    /// §4.5's split between construction and `Initialize`.
    pub fn new() -> (Self, UnboundedReceiver<Ticket>, UnboundedReceiver<WorkerId>) {
        let (requests_tx, requests_rx) = unbounded_channel();
        let (idle_tx, idle_rx) = unbounded_channel();
        (
            Dispatcher {
                requests_tx,
                idle_tx,
                queue: Arc::new(Mutex::new(PriorityQueue::new())),
            },
            requests_rx,
            idle_rx,
        )
    }

    /// Runs the per-model matching loop described in spec §4.3. Selects
    /// between new tickets and idle notifications; when an idle
    /// notification arrives with nothing queued it is re-published so the
    /// next ticket for this model is matched without an intervening idle
    /// event.
    pub async fn run(
        model: String,
        queue: Arc<Mutex<PriorityQueue>>,
        mut requests_rx: UnboundedReceiver<Ticket>,
        mut idle_rx: UnboundedReceiver<WorkerId>,
        idle_tx: UnboundedSender<WorkerId>,
        workers: Arc<HashMap<WorkerId, Arc<Worker>>>,
    ) {
        loop {
            tokio::select! {
                ticket = requests_rx.recv() => {
                    match ticket {
                        Some(ticket) => {
                            let mut q = queue.lock().await;
                            q.push(ticket);
                        }
                        None => break,
                    }
                }
                worker_id = idle_rx.recv() => {
                    let worker_id = match worker_id {
                        Some(id) => id,
                        None => break,
                    };
                    let popped = {
                        let mut q = queue.lock().await;
                        q.pop()
                    };
                    match popped {
                        None => {
                            trace!("dispatcher[{}]: no pending tickets, re-publishing {}", model, worker_id);
                            let _ = idle_tx.send(worker_id);
                        }
                        Some(ticket) => {
                            // `mark_busy` only succeeds out of `Idle`, so a
                            // stale notification for a worker that crashed
                            // after publishing idle but before being matched
                            // (or one for an unknown id) fails the claim
                            // instead of being handed to the ticket as if it
                            // were still serviceable (spec §3: busy=true
                            // implies launched ∧ loaded).
                            let claimed = workers.get(&worker_id).filter(|w| w.mark_busy());
                            match claimed {
                                Some(worker) => ticket.deliver(worker.clone()),
                                None => {
                                    let mut q = queue.lock().await;
                                    q.push(ticket);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
