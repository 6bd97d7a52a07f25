use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::manager::WorkerManager;
use crate::worker::WorkerId;

/// Fixed cool-down between a worker's death and its restart attempt
/// (spec §4.4).
const RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// Consumes the fleet-wide failures stream and restarts dead workers.
/// One task for the whole process; restarts are independent per worker,
/// and the loop never gives up on a given worker (spec §4.4).
pub async fn run(manager: std::sync::Arc<WorkerManager>, mut failures_rx: UnboundedReceiver<WorkerId>) {
    while let Some(id) = failures_rx.recv().await {
        let worker = match manager.worker(&id) {
            Some(w) => w,
            None => {
                warn!("supervisor: failure reported for unknown worker {}", id);
                continue;
            }
        };

        if let Some(dispatcher) = manager.dispatcher(&worker.model.name) {
            let evicted = {
                let mut queue = dispatcher.queue.lock().await;
                queue.remove_if(|t| t.attached_worker_is(&id))
            };
            if !evicted.is_empty() {
                warn!(
                    "supervisor: evicted {} ticket(s) attached to dead worker {}",
                    evicted.len(),
                    id
                );
            }
        }

        info!("supervisor: worker {} waiting {:?} before restart", id, RESTART_COOLDOWN);
        tokio::time::sleep(RESTART_COOLDOWN).await;
        worker.start(&manager.worker_runtime);
    }
}
