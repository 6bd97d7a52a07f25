use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use sysinfo::{PidExt, ProcessExt, System, SystemExt};
use tokio::process::Command;

use crate::config;
use crate::manager::WorkerManager;

/// Periodically samples per-worker-process CPU/RSS and, best-effort, GPU
/// memory via `nvidia-smi`. Purely informational: spec §1 treats this as
/// out of scope for correctness, so sampling failures are logged and
/// swallowed rather than propagated.
pub async fn run(manager: Arc<WorkerManager>) {
    let interval_secs = match config::metrics_display_frequency() {
        Ok(0) => {
            info!("telemetry: METRICS_DISPLAY_FREQUENCY=0, disabling resource usage printer");
            return;
        }
        Ok(secs) => secs,
        Err(e) => {
            warn!("telemetry: invalid METRICS_DISPLAY_FREQUENCY ({}), disabling", e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        sample_once(&manager).await;
    }
}

async fn sample_once(manager: &WorkerManager) {
    let mut sys = System::new();
    sys.refresh_processes();

    let gpu = sample_gpu().await;
    if let Some((used, total)) = gpu {
        info!("telemetry: gpu memory {used} MiB / {total} MiB used");
    }

    info!(
        "telemetry: host ram {:.1} MiB total / {:.1} MiB available",
        sys.total_memory() as f64 / 1024.0,
        sys.available_memory() as f64 / 1024.0
    );

    for worker in manager.workers() {
        let Some(pid) = worker.pid() else { continue };
        match sys.process(sysinfo::Pid::from_u32(pid)) {
            Some(proc_) => {
                info!(
                    "telemetry: worker {} (up {}) cpu {:.1}% ram {:.1} MiB",
                    worker.id,
                    worker.elapsed_string(),
                    proc_.cpu_usage(),
                    proc_.memory() as f64 / 1024.0,
                );
            }
            None => warn!("telemetry: no process info for worker {} (pid {})", worker.id, pid),
        }
    }
}

async fn sample_gpu() -> Option<(f64, f64)> {
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=memory.used,memory.total")
        .arg("--format=csv,noheader,nounits")
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let first_line = text.lines().next()?;
    let mut parts = first_line.split(',').map(|s| s.trim());
    let used: f64 = parts.next()?.parse().ok()?;
    let total: f64 = parts.next()?.parse().ok()?;
    Some((used, total))
}
