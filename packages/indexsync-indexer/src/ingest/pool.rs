use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::queue::EventQueue;
use super::EventIngestWorker;
use crate::error::Result;

/// Ingest workers pulling from one shared queue
///
/// Each worker handles one delivery at a time. Workers stop when the token
/// is cancelled (finishing the delivery in hand) or the queue runs dry.
pub struct WorkerPool {
    tasks: JoinSet<usize>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        worker: EventIngestWorker,
        queue: Arc<dyn EventQueue>,
        cancel: CancellationToken,
    ) -> Self {
        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers.max(1) {
            let worker = worker.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { run_worker(worker_id, worker, queue, cancel).await });
        }
        info!("Started {} ingest worker(s)", workers.max(1));
        Self { tasks, cancel }
    }

    /// Ask every worker to stop after its current delivery
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every worker; returns the number of deliveries handled
    pub async fn join(mut self) -> Result<usize> {
        let mut handled = 0;
        while let Some(joined) = self.tasks.join_next().await {
            handled += joined?;
        }
        Ok(handled)
    }
}

async fn run_worker(
    worker_id: usize,
    worker: Arc<EventIngestWorker>,
    queue: Arc<dyn EventQueue>,
    cancel: CancellationToken,
) -> usize {
    let mut handled = 0;
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        if let Err(e) = worker.handle(delivery).await {
            error!("Worker {} failed to settle a delivery: {}", worker_id, e);
        }
        handled += 1;
    }
    info!("Ingest worker {} stopped after {} delivery(ies)", worker_id, handled);
    handled
}
