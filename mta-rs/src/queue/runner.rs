//! Periodic queue sweep and the delivery worker pool
//!
//! ```text
//! ┌────────┐  tick   ┌──────────────┐  jobs  ┌─────────┐
//! │ Ticker │ ──────► │ handle_queue │ ─────► │ Workers │ (≤ max_workers)
//! └────────┘         └──────────────┘        └────┬────┘
//!                           ▲   apply_report       │ DeliveryReport
//!                           └──────────────────────┘ (mpsc)
//! ```

use crate::context::AppContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};

use super::delivery::{DeliveryJob, DeliveryReport, Deliverer};

pub struct QueueRunner {
    ctx: Arc<AppContext>,
    deliverer: Deliverer,
    workers: Arc<Semaphore>,
    sweep_interval: Duration,
}

impl QueueRunner {
    pub fn new(ctx: Arc<AppContext>, deliverer: Deliverer) -> Self {
        let max_workers = ctx.config().delivery.max_workers.max(1);
        let sweep_interval = Duration::from_secs(ctx.config().queue.sweep_interval_secs.max(1));
        Self {
            ctx,
            deliverer,
            workers: Arc::new(Semaphore::new(max_workers)),
            sweep_interval,
        }
    }

    /// Sweep forever. Reports are folded back as soon as they arrive, so a
    /// slow delivery never holds up the next sweep.
    pub async fn run(self) {
        info!(
            "Queue runner started (sweep every {:?}, {} worker(s))",
            self.sweep_interval,
            self.workers.available_permits()
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    for job in self.plan(now) {
                        self.dispatch(job, tx.clone());
                    }
                }
                Some(report) = rx.recv() => self.apply(report),
            }
        }
    }

    /// One sweep at `now` that waits for every job it started. Returns the
    /// number of delivery attempts made.
    pub async fn run_once(&self, now: i64) -> usize {
        let jobs = self.plan(now);
        let count = jobs.len();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for job in jobs {
            self.dispatch(job, tx.clone());
        }
        drop(tx);

        while let Some(report) = rx.recv().await {
            self.apply(report);
        }
        count
    }

    fn plan(&self, now: i64) -> Vec<DeliveryJob> {
        self.ctx.sweep_admission(now);

        match self.ctx.queue() {
            Ok(mut queue) => {
                let jobs = queue.handle_queue(now);
                if !jobs.is_empty() {
                    debug!("Queue sweep scheduled {} delivery attempt(s)", jobs.len());
                }
                jobs
            }
            Err(e) => {
                error!("Queue sweep skipped: {}", e);
                Vec::new()
            }
        }
    }

    fn dispatch(&self, job: DeliveryJob, tx: mpsc::UnboundedSender<DeliveryReport>) {
        let deliverer = self.deliverer.clone();
        let workers = Arc::clone(&self.workers);

        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            let report = deliverer.deliver(job).await;
            let _ = tx.send(report);
        });
    }

    fn apply(&self, report: DeliveryReport) {
        match self.ctx.queue() {
            Ok(mut queue) => {
                queue.apply_report(report);
            }
            Err(e) => error!("Delivery report for {} dropped: {}", report.id, e),
        }
    }
}
