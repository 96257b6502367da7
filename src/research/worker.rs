/// Background research worker.
///
/// Long-polls the job queue and drives run state transitions. Jobs are
/// acked regardless of outcome; at-least-once delivery is made safe by the
/// idempotent state updates in the runs repository.
use super::queue::{ResearchJob, ResearchQueue};
use super::runs::RunsRepo;
use crate::error::ApiResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::error;

const READ_BLOCK: Duration = Duration::from_secs(2);
const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct ResearchWorker {
    queue: Arc<ResearchQueue>,
    runs: Arc<RunsRepo>,
}

impl ResearchWorker {
    pub fn new(queue: Arc<ResearchQueue>, runs: Arc<RunsRepo>) -> Self {
        Self { queue, runs }
    }

    /// Poll until shutdown. In-flight jobs finish their state marking before
    /// the loop returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let jobs = tokio::select! {
                _ = shutdown.changed() => return,
                read = self.queue.read(READ_BLOCK) => match read {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        error!(error = %e, "research worker read failed");
                        tokio::time::sleep(READ_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            for job in jobs {
                if let Err(e) = self.handle(&job).await {
                    error!(error = %e, run_id = job.run_id, "research job failed");
                }
                if let Err(e) = self.queue.ack(&job.message_id).await {
                    error!(error = %e, run_id = job.run_id, "research job ack failed");
                }
            }
        }
    }

    /// Placeholder pipeline. The real flow would search, scrape and
    /// summarize before writing the report.
    async fn handle(&self, job: &ResearchJob) -> ApiResult<()> {
        self.runs.mark_running(job.run_id).await?;
        let result = format!(
            "# Research Run {}\n\n- Status: placeholder (pipeline not implemented yet)\n",
            job.run_id
        );
        self.runs.mark_succeeded(job.run_id, &result, 0, 0.0).await?;
        Ok(())
    }
}
