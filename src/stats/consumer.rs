/// Batching click-stats consumer.
///
/// Accumulates events and flushes on batch size, on a periodic tick, or on
/// shutdown. A flush runs one transaction: bulk-insert the event rows, then
/// apply the aggregated per-code deltas to `shortlinks.click_count`. On any
/// failure the transaction rolls back and the batch is lost.
use super::ClickEvent;
use crate::error::ApiResult;
use crate::metrics;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error};

const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const FLUSH_DEADLINE: Duration = Duration::from_secs(5);

pub struct ClickConsumer {
    db: PgPool,
    rx: mpsc::Receiver<ClickEvent>,
}

impl ClickConsumer {
    pub fn new(db: PgPool, rx: mpsc::Receiver<ClickEvent>) -> Self {
        Self { db, rx }
    }

    /// Consume until shutdown, flushing any residue on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut batch: Vec<ClickEvent> = Vec::with_capacity(BATCH_SIZE);
        let mut ticker = interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    flush_batch(&self.db, &batch).await;
                    return;
                }
                received = self.rx.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= BATCH_SIZE {
                            flush_batch(&self.db, &batch).await;
                            batch.clear();
                        }
                    }
                    None => {
                        flush_batch(&self.db, &batch).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        flush_batch(&self.db, &batch).await;
                        batch.clear();
                    }
                }
            }
        }
    }
}

/// Flush a batch inside one transaction. Returns whether the commit
/// succeeded; a failed batch is logged and lost.
pub(crate) async fn flush_batch(db: &PgPool, batch: &[ClickEvent]) -> bool {
    if batch.is_empty() {
        return true;
    }
    let start = Instant::now();
    let result = timeout(FLUSH_DEADLINE, flush_tx(db, batch)).await;
    metrics::STATS_FLUSH_DURATION.observe(start.elapsed().as_secs_f64());
    metrics::STATS_FLUSH_SIZE.observe(batch.len() as f64);

    match result {
        Ok(Ok(())) => {
            debug!(count = batch.len(), "click stats flushed");
            true
        }
        Ok(Err(e)) => {
            error!(error = %e, count = batch.len(), "click stats flush failed, batch lost");
            false
        }
        Err(_) => {
            error!(count = batch.len(), "click stats flush timed out, batch lost");
            false
        }
    }
}

async fn flush_tx(db: &PgPool, batch: &[ClickEvent]) -> ApiResult<()> {
    let mut codes = Vec::with_capacity(batch.len());
    let mut clicked_ats = Vec::with_capacity(batch.len());
    let mut ips = Vec::with_capacity(batch.len());
    let mut user_agents = Vec::with_capacity(batch.len());
    let mut referers = Vec::with_capacity(batch.len());
    for event in batch {
        codes.push(event.code.clone());
        clicked_ats.push(event.clicked_at);
        ips.push(event.ip.clone());
        user_agents.push(event.user_agent.clone());
        referers.push(event.referer.clone());
    }

    let (delta_codes, deltas) = aggregate_counts(batch);

    let mut tx = db.begin().await?;

    sqlx::query(
        "INSERT INTO click_stats (code, clicked_at, ip, user_agent, referer)
         SELECT * FROM UNNEST($1::text[], $2::timestamptz[], $3::text[], $4::text[], $5::text[])",
    )
    .bind(&codes)
    .bind(&clicked_ats)
    .bind(&ips)
    .bind(&user_agents)
    .bind(&referers)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE shortlinks s
         SET click_count = s.click_count + v.delta,
             updated_at = now()
         FROM (SELECT UNNEST($1::text[]) AS code, UNNEST($2::bigint[]) AS delta) v
         WHERE s.code = v.code",
    )
    .bind(&delta_codes)
    .bind(&deltas)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Collapse a batch into parallel (code, delta) arrays for the set-valued
/// counter update.
pub(crate) fn aggregate_counts(batch: &[ClickEvent]) -> (Vec<String>, Vec<i64>) {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for event in batch {
        *counts.entry(event.code.as_str()).or_insert(0) += 1;
    }
    let mut codes = Vec::with_capacity(counts.len());
    let mut deltas = Vec::with_capacity(counts.len());
    for (code, delta) in counts {
        codes.push(code.to_string());
        deltas.push(delta);
    }
    (codes, deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(code: &str) -> ClickEvent {
        ClickEvent {
            code: code.to_string(),
            clicked_at: Utc::now(),
            ip: String::new(),
            user_agent: String::new(),
            referer: String::new(),
        }
    }

    #[test]
    fn test_aggregate_counts() {
        let batch = vec![event("a"), event("b"), event("a"), event("a")];
        let (codes, deltas) = aggregate_counts(&batch);

        let mut pairs: Vec<(String, i64)> = codes.into_iter().zip(deltas).collect();
        pairs.sort();
        assert_eq!(pairs, vec![("a".to_string(), 3), ("b".to_string(), 1)]);
    }

    #[test]
    fn test_aggregate_counts_total_matches_batch_len() {
        let batch = vec![event("x"), event("y"), event("x"), event("z"), event("y")];
        let (_, deltas) = aggregate_counts(&batch);
        assert_eq!(deltas.iter().sum::<i64>(), batch.len() as i64);
    }

    #[tokio::test]
    async fn test_empty_batch_flush_is_a_noop() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        assert!(flush_batch(&pool, &[]).await);
    }
}
