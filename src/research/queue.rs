/// Research job queue over a Redis stream with a consumer group.
use crate::error::{ApiError, ApiResult};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;

pub struct ResearchQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

#[derive(Debug, Clone)]
pub struct ResearchJob {
    pub message_id: String,
    pub run_id: i64,
}

impl ResearchQueue {
    /// Create the queue handle and its consumer group. Group creation is
    /// idempotent: an existing group is treated as success.
    pub async fn new(
        conn: ConnectionManager,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> ApiResult<Self> {
        let queue = Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        };

        let mut c = queue.conn.clone();
        let created: Result<(), redis::RedisError> = c
            .xgroup_create_mkstream(&queue.stream, &queue.group, "$")
            .await;
        match created {
            Ok(()) => {}
            Err(e) if is_busy_group(&e) => {}
            Err(e) => return Err(ApiError::Redis(e)),
        }
        Ok(queue)
    }

    pub async fn enqueue(&self, run_id: i64) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        conn.xadd::<_, _, _, _, ()>(&self.stream, "*", &[("run_id", run_id.to_string())])
            .await?;
        Ok(())
    }

    /// Read pending jobs for this consumer, blocking up to `block`.
    /// Malformed messages are skipped.
    pub async fn read(&self, block: Duration) -> ApiResult<Vec<ResearchJob>> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(10)
            .block(block.as_millis() as usize);

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        for key in reply.keys {
            for message in key.ids {
                let Some(raw) = message.get::<String>("run_id") else {
                    continue;
                };
                let Ok(run_id) = raw.parse::<i64>() else {
                    continue;
                };
                if run_id <= 0 {
                    continue;
                }
                jobs.push(ResearchJob {
                    message_id: message.id.clone(),
                    run_id,
                });
            }
        }
        Ok(jobs)
    }

    pub async fn ack(&self, message_id: &str) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, i64>(&self.stream, &self.group, &[message_id])
            .await?;
        Ok(())
    }
}

fn is_busy_group(err: &redis::RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}
