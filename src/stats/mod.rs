/// Click event capture pipeline.
///
/// Producers hand events to a `Collector` on the redirect path; collection
/// must never block or fail the request. Consumers batch events into the
/// database in the background.
pub mod channel;
pub mod consumer;
pub mod kafka;

pub use channel::ChannelCollector;
pub use consumer::ClickConsumer;
pub use kafka::{KafkaClickConsumer, KafkaCollector};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One click on a short code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub code: String,
    pub clicked_at: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
}

/// Fire-and-forget event sink. `collect` must return immediately: backends
/// either enqueue the event or drop it.
pub trait Collector: Send + Sync {
    fn collect(&self, event: ClickEvent);
}
