/// In-process click collector backed by a bounded channel.
///
/// When the channel is full, events are dropped. This is the documented loss
/// mode: the redirect path must never queue behind the stats pipeline.
use super::{ClickEvent, Collector};
use tokio::sync::mpsc;
use tracing::debug;

pub struct ChannelCollector {
    tx: mpsc::Sender<ClickEvent>,
}

impl ChannelCollector {
    /// Returns the collector and the receiving end for the consumer.
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<ClickEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self { tx }, rx)
    }
}

impl Collector for ChannelCollector {
    fn collect(&self, event: ClickEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(code = %event.code, "click buffer full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer already shut down; nothing left to record.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(code: &str) -> ClickEvent {
        ClickEvent {
            code: code.to_string(),
            clicked_at: Utc::now(),
            ip: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            referer: String::new(),
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered() {
        let (collector, mut rx) = ChannelCollector::new(8);
        collector.collect(event("abc"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.code, "abc");
    }

    #[tokio::test]
    async fn test_overflow_drops_instead_of_blocking() {
        let (collector, mut rx) = ChannelCollector::new(1);
        collector.collect(event("kept"));
        collector.collect(event("dropped-1"));
        collector.collect(event("dropped-2"));

        assert_eq!(rx.recv().await.unwrap().code, "kept");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_collect_after_consumer_gone_is_silent() {
        let (collector, rx) = ChannelCollector::new(1);
        drop(rx);
        collector.collect(event("abc"));
    }
}
