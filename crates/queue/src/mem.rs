use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Delivery, Queue, QueueError};

// In-process transport for dev mode and tests. A bounded instance rejects
// once full, which is how tests exercise the degraded-accept path.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    published: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    capacity: Option<usize>,
    disconnected: Arc<AtomicBool>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        match self.published.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn published_on(&self, subject: &str) -> Vec<serde_json::Value> {
        self.published()
            .into_iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> Result<Delivery, QueueError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(QueueError::Disconnected);
        }

        let mut published = match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(capacity) = self.capacity {
            if published.len() >= capacity {
                return Ok(Delivery::Rejected);
            }
        }

        published.push((subject.to_string(), payload.clone()));
        Ok(Delivery::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_queue_rejects_once_full() {
        let queue = MemoryQueue::with_capacity(1);
        let payload = serde_json::json!({"opid": "1"});

        assert_eq!(
            queue.publish("updates", &payload).await.unwrap(),
            Delivery::Accepted
        );
        assert_eq!(
            queue.publish("updates", &payload).await.unwrap(),
            Delivery::Rejected
        );
        assert_eq!(queue.published_on("updates").len(), 1);
    }

    #[tokio::test]
    async fn disconnected_queue_surfaces_transport_error() {
        let queue = MemoryQueue::new();
        queue.set_disconnected(true);

        let err = queue
            .publish("updates", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Disconnected));
    }
}
