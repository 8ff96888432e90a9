use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::{Delivery, Queue, QueueError};

#[derive(Debug, Clone)]
pub struct NatsQueueConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

// JetStream transport. The broker acks every publish; an ack-level refusal is
// the clean Rejected signal, everything else is a transport failure.
#[derive(Clone)]
pub struct NatsQueue {
    jetstream: async_nats::jetstream::Context,
    publish_timeout: Duration,
}

impl NatsQueue {
    pub async fn connect(config: NatsQueueConfig) -> Result<Self, QueueError> {
        let client = timeout(config.connect_timeout, async_nats::connect(&config.url))
            .await
            .map_err(|_| QueueError::Timeout)?
            .map_err(|err| QueueError::Transport(err.to_string()))?;

        Ok(Self {
            jetstream: async_nats::jetstream::new(client),
            publish_timeout: config.publish_timeout,
        })
    }
}

#[async_trait]
impl Queue for NatsQueue {
    async fn publish(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> Result<Delivery, QueueError> {
        let bytes =
            serde_json::to_vec(payload).map_err(|err| QueueError::Transport(err.to_string()))?;

        let ack = timeout(self.publish_timeout, async {
            let publish = self
                .jetstream
                .publish(subject.to_string(), bytes.into())
                .await
                .map_err(|err| QueueError::Transport(err.to_string()))?;
            Ok::<_, QueueError>(publish.await)
        })
        .await
        .map_err(|_| QueueError::Timeout)??;

        match ack {
            Ok(_) => Ok(Delivery::Accepted),
            Err(_) => Ok(Delivery::Rejected),
        }
    }
}
