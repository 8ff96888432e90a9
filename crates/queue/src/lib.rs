use async_trait::async_trait;

pub mod mem;
pub mod nats;

// Outcome of a publish the broker answered. `Rejected` is the broker's
// explicit not-accepted signal; transport trouble surfaces as QueueError.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Rejected,
}

#[derive(Debug)]
pub enum QueueError {
    Timeout,
    Disconnected,
    Transport(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Timeout => write!(f, "queue request timed out"),
            QueueError::Disconnected => write!(f, "queue transport is disconnected"),
            QueueError::Transport(message) => write!(f, "queue transport error: {}", message),
        }
    }
}

impl std::error::Error for QueueError {}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> Result<Delivery, QueueError>;
}
