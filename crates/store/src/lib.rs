use async_trait::async_trait;
use sog_contracts::{Actuation, DataItem, OpId, SearchCriteria, ServiceObject, Subscription};

pub mod http;
pub mod mem;

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store request timed out"),
            StoreError::Http(err) => write!(f, "store HTTP error: {}", err),
            StoreError::BadStatus(status) => write!(f, "store returned status {}", status),
            StoreError::InvalidResponse => write!(f, "store returned an invalid response"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Http(value)
        }
    }
}

#[derive(Debug)]
pub enum IndexError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    InvalidResponse,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Timeout => write!(f, "index request timed out"),
            IndexError::Http(err) => write!(f, "index HTTP error: {}", err),
            IndexError::BadStatus(status) => write!(f, "index returned status {}", status),
            IndexError::InvalidResponse => write!(f, "index returned an invalid response"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<reqwest::Error> for IndexError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            IndexError::Timeout
        } else {
            IndexError::Http(value)
        }
    }
}

// Document-store collaborator. Persistence here is authoritative: a record is
// durable once a put returns Ok, independent of what the queue later reports.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_so(&self, so: &ServiceObject) -> Result<(), StoreError>;
    async fn get_so(&self, id: &str) -> Result<Option<ServiceObject>, StoreError>;
    async fn delete_so(&self, id: &str) -> Result<(), StoreError>;
    async fn so_ids_for_owner(&self, owner_id: &str) -> Result<Vec<String>, StoreError>;

    async fn put_data(&self, item: &DataItem) -> Result<(), StoreError>;
    async fn get_data(&self, id: &str) -> Result<Option<DataItem>, StoreError>;
    async fn delete_data(&self, id: &str) -> Result<(), StoreError>;
    async fn get_data_by_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
        timestamp: i64,
    ) -> Result<Option<DataItem>, StoreError>;

    async fn put_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;
    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, StoreError>;
    async fn delete_subscription(&self, id: &str) -> Result<(), StoreError>;

    async fn put_actuation(&self, actuation: &Actuation) -> Result<(), StoreError>;
    async fn get_actuation(&self, id: &str) -> Result<Option<Actuation>, StoreError>;

    async fn put_op_id(&self, op_id: &OpId) -> Result<(), StoreError>;
}

// Search/index collaborator. Update ids come back in insertion order, which
// the backing index keeps ascending by timestamp.
#[async_trait]
pub trait Index: Send + Sync {
    async fn update_ids(&self, so_id: &str, stream_id: &str) -> Result<Vec<String>, IndexError>;
    async fn update_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError>;
    async fn last_update_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Option<i64>, IndexError>;
    async fn search_update_ids(
        &self,
        so_id: &str,
        stream_id: &str,
        criteria: &SearchCriteria,
    ) -> Result<Vec<String>, IndexError>;
    async fn subscription_ids_for_stream(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Vec<String>, IndexError>;
    async fn subscription_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError>;
}
