use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sog_contracts::{Actuation, DataItem, OpId, SearchCriteria, ServiceObject, Subscription};

use crate::{Index, IndexError, Store, StoreError};

#[derive(Debug, Clone)]
pub struct DocStoreConfig {
    pub base_url: String,
    pub timeout: Duration,
}

// REST client for the document-store collaborator.
#[derive(Clone)]
pub struct DocStoreClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct IdListResponse {
    ids: Vec<String>,
}

impl DocStoreClient {
    pub fn new(config: DocStoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn put_json<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<(), StoreError> {
        let resp = self.http.put(self.url(path)).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(StoreError::BadStatus(resp.status()));
        }
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, StoreError> {
        let resp = self.http.get(self.url(path)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::BadStatus(resp.status()));
        }
        let decoded = resp.json::<T>().await.map_err(|_| StoreError::InvalidResponse)?;
        Ok(Some(decoded))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let resp = self.http.delete(self.url(path)).send().await?;
        // Deleting an already-absent document is not an error.
        if resp.status() == reqwest::StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        Err(StoreError::BadStatus(resp.status()))
    }
}

#[async_trait]
impl Store for DocStoreClient {
    async fn put_so(&self, so: &ServiceObject) -> Result<(), StoreError> {
        self.put_json(&format!("/v1/objects/{}", so.id), so).await
    }

    async fn get_so(&self, id: &str) -> Result<Option<ServiceObject>, StoreError> {
        self.get_json(&format!("/v1/objects/{}", id)).await
    }

    async fn delete_so(&self, id: &str) -> Result<(), StoreError> {
        self.delete(&format!("/v1/objects/{}", id)).await
    }

    async fn so_ids_for_owner(&self, owner_id: &str) -> Result<Vec<String>, StoreError> {
        let listing = self
            .get_json::<IdListResponse>(&format!("/v1/owners/{}/objects", owner_id))
            .await?;
        Ok(listing.map(|l| l.ids).unwrap_or_default())
    }

    async fn put_data(&self, item: &DataItem) -> Result<(), StoreError> {
        self.put_json(&format!("/v1/updates/{}", item.id), item).await
    }

    async fn get_data(&self, id: &str) -> Result<Option<DataItem>, StoreError> {
        self.get_json(&format!("/v1/updates/{}", id)).await
    }

    async fn delete_data(&self, id: &str) -> Result<(), StoreError> {
        self.delete(&format!("/v1/updates/{}", id)).await
    }

    async fn get_data_by_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
        timestamp: i64,
    ) -> Result<Option<DataItem>, StoreError> {
        self.get_json(&format!(
            "/v1/objects/{}/streams/{}/updates/{}",
            so_id, stream_id, timestamp
        ))
        .await
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.put_json(&format!("/v1/subscriptions/{}", subscription.id), subscription)
            .await
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, StoreError> {
        self.get_json(&format!("/v1/subscriptions/{}", id)).await
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), StoreError> {
        self.delete(&format!("/v1/subscriptions/{}", id)).await
    }

    async fn put_actuation(&self, actuation: &Actuation) -> Result<(), StoreError> {
        self.put_json(&format!("/v1/actuations/{}", actuation.id), actuation)
            .await
    }

    async fn get_actuation(&self, id: &str) -> Result<Option<Actuation>, StoreError> {
        self.get_json(&format!("/v1/actuations/{}", id)).await
    }

    async fn put_op_id(&self, op_id: &OpId) -> Result<(), StoreError> {
        self.put_json(&format!("/v1/opids/{}", op_id.id), op_id).await
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub timeout: Duration,
}

// REST client for the search/index collaborator.
#[derive(Clone)]
pub struct SearchClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct LastTimestampResponse {
    timestamp: Option<i64>,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(IndexError::Http)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_ids(&self, path: &str) -> Result<Vec<String>, IndexError> {
        let resp = self.http.get(self.url(path)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(IndexError::BadStatus(resp.status()));
        }
        let decoded = resp
            .json::<IdListResponse>()
            .await
            .map_err(|_| IndexError::InvalidResponse)?;
        Ok(decoded.ids)
    }
}

#[async_trait]
impl Index for SearchClient {
    async fn update_ids(&self, so_id: &str, stream_id: &str) -> Result<Vec<String>, IndexError> {
        self.get_ids(&format!("/v1/index/{}/{}/updates", so_id, stream_id))
            .await
    }

    async fn update_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError> {
        self.get_ids(&format!("/v1/index/{}/updates", so_id)).await
    }

    async fn last_update_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Option<i64>, IndexError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/index/{}/{}/last", so_id, stream_id)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(IndexError::BadStatus(resp.status()));
        }
        let decoded = resp
            .json::<LastTimestampResponse>()
            .await
            .map_err(|_| IndexError::InvalidResponse)?;
        Ok(decoded.timestamp)
    }

    async fn search_update_ids(
        &self,
        so_id: &str,
        stream_id: &str,
        criteria: &SearchCriteria,
    ) -> Result<Vec<String>, IndexError> {
        let resp = self
            .http
            .post(self.url(&format!("/v1/index/{}/{}/search", so_id, stream_id)))
            .json(criteria)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IndexError::BadStatus(resp.status()));
        }
        let decoded = resp
            .json::<IdListResponse>()
            .await
            .map_err(|_| IndexError::InvalidResponse)?;
        Ok(decoded.ids)
    }

    async fn subscription_ids_for_stream(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Vec<String>, IndexError> {
        self.get_ids(&format!("/v1/index/{}/{}/subscriptions", so_id, stream_id))
            .await
    }

    async fn subscription_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError> {
        self.get_ids(&format!("/v1/index/{}/subscriptions", so_id))
            .await
    }
}
