use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sog_contracts::{
    epoch_ms_now, Actuation, DataItem, OpId, SearchCriteria, ServiceObject, Subscription,
};

use crate::{Index, IndexError, Store, StoreError};

// In-process backend for dev mode and tests. Implements both the store and
// the index contract over one shared state so stream listings stay in
// insertion order without a separate indexing hop.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    sos: HashMap<String, ServiceObject>,
    data: HashMap<String, DataItem>,
    stream_order: HashMap<(String, String), Vec<String>>,
    subscriptions: HashMap<String, Subscription>,
    actuations: HashMap<String, Actuation>,
    op_ids: HashMap<String, i64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn op_id_count(&self) -> usize {
        self.lock().op_ids.len()
    }

    pub fn stored_data_count(&self) -> usize {
        self.lock().data.len()
    }
}

#[async_trait]
impl Store for MemoryBackend {
    async fn put_so(&self, so: &ServiceObject) -> Result<(), StoreError> {
        self.lock().sos.insert(so.id.clone(), so.clone());
        Ok(())
    }

    async fn get_so(&self, id: &str) -> Result<Option<ServiceObject>, StoreError> {
        Ok(self.lock().sos.get(id).cloned())
    }

    async fn delete_so(&self, id: &str) -> Result<(), StoreError> {
        self.lock().sos.remove(id);
        Ok(())
    }

    async fn so_ids_for_owner(&self, owner_id: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        let mut owned = state
            .sos
            .values()
            .filter(|so| so.owner_id == owner_id)
            .map(|so| (so.created_at, so.id.clone()))
            .collect::<Vec<_>>();
        owned.sort();
        Ok(owned.into_iter().map(|(_, id)| id).collect())
    }

    async fn put_data(&self, item: &DataItem) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = (item.so_id.clone(), item.stream_id.clone());
        let order = state.stream_order.entry(key).or_default();
        if !order.iter().any(|id| id == &item.id) {
            order.push(item.id.clone());
        }
        state.data.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_data(&self, id: &str) -> Result<Option<DataItem>, StoreError> {
        Ok(self.lock().data.get(id).cloned())
    }

    async fn delete_data(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(item) = state.data.remove(id) {
            let key = (item.so_id, item.stream_id);
            if let Some(order) = state.stream_order.get_mut(&key) {
                order.retain(|existing| existing != id);
            }
        }
        Ok(())
    }

    async fn get_data_by_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
        timestamp: i64,
    ) -> Result<Option<DataItem>, StoreError> {
        let state = self.lock();
        let key = (so_id.to_string(), stream_id.to_string());
        let Some(order) = state.stream_order.get(&key) else {
            return Ok(None);
        };

        // Last matching write wins when timestamps collide.
        Ok(order
            .iter()
            .rev()
            .filter_map(|id| state.data.get(id))
            .find(|item| item.timestamp == timestamp)
            .cloned())
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.lock()
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self.lock().subscriptions.get(id).cloned())
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), StoreError> {
        self.lock().subscriptions.remove(id);
        Ok(())
    }

    async fn put_actuation(&self, actuation: &Actuation) -> Result<(), StoreError> {
        self.lock()
            .actuations
            .insert(actuation.id.clone(), actuation.clone());
        Ok(())
    }

    async fn get_actuation(&self, id: &str) -> Result<Option<Actuation>, StoreError> {
        Ok(self.lock().actuations.get(id).cloned())
    }

    async fn put_op_id(&self, op_id: &OpId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = epoch_ms_now();
        state.op_ids.retain(|_, expires_at| *expires_at > now);
        state.op_ids.insert(op_id.id.clone(), op_id.expires_at);
        Ok(())
    }
}

#[async_trait]
impl Index for MemoryBackend {
    async fn update_ids(&self, so_id: &str, stream_id: &str) -> Result<Vec<String>, IndexError> {
        let key = (so_id.to_string(), stream_id.to_string());
        Ok(self.lock().stream_order.get(&key).cloned().unwrap_or_default())
    }

    async fn update_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError> {
        let state = self.lock();
        let mut keys = state
            .stream_order
            .keys()
            .filter(|(so, _)| so == so_id)
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();

        let mut ids = Vec::new();
        for key in keys {
            if let Some(order) = state.stream_order.get(&key) {
                ids.extend(order.iter().cloned());
            }
        }
        Ok(ids)
    }

    async fn last_update_timestamp(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Option<i64>, IndexError> {
        let state = self.lock();
        let key = (so_id.to_string(), stream_id.to_string());
        let Some(order) = state.stream_order.get(&key) else {
            return Ok(None);
        };

        Ok(order
            .iter()
            .filter_map(|id| state.data.get(id))
            .map(|item| item.timestamp)
            .max())
    }

    async fn search_update_ids(
        &self,
        so_id: &str,
        stream_id: &str,
        criteria: &SearchCriteria,
    ) -> Result<Vec<String>, IndexError> {
        let state = self.lock();
        let key = (so_id.to_string(), stream_id.to_string());
        let Some(order) = state.stream_order.get(&key) else {
            return Ok(Vec::new());
        };

        let mut ids = order
            .iter()
            .filter(|id| {
                state
                    .data
                    .get(id.as_str())
                    .is_some_and(|item| criteria.matches_timestamp(item.timestamp))
            })
            .cloned()
            .collect::<Vec<_>>();

        if let Some(last_n) = criteria.last_n {
            if ids.len() > last_n {
                ids = ids.split_off(ids.len() - last_n);
            }
        }

        Ok(ids)
    }

    async fn subscription_ids_for_stream(
        &self,
        so_id: &str,
        stream_id: &str,
    ) -> Result<Vec<String>, IndexError> {
        let state = self.lock();
        let mut subs = state
            .subscriptions
            .values()
            .filter(|sub| sub.so_id == so_id && sub.stream_id == stream_id)
            .map(|sub| (sub.created_at, sub.id.clone()))
            .collect::<Vec<_>>();
        subs.sort();
        Ok(subs.into_iter().map(|(_, id)| id).collect())
    }

    async fn subscription_ids_for_so(&self, so_id: &str) -> Result<Vec<String>, IndexError> {
        let state = self.lock();
        let mut subs = state
            .subscriptions
            .values()
            .filter(|sub| sub.so_id == so_id || sub.target.so_id() == Some(so_id))
            .map(|sub| (sub.created_at, sub.id.clone()))
            .collect::<Vec<_>>();
        subs.sort();
        Ok(subs.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sog_contracts::{SecurityMeta, SubscriptionTarget};

    fn item(id: &str, so: &str, stream: &str, timestamp: i64) -> DataItem {
        DataItem {
            id: id.to_string(),
            so_id: so.to_string(),
            stream_id: stream.to_string(),
            payload: serde_json::json!({"value": timestamp}),
            timestamp,
            security: SecurityMeta::Public,
        }
    }

    #[tokio::test]
    async fn stream_listing_preserves_insertion_order() {
        let backend = MemoryBackend::new();
        for (id, ts) in [("a", 10), ("b", 20), ("c", 30)] {
            backend.put_data(&item(id, "so", "temp", ts)).await.unwrap();
        }

        let ids = backend.update_ids("so", "temp").await.unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);

        backend.delete_data("b").await.unwrap();
        let ids = backend.update_ids("so", "temp").await.unwrap();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn last_update_timestamp_tracks_the_maximum() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend.last_update_timestamp("so", "temp").await.unwrap(),
            None
        );

        backend.put_data(&item("a", "so", "temp", 10)).await.unwrap();
        backend.put_data(&item("b", "so", "temp", 30)).await.unwrap();
        backend.put_data(&item("c", "so", "temp", 20)).await.unwrap();

        assert_eq!(
            backend.last_update_timestamp("so", "temp").await.unwrap(),
            Some(30)
        );

        let resolved = backend
            .get_data_by_timestamp("so", "temp", 30)
            .await
            .unwrap()
            .expect("item at timestamp 30");
        assert_eq!(resolved.id, "b");
    }

    #[tokio::test]
    async fn search_applies_time_range_and_last_n() {
        let backend = MemoryBackend::new();
        for (id, ts) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            backend.put_data(&item(id, "so", "temp", ts)).await.unwrap();
        }

        let criteria = SearchCriteria {
            time_from: Some(20),
            time_to: Some(40),
            last_n: Some(2),
        };
        let ids = backend
            .search_update_ids("so", "temp", &criteria)
            .await
            .unwrap();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn subscription_index_covers_source_and_destination() {
        let backend = MemoryBackend::new();
        let sub = Subscription {
            id: "sub-1".to_string(),
            so_id: "source".to_string(),
            stream_id: "temp".to_string(),
            owner_id: "alice".to_string(),
            target: SubscriptionTarget::ServiceObject {
                so_id: "sink".to_string(),
            },
            created_at: 1,
        };
        backend.put_subscription(&sub).await.unwrap();

        assert_eq!(
            backend
                .subscription_ids_for_stream("source", "temp")
                .await
                .unwrap(),
            vec!["sub-1"]
        );
        assert_eq!(
            backend.subscription_ids_for_so("source").await.unwrap(),
            vec!["sub-1"]
        );
        assert_eq!(
            backend.subscription_ids_for_so("sink").await.unwrap(),
            vec!["sub-1"]
        );
        assert!(backend
            .subscription_ids_for_so("unrelated")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn op_ids_prune_expired_entries() {
        let backend = MemoryBackend::new();
        let now = epoch_ms_now();

        backend
            .put_op_id(&OpId {
                id: "expired".to_string(),
                expires_at: now - 1,
            })
            .await
            .unwrap();
        backend
            .put_op_id(&OpId {
                id: "live".to_string(),
                expires_at: now + 60_000,
            })
            .await
            .unwrap();

        assert_eq!(backend.op_id_count(), 1);
    }
}
