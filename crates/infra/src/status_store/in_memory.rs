//! In-memory status store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use scanqueue_core::{ChangeEvent, JobId, JobRecord};
use scanqueue_events::{EventBus, InMemoryEventBus, Subscription};

use super::{StatusStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
    bus: InMemoryEventBus<ChangeEvent>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Live subscriptions on the events topic.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

impl StatusStore for InMemoryStatusStore {
    fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().cloned().collect())
    }

    fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(&id).is_some())
    }

    fn publish(&self, event: &ChangeEvent) -> Result<(), StoreError> {
        self.bus
            .publish(event.clone())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn subscribe(&self) -> Result<Subscription<ChangeEvent>, StoreError> {
        Ok(self.bus.subscribe())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.records.read().map(|_| ()).map_err(|_| poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_store::commit;
    use scanqueue_core::{JobStatus, Task};

    #[test]
    fn put_get_overwrite_delete() {
        let store = InMemoryStatusStore::new();
        let mut record = JobRecord::queued(JobId::new(), "localhost");

        store.put(&record).unwrap();
        assert_eq!(store.get(record.id).unwrap(), Some(record.clone()));

        record.transition(JobStatus::Started).unwrap();
        store.put(&record).unwrap();
        assert_eq!(store.get(record.id).unwrap().unwrap().status, JobStatus::Started);
        assert_eq!(store.list().unwrap().len(), 1);

        assert!(store.delete(record.id).unwrap());
        assert!(!store.delete(record.id).unwrap());
        assert!(store.get(record.id).unwrap().is_none());
    }

    #[test]
    fn commit_writes_before_publishing() {
        let store = InMemoryStatusStore::arc();
        let sub = store.subscribe().unwrap();
        let record = JobRecord::queued(JobId::new(), "localhost");

        commit(store.as_ref(), &record).unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.id, record.id);
        assert_eq!(event.status, JobStatus::Queued);
        assert_eq!(event.task, Task::Create);
        // By the time the event is observable, the record is readable.
        assert!(store.get(event.id).unwrap().is_some());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let store = InMemoryStatusStore::new();
        let sub = store.subscribe().unwrap();
        assert_eq!(store.subscriber_count(), 1);

        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }
}
