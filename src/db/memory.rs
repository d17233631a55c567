//! In-process document store.
//!
//! Snapshots are delivered synchronously from inside each write, after every
//! lock is released, so a callback may safely call back into the store.

use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{
    CollectionPath, Direction, DocumentId, DocumentStore, Fields, ListenerRegistration, NewDocument,
    Query, Snapshot, SnapshotCallback, StoredDocument,
};
use crate::{
    error::{StoreError, StoreResult},
    models::Timestamp,
};

struct Listener {
    query: Query,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct Inner {
    // Documents per collection, in insertion order
    collections: DashMap<CollectionPath, Vec<StoredDocument>>,
    listeners: DashMap<u64, Listener>,
    next_listener: AtomicU64,
    unavailable: AtomicBool,
    last_timestamp: Mutex<Option<Timestamp>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live queries currently registered on `path`.
    pub fn active_listeners(&self, path: &CollectionPath) -> usize {
        self.inner
            .listeners
            .iter()
            .filter(|entry| &entry.value().query.path == path)
            .count()
    }

    /// Direct write bypassing the application, the way an administrator edits records.
    pub fn put(&self, collection: &CollectionPath, id: &DocumentId, fields: Fields) {
        {
            let mut documents = self.inner.collections.entry(collection.clone()).or_default();
            match documents.iter_mut().find(|doc| &doc.id == id) {
                Some(existing) => existing.fields = fields,
                None => documents.push(StoredDocument {
                    id: id.clone(),
                    fields,
                }),
            }
        }
        self.notify(collection);
    }

    /// Delivers `message` as an error to every live query on `path`.
    pub fn fail_listeners(&self, path: &CollectionPath, message: &str) {
        for callback in self.callbacks_for(path).into_iter().map(|(_, cb)| cb) {
            callback(Err(StoreError::Unavailable(message.to_string())));
        }
    }

    pub fn documents(&self, collection: &CollectionPath) -> Vec<StoredDocument> {
        self.inner
            .collections
            .get(collection)
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    // Strictly increasing so creation order survives identical wall clock readings
    fn next_timestamp(&self) -> Timestamp {
        let mut last = self
            .inner
            .last_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Timestamp::now();

        if let Some(previous) = *last {
            if now <= previous {
                now = if previous.nanoseconds >= 999_999_999 {
                    Timestamp {
                        seconds: previous.seconds + 1,
                        nanoseconds: 0,
                    }
                } else {
                    Timestamp {
                        seconds: previous.seconds,
                        nanoseconds: previous.nanoseconds + 1,
                    }
                };
            }
        }

        *last = Some(now);
        now
    }

    fn run_query(&self, query: &Query) -> Snapshot {
        let mut documents = self.documents(&query.path);

        if let Some(order) = &query.order_by {
            documents.retain(|doc| doc.fields.contains_key(&order.field));
            documents.sort_by(|a, b| {
                let ordering = compare_values(&a.fields[&order.field], &b.fields[&order.field]);
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        documents
    }

    fn callbacks_for(&self, path: &CollectionPath) -> Vec<(Query, SnapshotCallback)> {
        self.inner
            .listeners
            .iter()
            .filter(|entry| &entry.value().query.path == path)
            .map(|entry| (entry.value().query.clone(), entry.value().callback.clone()))
            .collect()
    }

    fn notify(&self, path: &CollectionPath) {
        let listeners = self.callbacks_for(path);
        debug!("Notifying {} listener(s) on {}", listeners.len(), path);

        for (query, callback) in listeners {
            callback(Ok(self.run_query(&query)));
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    let as_timestamp = |v: &Value| serde_json::from_value::<Timestamp>(v.clone()).ok();

    match (as_timestamp(a), as_timestamp(b)) {
        (Some(a), Some(b)) => return a.cmp(&b),
        (Some(_), None) => return CmpOrdering::Greater,
        (None, Some(_)) => return CmpOrdering::Less,
        (None, None) => {}
    }

    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => CmpOrdering::Equal,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    #[instrument(skip(self, document), fields(collection = %collection))]
    async fn add(&self, collection: &CollectionPath, document: NewDocument) -> StoreResult<DocumentId> {
        self.check_available()?;

        let id = DocumentId::generate();
        let fields = document.resolve(self.next_timestamp())?;

        self.inner
            .collections
            .entry(collection.clone())
            .or_default()
            .push(StoredDocument {
                id: id.clone(),
                fields,
            });

        debug!("Added document {}", id);
        self.notify(collection);
        Ok(id)
    }

    #[instrument(skip(self), fields(collection = %collection, id = %id))]
    async fn get(&self, collection: &CollectionPath, id: &DocumentId) -> StoreResult<Option<StoredDocument>> {
        self.check_available()?;

        Ok(self
            .inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| &doc.id == id).cloned()))
    }

    #[instrument(skip(self, document), fields(collection = %collection, id = %id))]
    async fn create(&self, collection: &CollectionPath, id: &DocumentId, document: NewDocument) -> StoreResult<bool> {
        self.check_available()?;

        let fields = document.resolve(self.next_timestamp())?;
        {
            // The entry guard holds the shard lock, making check-and-insert atomic
            let mut documents = self.inner.collections.entry(collection.clone()).or_default();
            if documents.iter().any(|doc| &doc.id == id) {
                return Ok(false);
            }
            documents.push(StoredDocument {
                id: id.clone(),
                fields,
            });
        }

        self.notify(collection);
        Ok(true)
    }

    fn listen(&self, query: Query, callback: SnapshotCallback) -> StoreResult<ListenerRegistration> {
        self.check_available()?;

        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        let initial = self.run_query(&query);

        self.inner.listeners.insert(
            id,
            Listener {
                query,
                callback: callback.clone(),
            },
        );
        callback(Ok(initial));

        let inner = Arc::clone(&self.inner);
        Ok(ListenerRegistration::new(move || {
            inner.listeners.remove(&id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CREATED_AT;
    use serde_json::json;

    fn recorder() -> (SnapshotCallback, Arc<Mutex<Vec<Snapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: SnapshotCallback = Arc::new(move |result: StoreResult<Snapshot>| {
            if let Ok(snapshot) = result {
                sink.lock().unwrap().push(snapshot);
            }
        });
        (callback, seen)
    }

    fn named(name: &str) -> NewDocument {
        NewDocument::default()
            .with_field("nombre", name)
            .with_server_timestamp(CREATED_AT)
    }

    #[tokio::test]
    async fn listeners_receive_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        let path = CollectionPath::reviews();
        let (callback, seen) = recorder();

        let _registration = store
            .listen(Query::newest_first(path.clone()), callback)
            .unwrap();
        store.add(&path, named("first")).await.unwrap();
        store.add(&path, named("second")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_empty());
        let names: Vec<_> = seen[2].iter().map(|d| d.fields["nombre"].clone()).collect();
        assert_eq!(names, vec![json!("second"), json!("first")]);
    }

    #[tokio::test]
    async fn ordered_queries_skip_documents_without_the_field() {
        let store = MemoryStore::new();
        let path = CollectionPath::sessions();
        store.put(&path, &DocumentId::new("legacy"), Fields::new());
        store.add(&path, named("current")).await.unwrap();

        let (callback, seen) = recorder();
        let _registration = store.listen(Query::newest_first(path), callback).unwrap();

        assert_eq!(seen.lock().unwrap()[0].len(), 1);
    }

    #[tokio::test]
    async fn removed_listeners_stop_receiving() {
        let store = MemoryStore::new();
        let path = CollectionPath::patients();
        let (callback, seen) = recorder();

        let registration = store.listen(Query::collection(path.clone()), callback).unwrap();
        assert_eq!(store.active_listeners(&path), 1);

        registration.remove();
        assert_eq!(store.active_listeners(&path), 0);

        store.add(&path, named("late")).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_never_overwrites() {
        let store = MemoryStore::new();
        let path = CollectionPath::users();
        let id = DocumentId::new("ana@example.com");

        assert!(store.create(&path, &id, named("first")).await.unwrap());
        assert!(!store.create(&path, &id, named("second")).await.unwrap());

        let stored = store.get(&path, &id).await.unwrap().unwrap();
        assert_eq!(stored.fields["nombre"], json!("first"));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let path = CollectionPath::patients();
        assert!(store.add(&path, named("x")).await.is_err());
        assert!(store.get(&path, &DocumentId::new("x")).await.is_err());
        let (callback, _) = recorder();
        assert!(store.listen(Query::collection(path), callback).is_err());
    }
}
