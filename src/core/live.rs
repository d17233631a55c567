//! Live collection subscriptions.
//!
//! Each emission replaces the whole local snapshot. Failed emissions are logged and
//! leave the last good snapshot in place.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::ClinicClient;
use crate::{
    db::{CollectionPath, DocumentId, DocumentStore, ListenerRegistration, Query, Snapshot, SnapshotCallback},
    error::StoreResult,
    models::{Patient, Review, SessionRecord, Stored},
};

pub type PatientEntry = Stored<Patient>;
pub type SessionEntry = Stored<SessionRecord>;
pub type ReviewEntry = Stored<Review>;

/// Decodes every document of a snapshot, skipping (and logging) malformed ones.
pub fn decode_snapshot<R: DeserializeOwned>(path: &str, snapshot: &Snapshot) -> Vec<Stored<R>> {
    snapshot
        .iter()
        .filter_map(|doc| match doc.decode::<R>() {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Skipping malformed document {}/{}: {}", path, doc.id, e);
                None
            }
        })
        .collect()
}

pub struct LiveCollection<T> {
    snapshot: watch::Receiver<Vec<T>>,
    registration: Option<ListenerRegistration>,
}

impl<T: Clone + Send + Sync + 'static> LiveCollection<T> {
    pub fn mount<R, F>(store: &dyn DocumentStore, query: Query, transform: F) -> Self
    where
        R: DeserializeOwned,
        F: Fn(Stored<R>) -> T + Send + Sync + 'static,
    {
        Self::mount_arranged(store, query, transform, |_: &mut Vec<T>| {})
    }

    /// Like [`LiveCollection::mount`], with `arrange` applied to every mapped
    /// snapshot before it is published.
    pub fn mount_arranged<R, F, A>(store: &dyn DocumentStore, query: Query, transform: F, arrange: A) -> Self
    where
        R: DeserializeOwned,
        F: Fn(Stored<R>) -> T + Send + Sync + 'static,
        A: Fn(&mut Vec<T>) + Send + Sync + 'static,
    {
        let (tx, snapshot) = watch::channel(Vec::new());
        let path = query.path.to_string();
        let label = path.clone();

        let callback: SnapshotCallback = Arc::new(move |result: StoreResult<Snapshot>| match result {
            Ok(docs) => {
                let mut items: Vec<T> = decode_snapshot::<R>(&label, &docs)
                    .into_iter()
                    .map(&transform)
                    .collect();
                arrange(&mut items);
                tx.send_replace(items);
            }
            Err(e) => error!("Subscription to {} failed: {}", label, e),
        });

        let registration = match store.listen(query, callback) {
            Ok(registration) => Some(registration),
            Err(e) => {
                error!("Could not subscribe to {}: {}", path, e);
                None
            }
        };

        Self {
            snapshot,
            registration,
        }
    }

    /// Latest snapshot.
    pub fn current(&self) -> Vec<T> {
        self.snapshot.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver notified on every replacement.
    pub fn watch(&self) -> watch::Receiver<Vec<T>> {
        self.snapshot.clone()
    }

    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }
}

/// The three application-wide subscriptions, alive while this value is.
pub struct ClinicData {
    pub patients: LiveCollection<PatientEntry>,
    pub sessions: LiveCollection<SessionEntry>,
    pub reviews: LiveCollection<ReviewEntry>,
}

impl ClinicData {
    pub fn mount(client: &ClinicClient) -> Self {
        info!("Mounting live collections");
        let store = client.store.as_ref();

        Self {
            patients: LiveCollection::mount(
                store,
                Query::collection(CollectionPath::patients()),
                |patient: PatientEntry| patient.map(Patient::with_display_date),
            ),
            sessions: LiveCollection::mount(
                store,
                Query::newest_first(CollectionPath::sessions()),
                |session: SessionEntry| session,
            ),
            reviews: LiveCollection::mount(
                store,
                Query::newest_first(CollectionPath::reviews()),
                |review: ReviewEntry| review,
            ),
        }
    }

    pub fn patient(&self, id: &DocumentId) -> Option<PatientEntry> {
        self.patients.current().into_iter().find(|p| &p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::auth::LocalIdentityProvider,
        db::{memory::MemoryStore, NewDocument, CREATED_AT, REGISTERED_AT},
        models::{DateField, NO_DATE},
    };
    use serde_json::json;

    fn client(store: &MemoryStore) -> ClinicClient {
        ClinicClient::new(Arc::new(store.clone()), Arc::new(LocalIdentityProvider::new(None)))
    }

    #[tokio::test]
    async fn patients_carry_display_dates() {
        let store = MemoryStore::new();
        let data = ClinicData::mount(&client(&store));

        store
            .add(
                &CollectionPath::patients(),
                NewDocument::default()
                    .with_field("nombre", "Ana Pérez")
                    .with_server_timestamp(REGISTERED_AT),
            )
            .await
            .unwrap();
        store.put(
            &CollectionPath::patients(),
            &DocumentId::new("legacy"),
            json!({ "nombre": "Luis" }).as_object().unwrap().clone(),
        );

        let patients = data.patients.current();
        assert_eq!(patients.len(), 2);
        assert!(matches!(patients[0].registered_at, Some(DateField::Text(ref d)) if d != NO_DATE));
        assert_eq!(patients[1].registered_display(), NO_DATE);
    }

    #[tokio::test]
    async fn reviews_arrive_newest_first() {
        let store = MemoryStore::new();
        let data = ClinicData::mount(&client(&store));

        for diagnosis in ["first", "second", "third"] {
            store
                .add(
                    &CollectionPath::reviews(),
                    NewDocument::default()
                        .with_field("diagnostico", diagnosis)
                        .with_server_timestamp(CREATED_AT),
                )
                .await
                .unwrap();
        }

        let order: Vec<_> = data.reviews.current().iter().map(|r| r.diagnosis.clone()).collect();
        assert_eq!(order, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failures_keep_the_last_snapshot_and_stay_isolated() {
        let store = MemoryStore::new();
        let data = ClinicData::mount(&client(&store));
        store
            .add(&CollectionPath::patients(), NewDocument::default().with_field("nombre", "Ana"))
            .await
            .unwrap();

        store.fail_listeners(&CollectionPath::patients(), "permission denied");
        assert_eq!(data.patients.len(), 1);

        store
            .add(
                &CollectionPath::reviews(),
                NewDocument::default().with_server_timestamp(CREATED_AT),
            )
            .await
            .unwrap();
        assert_eq!(data.reviews.len(), 1);
    }

    #[tokio::test]
    async fn dropping_tears_every_subscription_down() {
        let store = MemoryStore::new();
        let data = ClinicData::mount(&client(&store));

        assert_eq!(store.active_listeners(&CollectionPath::patients()), 1);
        assert_eq!(store.active_listeners(&CollectionPath::sessions()), 1);
        assert_eq!(store.active_listeners(&CollectionPath::reviews()), 1);

        drop(data);

        assert_eq!(store.active_listeners(&CollectionPath::patients()), 0);
        assert_eq!(store.active_listeners(&CollectionPath::sessions()), 0);
        assert_eq!(store.active_listeners(&CollectionPath::reviews()), 0);
    }

    #[test]
    fn unavailable_store_leaves_collections_empty() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let data = ClinicData::mount(&client(&store));
        assert!(!data.patients.is_active());
        assert!(data.patients.is_empty());
    }
}
