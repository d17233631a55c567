//! Document store module for the Lianyi clinic.
//!
//! The clinic keeps everything in a hosted, schemaless document store. This module
//! defines the seam every component talks to ([`DocumentStore`]) plus the path,
//! query and snapshot types shared by the implementations:
//!
//! - [`memory::MemoryStore`]: in-process store with synchronous snapshot delivery
//! - [`firestore::FirestoreStore`]: REST client for the hosted store
//!
//! Collections in use:
//!
//! | path                       | contents                          |
//! |----------------------------|-----------------------------------|
//! | `pacientes`                | patients                          |
//! | `pacientes/{id}/sesiones`  | sessions of one patient           |
//! | `sesiones`                 | legacy flat sessions (read only)  |
//! | `revisiones`               | reviews                           |
//! | `usuario/{email}`          | authorization records             |

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, ser::Error as _, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{StoreError, StoreResult},
    models::{Stored, Timestamp},
};

pub mod firestore;
pub mod memory;

pub const PATIENTS: &str = "pacientes";
pub const SESSIONS: &str = "sesiones";
pub const REVIEWS: &str = "revisiones";
pub const USERS: &str = "usuario";

/// Field written by the store's clock on every session and review.
pub const CREATED_AT: &str = "fechaCreado";
/// Field written by the store's clock on patients and authorization records.
pub const REGISTERED_AT: &str = "fecha_registro";

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identifier for an appended document.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slash separated path to a collection: `name` or `name/{doc}/name`...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments: Vec<&str> = path.split('/').collect();

        if segments.iter().any(|s| s.trim().is_empty()) || segments.len() % 2 == 0 {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        Ok(Self(path.to_string()))
    }

    pub fn patients() -> Self {
        Self(PATIENTS.to_string())
    }

    pub fn patient_sessions(patient: &DocumentId) -> Self {
        Self::patients().child(patient, SESSIONS)
    }

    pub fn sessions() -> Self {
        Self(SESSIONS.to_string())
    }

    pub fn reviews() -> Self {
        Self(REVIEWS.to_string())
    }

    pub fn users() -> Self {
        Self(USERS.to_string())
    }

    /// Nested collection under one document of this collection.
    pub fn child(&self, document: &DocumentId, name: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, document, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, the collection's own name.
    pub fn collection_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path of the owning document for nested collections.
    pub fn parent_document(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Whole-collection query with optional ordering. Documents lacking the
/// ordering field are left out of the results, as the hosted store does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub path: CollectionPath,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(path: CollectionPath) -> Self {
        Self {
            path,
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn newest_first(path: CollectionPath) -> Self {
        Self::collection(path).order_by(CREATED_AT, Direction::Descending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub fields: Fields,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Stored<T>, serde_json::Error> {
        let record = serde_json::from_value(Value::Object(self.fields.clone()))?;
        Ok(Stored::new(self.id.clone(), record))
    }
}

/// Full, ordered result set delivered on every change.
pub type Snapshot = Vec<StoredDocument>;

pub type SnapshotCallback = Arc<dyn Fn(StoreResult<Snapshot>) + Send + Sync>;

/// Document about to be written. Fields named in `server_timestamps` are filled
/// in by the store's clock, never by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDocument {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

impl NewDocument {
    pub fn from_record<T: Serialize>(record: &T) -> StoreResult<Self> {
        match serde_json::to_value(record)? {
            Value::Object(fields) => Ok(Self {
                fields,
                server_timestamps: Vec::new(),
            }),
            other => Err(StoreError::Decode(serde_json::Error::custom(format!(
                "documents must be objects, got {other}"
            )))),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_server_timestamp(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self.server_timestamps.push(name.to_string());
        self
    }

    /// Field map with every server timestamp set to `now`.
    pub fn resolve(self, now: Timestamp) -> StoreResult<Fields> {
        let mut fields = self.fields;
        let now = serde_json::to_value(now)?;
        for name in self.server_timestamps {
            fields.insert(name, now.clone());
        }
        Ok(fields)
    }
}

/// Teardown handle for a live query. Delivery stops once it is removed or dropped.
pub struct ListenerRegistration {
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerRegistration {
    pub fn new(teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn remove(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Appends a document under a store-assigned id.
    async fn add(&self, collection: &CollectionPath, document: NewDocument) -> StoreResult<DocumentId>;

    async fn get(&self, collection: &CollectionPath, id: &DocumentId) -> StoreResult<Option<StoredDocument>>;

    /// Writes `document` at `id` only if nothing is there yet. Returns whether it wrote.
    async fn create(&self, collection: &CollectionPath, id: &DocumentId, document: NewDocument) -> StoreResult<bool>;

    /// Registers `callback` for every snapshot of `query`, starting with the current one.
    fn listen(&self, query: Query, callback: SnapshotCallback) -> StoreResult<ListenerRegistration>;
}
