//! # Hosted document store (REST)
//!
//! Talks to the hosted store's v1 REST surface:
//!
//! - writes go through `documents:commit` so the server can stamp `REQUEST_TIME`
//!   into timestamp fields and enforce `exists: false` preconditions
//! - reads are plain document GETs
//! - live queries poll `:runQuery` on an interval and only emit when the result
//!   set actually changed
//!
//! Values travel in the store's typed encoding (`stringValue`, `timestampValue`, ...)
//! and are converted to and from the crate's JSON field maps here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};

use super::{
    CollectionPath, Direction, DocumentId, DocumentStore, Fields, ListenerRegistration, NewDocument,
    Query, Snapshot, SnapshotCallback, StoredDocument,
};
use crate::{
    error::{StoreError, StoreResult},
    models::Timestamp,
};

pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

#[derive(Clone)]
pub struct FirestoreStore {
    http: Client,
    endpoint: String,
    database: String,
    api_key: Option<String>,
    id_token: Option<String>,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct RemoteDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    document: Option<RemoteDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl FirestoreStore {
    pub fn new(project_id: &str, api_key: Option<String>, poll_interval: Duration) -> Self {
        Self {
            http: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            database: format!("projects/{project_id}/databases/(default)/documents"),
            api_key: api_key.filter(|k| !k.is_empty()),
            id_token: None,
            poll_interval,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    /// Bearer token of the signed-in identity, sent with every request.
    pub fn with_id_token(mut self, id_token: Option<String>) -> Self {
        self.id_token = id_token;
        self
    }

    fn documents_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.database)
    }

    fn document_name(&self, collection: &CollectionPath, id: &DocumentId) -> String {
        format!("{}/{}/{}", self.database, collection, id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut request = self.http.request(method, url);

        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.id_token {
            request = request.bearer_auth(token);
        }

        request
    }

    async fn rejection(response: Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        let message = if body.error.status.is_empty() {
            body.error.message
        } else {
            format!("{}: {}", body.error.status, body.error.message)
        };

        StoreError::Rejected { status, message }
    }

    async fn commit(&self, collection: &CollectionPath, id: &DocumentId, document: NewDocument) -> StoreResult<()> {
        let transforms: Vec<Value> = document
            .server_timestamps
            .iter()
            .map(|field| json!({ "fieldPath": field, "setToServerValue": "REQUEST_TIME" }))
            .collect();

        let body = json!({
            "writes": [{
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": encode_fields(&document.fields),
                },
                "updateTransforms": transforms,
                "currentDocument": { "exists": false },
            }]
        });

        let url = format!("{}:commit", self.documents_url());
        let response = self.request(Method::POST, &url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        Ok(())
    }

    #[instrument(skip(self), fields(collection = %query.path))]
    async fn run_query(&self, query: &Query) -> StoreResult<Snapshot> {
        let parent = match query.path.parent_document() {
            Some(parent) => format!("{}/{}", self.documents_url(), parent),
            None => self.documents_url(),
        };

        let mut structured = json!({
            "from": [{ "collectionId": query.path.collection_id() }],
        });
        if let Some(order) = &query.order_by {
            let direction = match order.direction {
                Direction::Ascending => "ASCENDING",
                Direction::Descending => "DESCENDING",
            };
            structured["orderBy"] = json!([{
                "field": { "fieldPath": order.field },
                "direction": direction,
            }]);
        }

        let url = format!("{parent}:runQuery");
        let response = self
            .request(Method::POST, &url)
            .json(&json!({ "structuredQuery": structured }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let rows: Vec<QueryRow> = response.json().await?;
        rows.into_iter()
            .filter_map(|row| row.document)
            .map(into_stored)
            .collect()
    }
}

fn into_stored(document: RemoteDocument) -> StoreResult<StoredDocument> {
    let id = document
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&document.name)
        .to_string();

    Ok(StoredDocument {
        id: DocumentId::new(id),
        fields: decode_fields(document.fields)?,
    })
}

fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let timestamp = serde_json::from_value::<Timestamp>(value.clone())
                .ok()
                .and_then(|ts| ts.to_datetime());

            match timestamp {
                Some(dt) => json!({
                    "timestampValue": dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
                }),
                None => json!({ "mapValue": { "fields": encode_fields(map) } }),
            }
        }
    }
}

fn decode_fields(fields: Map<String, Value>) -> StoreResult<Fields> {
    fields
        .into_iter()
        .map(|(name, value)| Ok((name, decode_value(value)?)))
        .collect()
}

fn decode_value(value: Value) -> StoreResult<Value> {
    let Value::Object(mut typed) = value else {
        return Ok(Value::Null);
    };

    if let Some(s) = typed.remove("stringValue") {
        return Ok(s);
    }
    if let Some(b) = typed.remove("booleanValue") {
        return Ok(b);
    }
    if let Some(i) = typed.remove("integerValue") {
        return Ok(match &i {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(i),
            _ => i,
        });
    }
    if let Some(d) = typed.remove("doubleValue") {
        return Ok(d);
    }
    if let Some(Value::String(ts)) = typed.remove("timestampValue") {
        let parsed = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| StoreError::Rejected {
                status: 0,
                message: format!("bad timestamp {ts}: {e}"),
            })?
            .with_timezone(&chrono::Utc);
        return Ok(serde_json::to_value(Timestamp::from(parsed))?);
    }
    if let Some(Value::Object(mut map)) = typed.remove("mapValue") {
        let fields = match map.remove("fields") {
            Some(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        return Ok(Value::Object(decode_fields(fields)?));
    }
    if let Some(Value::Object(mut array)) = typed.remove("arrayValue") {
        let values = match array.remove("values") {
            Some(Value::Array(values)) => values,
            _ => Vec::new(),
        };
        return values
            .into_iter()
            .map(decode_value)
            .collect::<StoreResult<Vec<_>>>()
            .map(Value::Array);
    }
    if let Some(reference) = typed.remove("referenceValue") {
        return Ok(reference);
    }

    Ok(Value::Null)
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self, document), fields(collection = %collection))]
    async fn add(&self, collection: &CollectionPath, document: NewDocument) -> StoreResult<DocumentId> {
        let id = DocumentId::generate();
        self.commit(collection, &id, document).await?;

        debug!("Added document {}", id);
        Ok(id)
    }

    #[instrument(skip(self), fields(collection = %collection, id = %id))]
    async fn get(&self, collection: &CollectionPath, id: &DocumentId) -> StoreResult<Option<StoredDocument>> {
        let url = format!("{}/{}/{}", self.documents_url(), collection, id);
        let response = self.request(Method::GET, &url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(into_stored(response.json().await?)?)),
            _ => Err(Self::rejection(response).await),
        }
    }

    #[instrument(skip(self, document), fields(collection = %collection, id = %id))]
    async fn create(&self, collection: &CollectionPath, id: &DocumentId, document: NewDocument) -> StoreResult<bool> {
        match self.commit(collection, id, document).await {
            Ok(()) => Ok(true),
            Err(StoreError::Rejected { status, message })
                if status == StatusCode::CONFLICT.as_u16()
                    || message.starts_with("ALREADY_EXISTS")
                    || message.starts_with("FAILED_PRECONDITION") =>
            {
                debug!("Document already present, leaving it untouched");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn listen(&self, query: Query, callback: SnapshotCallback) -> StoreResult<ListenerRegistration> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Unavailable(format!("no async runtime for listener: {e}")))?;
        let store = self.clone();

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(store.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut last: Option<Snapshot> = None;
            let mut failing = false;

            loop {
                interval.tick().await;

                match store.run_query(&query).await {
                    Ok(snapshot) => {
                        failing = false;
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            callback(Ok(snapshot));
                        }
                    }
                    Err(e) if !failing => {
                        failing = true;
                        error!("Live query on {} failed: {}", query.path, e);
                        callback(Err(e));
                    }
                    Err(e) => warn!("Live query on {} still failing: {}", query.path, e),
                }
            }
        });

        Ok(ListenerRegistration::new(move || task.abort()))
    }
}
