//! Handles all interactions with the remote document store.
//!
//! The store is a Firestore project spoken to over its REST API. Only the
//! read side is needed here: listing a collection and getting one document.
//! Firestore wraps every field in a typed value object (`{"stringValue": …}`);
//! those are decoded into plain JSON before anything else sees them.

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::config::FirestoreConfig;
use super::errors::FetchError;

const PAGE_SIZE: &str = "300";

/// A record read from a collection, with its fields already decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl StoreDocument {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Reads an integer field, accepting whole doubles and numeric strings as well.
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Read access to a remote document-collection store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns every document in `collection`.
    async fn list_collection(&self, collection: &str) -> Result<Vec<StoreDocument>, FetchError>;
    /// Returns one document, or `None` when it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, FetchError>;
}

#[derive(Deserialize, Debug)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl From<RawDocument> for StoreDocument {
    fn from(raw: RawDocument) -> Self {
        let id = raw.name.rsplit('/').next().unwrap_or_default().to_string();
        let fields = raw.fields.into_iter().map(|(k, v)| (k, decode_value(v))).collect();
        StoreDocument { id, fields }
    }
}

/// Unwraps a Firestore typed value into plain JSON.
pub fn decode_value(value: Value) -> Value {
    let mut typed = match value {
        Value::Object(typed) => typed,
        other => return other,
    };
    if typed.len() != 1 {
        return Value::Object(typed);
    }
    let Some((kind, inner)) = typed.iter_mut().next().map(|(k, v)| (k.clone(), v.take())) else {
        return Value::Null;
    };
    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" | "booleanValue" | "doubleValue" => inner,
        "nullValue" => Value::Null,
        "integerValue" => match &inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(inner),
            _ => inner,
        },
        "mapValue" => {
            let fields = match inner {
                Value::Object(mut map) => match map.remove("fields") {
                    Some(Value::Object(fields)) => fields,
                    _ => Map::new(),
                },
                _ => Map::new(),
            };
            Value::Object(fields.into_iter().map(|(k, v)| (k, decode_value(v))).collect())
        }
        "arrayValue" => {
            let values = match inner {
                Value::Object(mut map) => match map.remove("values") {
                    Some(Value::Array(values)) => values,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            Value::Array(values.into_iter().map(decode_value).collect())
        }
        other => {
            trace!("Unknown Firestore value kind '{}', passing through.", other);
            let mut passthrough = Map::new();
            passthrough.insert(other.to_string(), inner);
            Value::Object(passthrough)
        }
    }
}

/// `DocumentStore` backed by the Firestore REST API.
#[derive(Clone, Debug)]
pub struct FirestoreClient {
    client: Client,
    documents_url: String,
    api_key: String,
}

impl FirestoreClient {
    pub fn new(config: &FirestoreConfig, client: Client) -> Self {
        let documents_url = format!(
            "{}/projects/{}/databases/(default)/documents",
            config.base_url.trim_end_matches('/'),
            config.project_id
        );
        debug!("Firestore documents root: {}", documents_url);
        Self { client, documents_url, api_key: config.api_key.clone() }
    }

    async fn fetch_page(&self, collection: &str, page_token: Option<&str>) -> Result<ListDocumentsResponse, FetchError> {
        let url = format!("{}/{}", self.documents_url, collection);
        let mut query = vec![("key", self.api_key.as_str()), ("pageSize", PAGE_SIZE)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response = self.client.get(&url).query(&query).send().await.map_err(|e| {
            error!("Request error listing collection '{}': {}", collection, e);
            FetchError::Http(e)
        })?;
        let response = check_status(response, collection).await?;
        let body = response.text().await?;
        let page = serde_json::from_str::<ListDocumentsResponse>(&body).map_err(|e| {
            error!("Failed to parse listing of collection '{}': {}", collection, e);
            FetchError::Json(e)
        })?;
        Ok(page)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn list_collection(&self, collection: &str) -> Result<Vec<StoreDocument>, FetchError> {
        debug!("Listing collection '{}'", collection);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.fetch_page(collection, page_token.as_deref()).await?;
            documents.extend(page.documents.into_iter().map(StoreDocument::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    trace!("Collection '{}' has another page.", collection);
                    page_token = Some(token);
                }
                None => break,
            }
        }
        info!("Fetched {} document(s) from collection '{}'", documents.len(), collection);
        Ok(documents)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, FetchError> {
        let url = format!("{}/{}/{}", self.documents_url, collection, id);
        debug!("Fetching document '{}/{}'", collection, id);
        let response = self.client.get(&url).query(&[("key", self.api_key.as_str())]).send().await.map_err(|e| {
            error!("Request error fetching document '{}/{}': {}", collection, id, e);
            FetchError::Http(e)
        })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!("Document '{}/{}' does not exist.", collection, id);
            return Ok(None);
        }
        let response = check_status(response, collection).await?;
        let raw = response.json::<RawDocument>().await?;
        Ok(Some(StoreDocument::from(raw)))
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_else(|e| format!("N/A (failed to read error body: {})", e));
    error!("Document store returned {} for '{}': {}", status, what, message);
    Err(FetchError::Status { status, message })
}
