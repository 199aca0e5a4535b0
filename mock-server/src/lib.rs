use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

/// Largest window the service ever returns.
pub const SERVICE_MAX_WINDOW: usize = 1000;
const DEFAULT_LIMIT: usize = 50;

pub type Rejection = (StatusCode, Json<Value>);

fn reject(status: StatusCode, code: u32, reason: &str) -> Rejection {
    (
        status,
        Json(json!({ "errors": [{ "errorCode": code, "errorReason": reason }] })),
    )
}

#[derive(Default)]
struct Store {
    collections: HashMap<String, Vec<Value>>,
    custom_field_sets: Vec<Value>,
    idempotent_creates: HashMap<String, Value>,
}

struct Inner {
    store: RwLock<Store>,
    page_cap: AtomicUsize,
    pending_failures: AtomicU32,
    hits: AtomicUsize,
}

/// In-memory stand-in for the lending service.
///
/// Cloning shares the same state, so a test can keep a handle while the
/// router serves requests.
#[derive(Clone)]
pub struct MockService {
    inner: Arc<Inner>,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(Store::default()),
                page_cap: AtomicUsize::new(SERVICE_MAX_WINDOW),
                pending_failures: AtomicU32::new(0),
                hits: AtomicUsize::new(0),
            }),
        }
    }

    /// A few clients and custom field sets for running the binary by hand.
    pub fn demo() -> Self {
        Self::new()
            .with_custom_field_set(json!({
                "id": "_personal",
                "name": "Personal",
                "type": "STANDARD",
                "availableFor": "CLIENT",
                "customFields": [{"id": "nickname", "name": "Nickname", "state": "ACTIVE"}]
            }))
            .with_record("clients", json!({"id": "C1", "firstName": "Ada", "lastName": "Lovelace"}))
            .with_record("clients", json!({"id": "C2", "firstName": "Alan", "lastName": "Turing"}))
    }

    /// Never return more than `cap` records per window.
    pub fn with_page_cap(self, cap: usize) -> Self {
        self.inner.page_cap.store(cap.clamp(1, SERVICE_MAX_WINDOW), Ordering::SeqCst);
        self
    }

    pub fn with_record(self, prefix: &str, record: Value) -> Self {
        self.write()
            .collections
            .entry(prefix.to_string())
            .or_default()
            .push(record);
        self
    }

    pub fn with_custom_field_set(self, set: Value) -> Self {
        self.write().custom_field_sets.push(set);
        self
    }

    /// Answer the next `count` requests with 503.
    pub fn fail_next(&self, count: u32) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Requests received so far, failed ones included.
    pub fn hits(&self) -> usize {
        self.inner.hits.load(Ordering::SeqCst)
    }

    pub fn reset_hits(&self) {
        self.inner.hits.store(0, Ordering::SeqCst);
    }

    pub fn record(&self, prefix: &str, id: &str) -> Option<Value> {
        self.read()
            .collections
            .get(prefix)
            .and_then(|records| records.iter().find(|r| r["id"] == id).cloned())
    }

    pub fn record_count(&self, prefix: &str) -> usize {
        self.read().collections.get(prefix).map_or(0, Vec::len)
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.inner.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.inner.store.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the request, inject scripted failures and check credentials.
    fn admit(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        self.inner.hits.fetch_add(1, Ordering::SeqCst);

        let pending = self.inner.pending_failures.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        if pending.is_ok() {
            tracing::info!("injecting transient failure");
            return Err(reject(StatusCode::SERVICE_UNAVAILABLE, 503, "SERVICE_UNAVAILABLE"));
        }

        let authorized = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic "));
        if !authorized {
            return Err(reject(StatusCode::UNAUTHORIZED, 2, "INVALID_CREDENTIALS"));
        }
        Ok(())
    }

    fn window(&self, params: &HashMap<String, String>, total: usize) -> (usize, usize) {
        let offset = params
            .get("offset")
            .and_then(|o| o.parse().ok())
            .unwrap_or(0usize)
            .min(total);
        let limit = params
            .get("limit")
            .and_then(|l| l.parse().ok())
            .unwrap_or(DEFAULT_LIMIT)
            .min(self.inner.page_cap.load(Ordering::SeqCst));
        (offset, (offset + limit).min(total))
    }
}

pub fn app(service: MockService) -> Router {
    Router::new()
        .route("/api/customfieldsets", get(list_custom_field_sets))
        .route("/api/{prefix}", get(list_records).post(create_record))
        .route(
            "/api/{prefix}/{id}",
            get(get_record).patch(patch_record).delete(delete_record),
        )
        .with_state(service)
}

pub async fn run(listener: TcpListener, service: MockService) -> Result<(), std::io::Error> {
    axum::serve(listener, app(service)).await
}

async fn list_custom_field_sets(
    State(service): State<MockService>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, Rejection> {
    service.admit(&headers)?;
    let store = service.read();
    let matching: Vec<Value> = store
        .custom_field_sets
        .iter()
        .filter(|set| match params.get("availableFor") {
            Some(owner) => set["availableFor"] == owner.as_str(),
            None => true,
        })
        .cloned()
        .collect();
    let (start, end) = service.window(&params, matching.len());
    Ok(Json(matching[start..end].to_vec()))
}

async fn list_records(
    State(service): State<MockService>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, Rejection> {
    service.admit(&headers)?;
    let store = service.read();
    let records = store.collections.get(&prefix).map(Vec::as_slice).unwrap_or(&[]);
    let (start, end) = service.window(&params, records.len());
    Ok(Json(records[start..end].to_vec()))
}

async fn create_record(
    State(service): State<MockService>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
    Json(mut record): Json<Value>,
) -> Result<(StatusCode, Json<Value>), Rejection> {
    service.admit(&headers)?;
    if !record.is_object() {
        return Err(reject(StatusCode::BAD_REQUEST, 4, "INVALID_PARAMETERS"));
    }
    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut store = service.write();
    if let Some(previous) = key.as_ref().and_then(|k| store.idempotent_creates.get(k)) {
        return Ok((StatusCode::CREATED, Json(previous.clone())));
    }
    if record.get("id").is_none() {
        record["id"] = json!(Uuid::new_v4().to_string());
    }
    store
        .collections
        .entry(prefix)
        .or_default()
        .push(record.clone());
    if let Some(key) = key {
        store.idempotent_creates.insert(key, record.clone());
    }
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_record(
    State(service): State<MockService>,
    Path((prefix, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, Rejection> {
    service.admit(&headers)?;
    service
        .record(&prefix, &id)
        .map(Json)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, 301, "INVALID_ENTITY_ID"))
}

async fn delete_record(
    State(service): State<MockService>,
    Path((prefix, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, Rejection> {
    service.admit(&headers)?;
    let mut store = service.write();
    let records = store.collections.entry(prefix).or_default();
    let before = records.len();
    records.retain(|r| r["id"] != id.as_str());
    if records.len() == before {
        return Err(reject(StatusCode::NOT_FOUND, 301, "INVALID_ENTITY_ID"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Option<Value>,
}

async fn patch_record(
    State(service): State<MockService>,
    Path((prefix, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(ops): Json<Vec<PatchOp>>,
) -> Result<StatusCode, Rejection> {
    service.admit(&headers)?;
    let mut store = service.write();
    let sets = store.custom_field_sets.clone();
    let record = store
        .collections
        .get_mut(&prefix)
        .and_then(|records| records.iter_mut().find(|r| r["id"] == id.as_str()))
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, 301, "INVALID_ENTITY_ID"))?;

    let mut patched = record.clone();
    for op in &ops {
        apply(&mut patched, op, &sets)
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, 4, "INVALID_PARAMETERS"))?;
    }
    *record = patched;
    Ok(StatusCode::NO_CONTENT)
}

/// Apply one operation; `None` when the path or op is invalid.
fn apply(record: &mut Value, op: &PatchOp, sets: &[Value]) -> Option<()> {
    let segments: Vec<&str> = op.path.strip_prefix('/')?.split('/').collect();
    let removing = match op.op.as_str() {
        "add" | "replace" => false,
        "remove" => true,
        _ => return None,
    };

    match segments.as_slice() {
        [field] => {
            let object = record.as_object_mut()?;
            if removing {
                object.shift_remove(*field)?;
            } else {
                object.insert(field.to_string(), op.value.clone()?);
            }
        }
        [set_id, field] => set_custom_value(record, sets, set_id, None, field, op, removing)?,
        [set_id, index, field] => {
            let index = index.parse::<i64>().ok()?;
            set_custom_value(record, sets, set_id, Some(index), field, op, removing)?
        }
        _ => return None,
    }
    Some(())
}

fn set_custom_value(
    record: &mut Value,
    sets: &[Value],
    set_id: &str,
    index: Option<i64>,
    field: &str,
    op: &PatchOp,
    removing: bool,
) -> Option<()> {
    let name = sets
        .iter()
        .filter(|s| s["id"] == set_id)
        .filter_map(|s| s["customFields"].as_array())
        .flatten()
        .find(|f| f["id"] == field)
        .and_then(|f| f["name"].as_str())
        .unwrap_or(field)
        .to_string();
    let group_index = index.unwrap_or(-1);

    let object = record.as_object_mut()?;
    let values = object
        .entry("customFieldValues")
        .or_insert_with(|| json!([]))
        .as_array_mut()?;
    let position = values.iter().position(|v| {
        v["customFieldSetId"] == set_id
            && v["customFieldID"] == field
            && v["customFieldSetGroupIndex"].as_i64().unwrap_or(-1) == group_index
    });

    match (removing, position) {
        (true, Some(at)) => {
            values.remove(at);
        }
        (true, None) => return None,
        (false, Some(at)) => values[at]["value"] = op.value.clone()?,
        (false, None) => values.push(json!({
            "customFieldID": field,
            "customFieldSetId": set_id,
            "customFieldSetGroupIndex": group_index,
            "value": op.value.clone()?,
            "customField": {"id": field, "name": name, "state": "ACTIVE"}
        })),
    }
    Some(())
}
