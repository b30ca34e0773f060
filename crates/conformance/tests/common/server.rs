//! In-memory FHIR server for integration tests.
//!
//! Supports the interactions the harness issues: CRUD, vread, history,
//! search on a handful of parameters, conditional create/update/delete,
//! batch/transaction and the purge endpoint. It runs on its own tokio
//! runtime in a background thread so tests stay synchronous.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::sync::oneshot;

type Key = (String, String);
type Shared = Arc<Mutex<Store>>;

/// Server-side state.
#[derive(Default)]
pub struct Store {
    base_url: String,
    versions: BTreeMap<Key, Vec<Value>>,
    deleted: HashSet<Key>,
    next_id: u64,
    log: Vec<String>,
    purges: Vec<(String, String)>,
}

enum Lookup {
    Live(Value),
    Deleted,
    Unknown,
}

impl Store {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("r{:05}", self.next_id)
    }

    fn store_version(&mut self, resource_type: &str, id: &str, mut resource: Value) -> Value {
        let key = (resource_type.to_string(), id.to_string());
        let versions = self.versions.entry(key.clone()).or_default();
        let version = versions.len() + 1;
        resource["id"] = json!(id);
        resource["meta"] = json!({
            "versionId": version.to_string(),
            "lastUpdated": chrono::Utc::now().to_rfc3339()
        });
        versions.push(resource.clone());
        self.deleted.remove(&key);
        resource
    }

    fn lookup(&self, resource_type: &str, id: &str) -> Lookup {
        let key = (resource_type.to_string(), id.to_string());
        if self.deleted.contains(&key) {
            return Lookup::Deleted;
        }
        match self.versions.get(&key).and_then(|v| v.last()) {
            Some(resource) => Lookup::Live(resource.clone()),
            None => Lookup::Unknown,
        }
    }

    fn mark_deleted(&mut self, resource_type: &str, id: &str) -> bool {
        match self.lookup(resource_type, id) {
            Lookup::Live(_) => {
                self.deleted
                    .insert((resource_type.to_string(), id.to_string()));
                true
            }
            _ => false,
        }
    }

    fn live(&self, resource_type: Option<&str>) -> Vec<Value> {
        self.versions
            .iter()
            .filter(|(key, _)| resource_type.is_none_or(|t| key.0 == t))
            .filter(|(key, _)| !self.deleted.contains(*key))
            .filter_map(|(_, versions)| versions.last().cloned())
            .collect()
    }

    fn search(&self, resource_type: &str, params: &[(String, String)]) -> Vec<Value> {
        self.live(Some(resource_type))
            .into_iter()
            .filter(|resource| matches_all(resource, params))
            .collect()
    }

    fn history(&self, filter: impl Fn(&Key) -> bool) -> Vec<Value> {
        let mut all: Vec<Value> = self
            .versions
            .iter()
            .filter(|(key, _)| filter(*key))
            .flat_map(|(_, versions)| versions.iter().rev().cloned())
            .collect();
        all.sort_by(|a, b| {
            let a = a["meta"]["lastUpdated"].as_str().unwrap_or_default();
            let b = b["meta"]["lastUpdated"].as_str().unwrap_or_default();
            b.cmp(a)
        });
        all
    }

    fn location(&self, resource: &Value) -> String {
        format!(
            "{}/{}/{}/_history/{}",
            self.base_url,
            resource["resourceType"].as_str().unwrap_or_default(),
            resource["id"].as_str().unwrap_or_default(),
            resource["meta"]["versionId"].as_str().unwrap_or_default()
        )
    }
}

/// A running server. Shuts down when dropped.
pub struct TestServer {
    base_url: String,
    store: Shared,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Starts a server on an ephemeral port.
    pub fn start() -> Self {
        let store: Shared = Arc::new(Mutex::new(Store::default()));
        let app = router(store.clone());
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to build test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("failed to bind test server");
                addr_tx
                    .send(listener.local_addr().expect("no local address"))
                    .expect("test thread gone");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("test server failed");
            });
        });

        let addr = addr_rx.recv().expect("test server did not start");
        let base_url = format!("http://{}/fhir", addr);
        store.lock().unwrap().base_url = base_url.clone();

        Self {
            base_url,
            store,
            shutdown: Some(shutdown_tx),
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:41234/fhir`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every request received, as `METHOD /path?query`.
    pub fn requests(&self) -> Vec<String> {
        self.store.lock().unwrap().log.clone()
    }

    /// Requests with the given method.
    pub fn requests_with(&self, method: &str) -> Vec<String> {
        let prefix = format!("{} ", method);
        self.requests()
            .into_iter()
            .filter(|r| r.starts_with(&prefix))
            .collect()
    }

    /// Number of resources that currently exist.
    pub fn live_count(&self) -> usize {
        self.store.lock().unwrap().live(None).len()
    }

    /// `(resource type, key)` of every purge call.
    pub fn purges(&self) -> Vec<(String, String)> {
        self.store.lock().unwrap().purges.clone()
    }

    /// Stores a resource directly, bypassing the HTTP API.
    pub fn seed(&self, resource: Value) -> Value {
        let mut store = self.store.lock().unwrap();
        let resource_type = resource["resourceType"].as_str().unwrap().to_string();
        let id = store.allocate_id();
        store.store_version(&resource_type, &id, resource)
    }

    /// Deletes a resource directly, bypassing the HTTP API.
    pub fn remove(&self, resource_type: &str, id: &str) {
        self.store.lock().unwrap().mark_deleted(resource_type, id);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn router(store: Shared) -> Router {
    Router::new()
        .route("/fhir", post(process_bundle))
        .route("/fhir/_history", get(system_history))
        .route("/fhir/purgeschema/{purge_type}/{key}", get(purge))
        .route(
            "/fhir/{resource_type}",
            get(search)
                .post(create)
                .put(conditional_update)
                .delete(conditional_delete),
        )
        .route("/fhir/{resource_type}/_history", get(type_history))
        .route(
            "/fhir/{resource_type}/{id}",
            get(read).put(update).delete(delete),
        )
        .route("/fhir/{resource_type}/{id}/_history", get(instance_history))
        .route("/fhir/{resource_type}/{id}/_history/{vid}", get(vread))
        .layer(middleware::from_fn_with_state(store.clone(), record))
        .with_state(store)
}

async fn record(State(store): State<Shared>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri());
    store.lock().unwrap().log.push(line);
    next.run(request).await
}

// Responses

fn outcome(status: StatusCode, code: &str, diagnostics: impl Into<String>) -> Response {
    let severity = if status.is_success() {
        "information"
    } else {
        "error"
    };
    (
        status,
        Json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": severity, "code": code, "diagnostics": diagnostics.into()}]
        })),
    )
        .into_response()
}

fn resource_response(store: &Store, status: StatusCode, resource: &Value) -> Response {
    let mut headers = HeaderMap::new();
    let version = resource["meta"]["versionId"].as_str().unwrap_or_default();
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{}\"", version)) {
        headers.insert(header::ETAG, etag);
    }
    if status == StatusCode::CREATED {
        if let Ok(location) = HeaderValue::from_str(&store.location(resource)) {
            headers.insert(header::LOCATION, location);
        }
    }
    (status, headers, Json(resource.clone())).into_response()
}

fn bundle_of(store: &Store, bundle_type: &str, resources: Vec<Value>, total: bool) -> Value {
    let entries: Vec<Value> = resources
        .into_iter()
        .map(|resource| {
            let mut entry = json!({
                "fullUrl": format!(
                    "{}/{}/{}",
                    store.base_url,
                    resource["resourceType"].as_str().unwrap_or_default(),
                    resource["id"].as_str().unwrap_or_default()
                ),
                "resource": resource
            });
            if bundle_type == "searchset" {
                entry["search"] = json!({"mode": "match"});
            }
            entry
        })
        .collect();

    let mut bundle = json!({"resourceType": "Bundle", "type": bundle_type});
    if total {
        bundle["total"] = json!(entries.len());
    }
    if !entries.is_empty() {
        bundle["entry"] = Value::Array(entries);
    }
    bundle
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn parse_resource(body: &[u8], resource_type: &str) -> Result<Value, Response> {
    let resource: Value = serde_json::from_slice(body).map_err(|e| {
        outcome(
            StatusCode::BAD_REQUEST,
            "invalid",
            format!("Invalid JSON: {}", e),
        )
    })?;
    if !resource.is_object() {
        return Err(outcome(
            StatusCode::BAD_REQUEST,
            "invalid",
            "Body must be a JSON object",
        ));
    }
    match resource["resourceType"].as_str() {
        Some(t) if t == resource_type => Ok(resource),
        other => Err(outcome(
            StatusCode::BAD_REQUEST,
            "invalid",
            format!(
                "Resource type {:?} does not match endpoint {}",
                other, resource_type
            ),
        )),
    }
}

// Handlers

async fn create(
    State(store): State<Shared>,
    Path(resource_type): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resource = match parse_resource(&body, &resource_type) {
        Ok(resource) => resource,
        Err(response) => return response,
    };
    let mut store = store.lock().unwrap();

    if let Some(criteria) = headers.get("if-none-exist").and_then(|v| v.to_str().ok()) {
        let matched = store.search(&resource_type, &parse_query(criteria));
        match matched.as_slice() {
            [] => {}
            [existing] => return resource_response(&store, StatusCode::OK, existing),
            _ => {
                return outcome(
                    StatusCode::PRECONDITION_FAILED,
                    "duplicate",
                    "Multiple matches for If-None-Exist",
                );
            }
        }
    }

    let id = store.allocate_id();
    let created = store.store_version(&resource_type, &id, resource);
    resource_response(&store, StatusCode::CREATED, &created)
}

async fn read(
    State(store): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let store = store.lock().unwrap();
    match store.lookup(&resource_type, &id) {
        Lookup::Live(resource) => resource_response(&store, StatusCode::OK, &resource),
        Lookup::Deleted => outcome(
            StatusCode::GONE,
            "deleted",
            format!("{}/{} was deleted", resource_type, id),
        ),
        Lookup::Unknown => outcome(
            StatusCode::NOT_FOUND,
            "not-found",
            format!("{}/{} not found", resource_type, id),
        ),
    }
}

async fn vread(
    State(store): State<Shared>,
    Path((resource_type, id, vid)): Path<(String, String, String)>,
) -> Response {
    let store = store.lock().unwrap();
    let found = store
        .versions
        .get(&(resource_type.clone(), id.clone()))
        .and_then(|versions| {
            versions
                .iter()
                .find(|v| v["meta"]["versionId"].as_str() == Some(vid.as_str()))
        })
        .cloned();
    match found {
        Some(resource) => resource_response(&store, StatusCode::OK, &resource),
        None => outcome(
            StatusCode::NOT_FOUND,
            "not-found",
            format!("{}/{}/_history/{} not found", resource_type, id, vid),
        ),
    }
}

async fn update(
    State(store): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resource = match parse_resource(&body, &resource_type) {
        Ok(resource) => resource,
        Err(response) => return response,
    };
    if resource["id"].as_str() != Some(id.as_str()) {
        return outcome(
            StatusCode::BAD_REQUEST,
            "invalid",
            "Resource id does not match the URL",
        );
    }

    let mut store = store.lock().unwrap();
    let existed = match store.lookup(&resource_type, &id) {
        Lookup::Live(current) => {
            if let Some(expected) = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) {
                let version = current["meta"]["versionId"].as_str().unwrap_or_default();
                if expected != format!("W/\"{}\"", version) {
                    return outcome(
                        StatusCode::PRECONDITION_FAILED,
                        "conflict",
                        format!("Version mismatch: current version is {}", version),
                    );
                }
            }
            true
        }
        _ => false,
    };

    let stored = store.store_version(&resource_type, &id, resource);
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    resource_response(&store, status, &stored)
}

async fn delete(
    State(store): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let mut store = store.lock().unwrap();
    match store.lookup(&resource_type, &id) {
        Lookup::Live(_) => {
            store.mark_deleted(&resource_type, &id);
            StatusCode::NO_CONTENT.into_response()
        }
        Lookup::Deleted => outcome(
            StatusCode::GONE,
            "deleted",
            format!("{}/{} was already deleted", resource_type, id),
        ),
        Lookup::Unknown => outcome(
            StatusCode::NOT_FOUND,
            "not-found",
            format!("{}/{} not found", resource_type, id),
        ),
    }
}

async fn search(
    State(store): State<Shared>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = parse_query(query.as_deref().unwrap_or_default());
    let store = store.lock().unwrap();
    let mut matched = store.search(&resource_type, &params);
    if let Some(count) = params
        .iter()
        .find(|(name, _)| name == "_count")
        .and_then(|(_, value)| value.parse::<usize>().ok())
    {
        matched.truncate(count);
    }
    Json(bundle_of(&store, "searchset", matched, true)).into_response()
}

async fn conditional_update(
    State(store): State<Shared>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let resource = match parse_resource(&body, &resource_type) {
        Ok(resource) => resource,
        Err(response) => return response,
    };
    let params = parse_query(query.as_deref().unwrap_or_default());
    let mut store = store.lock().unwrap();
    let matched = store.search(&resource_type, &params);

    let (id, status) = match matched.as_slice() {
        [] => {
            let id = match resource["id"].as_str() {
                Some(id) => id.to_string(),
                None => store.allocate_id(),
            };
            (id, StatusCode::CREATED)
        }
        [existing] => {
            let id = existing["id"].as_str().unwrap_or_default().to_string();
            if resource["id"].as_str().is_some_and(|body_id| body_id != id) {
                return outcome(
                    StatusCode::BAD_REQUEST,
                    "invalid",
                    "Resource id does not match the matched resource",
                );
            }
            (id, StatusCode::OK)
        }
        _ => {
            return outcome(
                StatusCode::PRECONDITION_FAILED,
                "multiple-matches",
                "Multiple matches for conditional update",
            );
        }
    };

    let stored = store.store_version(&resource_type, &id, resource);
    resource_response(&store, status, &stored)
}

async fn conditional_delete(
    State(store): State<Shared>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = parse_query(query.as_deref().unwrap_or_default());
    let mut store = store.lock().unwrap();
    for resource in store.search(&resource_type, &params) {
        let id = resource["id"].as_str().unwrap_or_default().to_string();
        store.mark_deleted(&resource_type, &id);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn instance_history(
    State(store): State<Shared>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Response {
    let store = store.lock().unwrap();
    let key = (resource_type.clone(), id.clone());
    if !store.versions.contains_key(&key) {
        return outcome(
            StatusCode::NOT_FOUND,
            "not-found",
            format!("{}/{} not found", resource_type, id),
        );
    }
    let versions = store.history(|k| *k == key);
    Json(bundle_of(&store, "history", versions, true)).into_response()
}

async fn type_history(
    State(store): State<Shared>,
    Path(resource_type): Path<String>,
) -> Response {
    let store = store.lock().unwrap();
    let versions = store.history(|k| k.0 == resource_type);
    Json(bundle_of(&store, "history", versions, true)).into_response()
}

async fn system_history(State(store): State<Shared>, RawQuery(query): RawQuery) -> Response {
    let params = parse_query(query.as_deref().unwrap_or_default());
    let store = store.lock().unwrap();
    let mut versions = store.history(|_| true);
    if let Some(count) = params
        .iter()
        .find(|(name, _)| name == "_count")
        .and_then(|(_, value)| value.parse::<usize>().ok())
    {
        versions.truncate(count);
    }
    Json(bundle_of(&store, "history", versions, true)).into_response()
}

async fn purge(
    State(store): State<Shared>,
    Path((purge_type, key)): Path<(String, String)>,
) -> Response {
    let mut store = store.lock().unwrap();
    let gone: Vec<Key> = store
        .deleted
        .iter()
        .filter(|k| k.0 == purge_type)
        .cloned()
        .collect();
    for k in &gone {
        store.versions.remove(k);
        store.deleted.remove(k);
    }
    store.purges.push((purge_type.clone(), key));
    outcome(
        StatusCode::OK,
        "informational",
        format!("Purged {} deleted {} resource(s)", gone.len(), purge_type),
    )
}

// Batch and transaction

enum Plan {
    Create(String),
    Existing(Value),
    Other,
}

async fn process_bundle(State(store): State<Shared>, body: Bytes) -> Response {
    let bundle = match parse_resource(&body, "Bundle") {
        Ok(bundle) => bundle,
        Err(response) => return response,
    };
    let is_transaction = match bundle["type"].as_str() {
        Some("transaction") => true,
        Some("batch") => false,
        other => {
            return outcome(
                StatusCode::BAD_REQUEST,
                "invalid",
                format!("Bundle type {:?} cannot be processed", other),
            );
        }
    };
    let entries = bundle["entry"].as_array().cloned().unwrap_or_default();

    if is_transaction {
        if let Some(problem) = entries.iter().find_map(entry_problem) {
            return outcome(StatusCode::BAD_REQUEST, "invalid", problem);
        }
    }

    let mut store = store.lock().unwrap();

    // Assign ids first so entries can reference each other by fullUrl.
    let mut references = HashMap::new();
    let mut plans = Vec::with_capacity(entries.len());
    for entry in &entries {
        let method = entry["request"]["method"].as_str().unwrap_or_default();
        let url = entry["request"]["url"].as_str().unwrap_or_default();
        let plan = if method == "POST" {
            let existing = entry["request"]["ifNoneExist"]
                .as_str()
                .map(|criteria| store.search(url, &parse_query(criteria)))
                .and_then(|matched| matched.into_iter().next());
            match existing {
                Some(resource) => Plan::Existing(resource),
                None => Plan::Create(store.allocate_id()),
            }
        } else {
            Plan::Other
        };

        if let Some(full_url) = entry["fullUrl"].as_str() {
            let target = match &plan {
                Plan::Create(id) => Some(format!("{}/{}", url, id)),
                Plan::Existing(resource) => Some(format!(
                    "{}/{}",
                    url,
                    resource["id"].as_str().unwrap_or_default()
                )),
                Plan::Other => None,
            };
            if let Some(target) = target {
                references.insert(full_url.to_string(), target);
            }
        }
        plans.push(plan);
    }

    let mut responses = Vec::with_capacity(entries.len());
    for (entry, plan) in entries.iter().zip(plans) {
        if let Some(problem) = entry_problem(entry) {
            responses.push(json!({
                "response": {"status": "400 Bad Request"},
                "resource": {
                    "resourceType": "OperationOutcome",
                    "issue": [{"severity": "error", "code": "invalid", "diagnostics": problem}]
                }
            }));
            continue;
        }

        let mut resource = entry["resource"].clone();
        rewrite_references(&mut resource, &references);
        let method = entry["request"]["method"].as_str().unwrap_or_default();
        let url = entry["request"]["url"].as_str().unwrap_or_default();

        let response = match (method, plan) {
            ("POST", Plan::Create(id)) => {
                let stored = store.store_version(url, &id, resource);
                entry_response("201 Created", Some(&store.location(&stored)), Some(stored))
            }
            ("POST", Plan::Existing(existing)) => {
                entry_response("200 OK", Some(&store.location(&existing)), Some(existing))
            }
            ("PUT", _) => {
                let (resource_type, id) = url.split_once('/').unwrap_or((url, ""));
                let existed = matches!(store.lookup(resource_type, id), Lookup::Live(_));
                let stored = store.store_version(resource_type, id, resource);
                let status = if existed { "200 OK" } else { "201 Created" };
                entry_response(status, Some(&store.location(&stored)), Some(stored))
            }
            ("DELETE", _) => {
                let (resource_type, id) = url.split_once('/').unwrap_or((url, ""));
                if store.mark_deleted(resource_type, id) {
                    entry_response("204 No Content", None, None)
                } else {
                    entry_response("404 Not Found", None, None)
                }
            }
            ("GET", _) => {
                let (resource_type, id) = url.split_once('/').unwrap_or((url, ""));
                match store.lookup(resource_type, id) {
                    Lookup::Live(found) => entry_response("200 OK", None, Some(found)),
                    _ => entry_response("404 Not Found", None, None),
                }
            }
            _ => entry_response("405 Method Not Allowed", None, None),
        };
        responses.push(response);
    }

    let response_type = if is_transaction {
        "transaction-response"
    } else {
        "batch-response"
    };
    Json(json!({
        "resourceType": "Bundle",
        "type": response_type,
        "entry": responses
    }))
    .into_response()
}

fn entry_problem(entry: &Value) -> Option<String> {
    let method = entry["request"]["method"].as_str()?;
    let url = entry["request"]["url"].as_str().unwrap_or_default();
    match method {
        "POST" if entry["resource"]["resourceType"].as_str() != Some(url) => Some(format!(
            "POST entry for {} carries a {:?}",
            url,
            entry["resource"]["resourceType"].as_str()
        )),
        "PUT" if entry["resource"]["resourceType"].as_str().is_none() => {
            Some(format!("PUT entry for {} has no resource", url))
        }
        "POST" | "PUT" | "DELETE" | "GET" => None,
        other => Some(format!("unsupported method {}", other)),
    }
}

fn entry_response(status: &str, location: Option<&str>, resource: Option<Value>) -> Value {
    let mut entry = json!({"response": {"status": status}});
    if let Some(location) = location {
        entry["response"]["location"] = json!(location);
    }
    if let Some(resource) = resource {
        entry["resource"] = resource;
    }
    entry
}

fn rewrite_references(value: &mut Value, references: &HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "reference" {
                    if let Some(target) = child.as_str().and_then(|r| references.get(r)) {
                        *child = json!(target);
                        continue;
                    }
                }
                rewrite_references(child, references);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, references);
            }
        }
        _ => {}
    }
}

// Search matching

fn matches_all(resource: &Value, params: &[(String, String)]) -> bool {
    params.iter().all(|(name, value)| {
        let (base, modifier) = match name.split_once(':') {
            Some((base, modifier)) => (base, Some(modifier)),
            None => (name.as_str(), None),
        };
        if base.starts_with('_') && base != "_id" {
            return true;
        }
        value
            .split(',')
            .any(|candidate| matches_value(resource, base, modifier, candidate))
    })
}

fn matches_value(resource: &Value, base: &str, modifier: Option<&str>, candidate: &str) -> bool {
    let names = || items(resource, "name");
    match base {
        "_id" => resource["id"].as_str() == Some(candidate),
        "family" => names().any(|n| text_matches(&n["family"], candidate, modifier)),
        "given" => names().any(|n| items(n, "given").any(|g| text_matches(g, candidate, modifier))),
        "name" => names().any(|n| {
            text_matches(&n["family"], candidate, modifier)
                || items(n, "given").any(|g| text_matches(g, candidate, modifier))
        }),
        "identifier" => items(resource, "identifier")
            .any(|i| token_matches(&i["system"], &i["value"], candidate)),
        "code" => items(&resource["code"], "coding")
            .any(|c| token_matches(&c["system"], &c["code"], candidate)),
        "subject" | "patient" => resource["subject"]["reference"].as_str() == Some(candidate),
        "status" | "gender" => resource[base].as_str() == Some(candidate),
        "birthdate" => date_matches(&resource["birthDate"], candidate),
        _ => false,
    }
}

fn items<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value[key].as_array().into_iter().flatten()
}

fn text_matches(value: &Value, candidate: &str, modifier: Option<&str>) -> bool {
    let Some(text) = value.as_str() else {
        return false;
    };
    match modifier {
        Some("exact") => text == candidate,
        Some("contains") => text.to_lowercase().contains(&candidate.to_lowercase()),
        _ => text.to_lowercase().starts_with(&candidate.to_lowercase()),
    }
}

fn token_matches(system: &Value, code: &Value, candidate: &str) -> bool {
    match candidate.split_once('|') {
        Some(("", wanted)) => system.is_null() && code.as_str() == Some(wanted),
        Some((wanted_system, "")) => system.as_str() == Some(wanted_system),
        Some((wanted_system, wanted)) => {
            system.as_str() == Some(wanted_system) && code.as_str() == Some(wanted)
        }
        None => code.as_str() == Some(candidate),
    }
}

fn date_matches(value: &Value, candidate: &str) -> bool {
    let Some(date) = value.as_str() else {
        return false;
    };
    let (prefix, wanted) = match candidate.get(..2) {
        Some(p @ ("eq" | "ne" | "gt" | "lt" | "ge" | "le")) => (p, &candidate[2..]),
        _ => ("eq", candidate),
    };
    let date = &date[..date.len().min(wanted.len())];
    match prefix {
        "ne" => date != wanted,
        "gt" => date > wanted,
        "lt" => date < wanted,
        "ge" => date >= wanted,
        "le" => date <= wanted,
        _ => date == wanted,
    }
}
