//! A fake CouchDB server for end-to-end tests.
//!
//! [`FakeCouch`] serves the subset of the CouchDB HTTP API used by the client
//! on `127.0.0.1:0`, backed by a [`MemoryClient`]. Every request is recorded,
//! and canned responses can be queued ahead of the real handler to simulate
//! server errors.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::TryStreamExt;
use kouch_client::{Client, ClientError, ClientResult, Database, MemoryClient, RawJson};
use kouch_protocol::{
    ChangesOptions, Document, GetOptions, Manifest, OpenRevs, Options, PutOptions, RevisionId,
    RevsDiffEntry, SecurityObject,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A request received by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, still percent-encoded.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// Request body.
    pub body: Vec<u8>,
    /// `Content-Type` header.
    pub content_type: Option<String>,
    /// `Accept` header.
    pub accept: Option<String>,
    /// `Authorization` header.
    pub authorization: Option<String>,
}

impl RecordedRequest {
    /// Parses the body as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Returns a query parameter, decoded.
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then(|| {
                urlencoding::decode(&v.replace('+', " "))
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| v.to_string())
            })
        })
    }
}

#[derive(Clone)]
struct ServerState {
    client: MemoryClient,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    canned: Arc<Mutex<VecDeque<(u16, Bytes)>>>,
}

/// A CouchDB lookalike listening on an ephemeral local port.
pub struct FakeCouch {
    addr: SocketAddr,
    state: ServerState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for FakeCouch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCouch")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl FakeCouch {
    /// Starts a server with no databases.
    pub async fn start() -> std::io::Result<Self> {
        Self::with_client(MemoryClient::new()).await
    }

    /// Starts a server in front of an existing in-memory client.
    pub async fn with_client(client: MemoryClient) -> std::io::Result<Self> {
        let state = ServerState {
            client,
            log: Arc::new(Mutex::new(Vec::new())),
            canned: Arc::new(Mutex::new(VecDeque::new())),
        };
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            _task: task,
        })
    }

    /// Server root URL, e.g. `http://127.0.0.1:12345`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of a database.
    pub fn db_url(&self, db: &str) -> String {
        format!("{}/{}", self.url(), db)
    }

    /// The in-memory server behind the HTTP front.
    pub fn client(&self) -> &MemoryClient {
        &self.state.client
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.log.lock().clone()
    }

    /// Requests received for one path.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state
            .log
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Queues a canned response; it is served to the next request instead of
    /// the real handler.
    pub fn respond_with(&self, status: u16, body: Value) {
        self.respond_raw(status, body.to_string());
    }

    /// Queues a canned response whose body is sent byte for byte.
    pub fn respond_raw(&self, status: u16, body: impl Into<Bytes>) {
        self.state.canned.lock().push_back((status, body.into()));
    }
}

impl Drop for FakeCouch {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_type = header_str(header::CONTENT_TYPE);
    state.log.lock().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body: body.to_vec(),
        content_type: content_type.clone(),
        accept: header_str(header::ACCEPT),
        authorization: header_str(header::AUTHORIZATION),
    });

    let canned = state.canned.lock().pop_front();
    if let Some((status, body)) = canned {
        return reply_bytes(status, body);
    }

    let path: Vec<String> = uri
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();
    let request = Request {
        method,
        query,
        content_type,
        body,
    };
    match route(&state.client, &path, &request).await {
        Ok(response) => response,
        Err(e) => error_reply(&e),
    }
}

struct Request {
    method: Method,
    query: HashMap<String, String>,
    content_type: Option<String>,
    body: Bytes,
}

impl Request {
    fn json<T: serde::de::DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Data(format!("Bad Request: invalid JSON: {e}")))
    }

    /// Query parameters as an option bag; values that parse as JSON are
    /// stored decoded.
    fn options(&self) -> Options {
        self.query
            .iter()
            .map(|(k, v)| {
                let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
                (k.clone(), value)
            })
            .collect()
    }
}

async fn route(client: &MemoryClient, path: &[String], req: &Request) -> ClientResult<Response> {
    match (req.method.as_str(), path) {
        ("GET", []) => Ok(reply_raw(200, client.version().await?)),
        ("GET", [up]) if up == "_up" => Ok(reply(200, json!({"status": "ok"}))),
        ("POST", [setup]) if setup == "_cluster_setup" => {
            Ok(reply_raw(201, client.cluster_setup(req.json()?).await?))
        }
        (_, [db]) => database(&client.database(db), req).await,
        (_, [db, endpoint]) if is_endpoint(endpoint) => {
            db_endpoint(&client.database(db), endpoint, req).await
        }
        (_, [db, rest @ ..]) if !rest.is_empty() => {
            document(&client.database(db), &rest.join("/"), req).await
        }
        _ => Err(ClientError::not_found("Not Found: missing")),
    }
}

fn is_endpoint(segment: &str) -> bool {
    segment.starts_with('_') && segment != "_design" && segment != "_local"
}

async fn database(db: &dyn Database, req: &Request) -> ClientResult<Response> {
    match req.method {
        Method::GET => Ok(reply_raw(200, db.info().await?)),
        Method::HEAD => {
            if db.exists().await? {
                Ok(StatusCode::OK.into_response())
            } else {
                Ok(StatusCode::NOT_FOUND.into_response())
            }
        }
        Method::PUT => {
            db.create().await?;
            Ok(reply(201, json!({"ok": true})))
        }
        Method::DELETE => {
            db.destroy().await?;
            Ok(reply(200, json!({"ok": true})))
        }
        Method::POST => {
            let doc: Document = req.json()?;
            let (id, rev) = db
                .create_doc(doc, PutOptions::from_options(req.options()))
                .await?;
            Ok(reply(201, json!({"ok": true, "id": id, "rev": rev})))
        }
        _ => Err(method_not_allowed()),
    }
}

async fn db_endpoint(db: &dyn Database, endpoint: &str, req: &Request) -> ClientResult<Response> {
    match (endpoint, &req.method) {
        ("_changes", &Method::GET | &Method::POST) => {
            let mut opts = ChangesOptions::replication();
            opts.style = "main_only".to_string();
            if let Some(feed) = req.query.get("feed") {
                opts.feed = feed.clone();
            }
            if let Some(style) = req.query.get("style") {
                opts.style = style.clone();
            }
            if let Some(since) = req.query.get("since") {
                opts.since = since.clone();
            }
            match req.query.get("filter").map(String::as_str) {
                Some("_doc_ids") => {
                    let body: Value = req.json()?;
                    opts.doc_ids = body
                        .get("doc_ids")
                        .and_then(Value::as_array)
                        .map(|ids| {
                            ids.iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                }
                Some(filter) => opts.filter = Some(filter.to_string()),
                None => {}
            }
            let mut stream = db.changes(opts).await?;
            let mut results = Vec::new();
            while let Some(change) = stream.try_next().await? {
                let value =
                    serde_json::to_value(&change).map_err(|e| ClientError::Data(e.to_string()))?;
                results.push(value);
            }
            let last_seq = stream.last_seq().map(|s| s.0).unwrap_or(json!(0));
            Ok(reply(
                200,
                json!({"results": results, "last_seq": last_seq, "pending": 0}),
            ))
        }
        ("_revs_diff", &Method::POST) => {
            let requested: Map<String, Value> = req.json()?;
            let mut manifest = Manifest::new();
            for (id, revs) in requested {
                let revs: Vec<RevisionId> = serde_json::from_value(revs)
                    .map_err(|e| ClientError::Data(format!("Bad Request: {e}")))?;
                manifest.add(&id, &revs);
            }
            let entries: Vec<RevsDiffEntry> = db.revs_diff(&manifest).await?.try_collect().await?;
            let mut out = Map::new();
            for entry in entries {
                let value =
                    serde_json::to_value(&entry).map_err(|e| ClientError::Data(e.to_string()))?;
                out.insert(entry.id, value);
            }
            Ok(reply(200, Value::Object(out)))
        }
        ("_security", &Method::GET) => {
            let security = db.security().await?;
            Ok(reply(200, json!(security)))
        }
        ("_security", &Method::PUT) => {
            let security: SecurityObject = req.json()?;
            db.set_security(&security).await?;
            Ok(reply(200, json!({"ok": true})))
        }
        ("_compact", &Method::POST) => {
            if req.content_type.as_deref() != Some("application/json") {
                return Err(ClientError::from_status(
                    415,
                    br#"{"error":"bad_content_type","reason":"Content-Type must be application/json"}"#,
                ));
            }
            db.compact().await?;
            Ok(reply(202, json!({"ok": true})))
        }
        _ => Err(ClientError::not_found("Not Found: missing")),
    }
}

async fn document(db: &dyn Database, doc_id: &str, req: &Request) -> ClientResult<Response> {
    let mut opts = req.options();
    match req.method {
        Method::GET => {
            let open_revs = opts.remove("open_revs");
            let get = GetOptions::from_options(opts)?;
            let Some(open_revs) = open_revs else {
                let doc = db.get(doc_id, get).await?;
                return Ok(reply(200, doc.into_value()));
            };
            let requested = match open_revs {
                Value::String(s) if s == "all" => OpenRevs::All,
                other => OpenRevs::Revs(
                    serde_json::from_value(other)
                        .map_err(|e| ClientError::Data(format!("Bad Request: {e}")))?,
                ),
            };
            let wanted = match &requested {
                OpenRevs::All => Vec::new(),
                OpenRevs::Revs(revs) => revs.clone(),
            };
            let results: Vec<ClientResult<Document>> =
                futures::StreamExt::collect(db.open_revs(doc_id, requested, get).await?).await;
            let mut out = Vec::new();
            for (i, result) in results.into_iter().enumerate() {
                match result {
                    Ok(doc) => out.push(json!({"ok": doc})),
                    Err(ClientError::NotFound(_)) if i < wanted.len() => {
                        out.push(json!({"missing": wanted[i]}))
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(reply(200, Value::Array(out)))
        }
        Method::PUT => {
            let doc: Document = req.json()?;
            let rev = db
                .put(doc_id, doc, PutOptions::from_options(opts))
                .await?;
            Ok(reply(201, json!({"ok": true, "id": doc_id, "rev": rev})))
        }
        Method::DELETE => {
            let rev = opts
                .get_str("rev")
                .ok_or_else(|| ClientError::conflict("Conflict: Document update conflict."))
                .and_then(|r| Ok(RevisionId::parse(r)?))?;
            let rev = db.delete(doc_id, &rev).await?;
            Ok(reply(200, json!({"ok": true, "id": doc_id, "rev": rev})))
        }
        _ => Err(method_not_allowed()),
    }
}

fn method_not_allowed() -> ClientError {
    ClientError::from_status(
        405,
        br#"{"error":"method_not_allowed","reason":"Only GET,PUT,DELETE allowed"}"#,
    )
}

fn reply(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn reply_raw(status: u16, body: RawJson) -> Response {
    reply_bytes(status, body.bytes().clone())
}

fn reply_bytes(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_reply(err: &ClientError) -> Response {
    let status = match err {
        ClientError::Transient { status: None, .. } => 503,
        ClientError::Canceled | ClientError::Io(_) => 500,
        ClientError::Usage(_) => 400,
        other => other.status().unwrap_or(500),
    };
    let error = match status {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        405 => "method_not_allowed",
        409 => "conflict",
        412 => "file_exists",
        415 => "bad_content_type",
        _ => "unknown_error",
    };
    let message = err.to_string();
    let reason = message
        .split_once(": ")
        .map(|(_, reason)| reason.to_string())
        .unwrap_or(message);
    reply(status, json!({"error": error, "reason": reason}))
}
