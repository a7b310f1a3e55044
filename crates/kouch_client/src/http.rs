//! HTTP client for CouchDB servers, built on reqwest.

use crate::body::RawJson;
use crate::dsn::{encode_db, encode_doc_id, Dsn};
use crate::error::{ClientError, ClientResult};
use crate::transport::{ChangeStream, Client, Database, OpenRevStream, RevsDiffStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use kouch_protocol::{
    Change, ChangesOptions, Document, FeedDecoder, GetOptions, Manifest, OpenRev, OpenRevs,
    PutOptions, RevisionId, RevsDiffEntry, SecurityObject, Seq,
};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Transport timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpConfig {
    /// Bounds each request, from sending to the end of the response body.
    pub request_timeout: Option<Duration>,
    /// Bounds TCP connection establishment.
    pub connect_timeout: Option<Duration>,
}

impl HttpConfig {
    /// Creates a configuration with no timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    fn build(&self) -> ClientResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| ClientError::usage(format!("failed to build HTTP client: {e}")))
    }
}

/// Shared connection state: the pooled reqwest client, base URL and
/// credentials.
#[derive(Debug, Clone)]
struct Endpoint {
    http: reqwest::Client,
    base: String,
    user: Option<String>,
    password: Option<String>,
}

impl Endpoint {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        debug!(%method, %url, "request");
        let builder = self.http.request(method, url);
        match &self.user {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    /// Sends a request, turning non-2xx responses into errors.
    async fn send(&self, builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(ClientError::from_status(status.as_u16(), &body))
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let body = self.send(builder).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Data(e.to_string()))
    }

    async fn raw(&self, builder: RequestBuilder) -> ClientResult<RawJson> {
        RawJson::from_bytes(self.send(builder).await?.bytes().await?)
    }

    async fn exists(&self, path: &str) -> ClientResult<bool> {
        match self.send(self.request(Method::HEAD, path)).await {
            Ok(_) => Ok(true),
            Err(ClientError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// A CouchDB server reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClient {
    endpoint: Endpoint,
}

impl HttpClient {
    /// Connects to the server named by a DSN. No request is made.
    pub fn new(dsn: &Dsn, config: &HttpConfig) -> ClientResult<Self> {
        Ok(Self {
            endpoint: Endpoint {
                http: config.build()?,
                base: dsn.server_base().to_string(),
                user: dsn.user().map(str::to_string),
                password: dsn.password().map(str::to_string),
            },
        })
    }

    /// Parses a DSN and connects to its server.
    pub fn connect(dsn: &str, config: &HttpConfig) -> ClientResult<Self> {
        Self::new(&Dsn::parse(dsn)?, config)
    }

    /// Returns a concrete handle to a database.
    pub fn database(&self, name: &str) -> HttpDatabase {
        HttpDatabase {
            endpoint: self.endpoint.clone(),
            name: name.to_string(),
            path: format!("/{}", encode_db(name)),
        }
    }
}

#[async_trait]
impl Client for HttpClient {
    fn dsn(&self) -> String {
        self.endpoint.base.clone()
    }

    fn db(&self, name: &str) -> ClientResult<Arc<dyn Database>> {
        if name.is_empty() {
            return Err(ClientError::usage("database name required"));
        }
        Ok(Arc::new(self.database(name)))
    }

    async fn version(&self) -> ClientResult<RawJson> {
        self.endpoint
            .raw(self.endpoint.request(Method::GET, "/"))
            .await
    }

    async fn ping(&self) -> ClientResult<bool> {
        match self.endpoint.send(self.endpoint.request(Method::GET, "/_up")).await {
            Ok(_) => Ok(true),
            // Servers older than 2.0 have no /_up endpoint.
            Err(ClientError::NotFound(_)) => self.version().await.map(|_| true),
            Err(ClientError::Transient {
                status: Some(_), ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_db(&self, name: &str) -> ClientResult<()> {
        self.database(name).create().await
    }

    async fn destroy_db(&self, name: &str) -> ClientResult<()> {
        self.database(name).destroy().await
    }

    async fn db_exists(&self, name: &str) -> ClientResult<bool> {
        self.database(name).exists().await
    }

    async fn cluster_setup(&self, body: Value) -> ClientResult<RawJson> {
        let request = self
            .endpoint
            .request(Method::POST, "/_cluster_setup")
            .json(&body);
        self.endpoint.raw(request).await
    }
}

/// A database reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDatabase {
    endpoint: Endpoint,
    name: String,
    path: String,
}

#[derive(Deserialize)]
struct WriteResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    rev: Option<RevisionId>,
}

impl HttpDatabase {
    fn doc_path(&self, doc_id: &str) -> String {
        format!("{}/{}", self.path, encode_doc_id(doc_id))
    }

    fn sub_path(&self, endpoint: &str) -> String {
        format!("{}/{}", self.path, endpoint)
    }
}

#[async_trait]
impl Database for HttpDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> ClientResult<RawJson> {
        self.endpoint
            .raw(self.endpoint.request(Method::GET, &self.path))
            .await
    }

    async fn exists(&self) -> ClientResult<bool> {
        self.endpoint.exists(&self.path).await
    }

    async fn create(&self) -> ClientResult<()> {
        self.endpoint
            .send(self.endpoint.request(Method::PUT, &self.path))
            .await
            .map(|_| ())
    }

    async fn destroy(&self) -> ClientResult<()> {
        self.endpoint
            .send(self.endpoint.request(Method::DELETE, &self.path))
            .await
            .map(|_| ())
    }

    async fn changes(&self, opts: ChangesOptions) -> ClientResult<ChangeStream> {
        let path = self.sub_path("_changes");
        let request = match opts.body() {
            Some(body) => self.endpoint.request(Method::POST, &path).json(&body),
            None => self.endpoint.request(Method::GET, &path),
        }
        .query(&opts.to_query());
        let response = self.endpoint.send(request).await?;

        let last_seq = Arc::new(Mutex::new(None));
        let feed = FeedState {
            body: response.bytes_stream().boxed(),
            decoder: Some(FeedDecoder::new()),
            pending: VecDeque::new(),
            last_seq: Arc::clone(&last_seq),
        };
        Ok(ChangeStream::new(feed.into_stream(), last_seq))
    }

    async fn revs_diff(&self, manifest: &Manifest) -> ClientResult<RevsDiffStream> {
        if manifest.is_empty() {
            return Ok(stream::empty().boxed());
        }
        let request = self
            .endpoint
            .request(Method::POST, &self.sub_path("_revs_diff"))
            .json(manifest);
        let body = self.endpoint.send(request).await?.bytes().await?;
        let entries = RevsDiffEntry::decode_response(&body)?;
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn get(&self, doc_id: &str, opts: GetOptions) -> ClientResult<Document> {
        let request = self
            .endpoint
            .request(Method::GET, &self.doc_path(doc_id))
            .query(&opts.to_query());
        let body = self.endpoint.send(request).await?.bytes().await?;
        Ok(Document::from_slice(&body)?)
    }

    async fn get_raw(&self, doc_id: &str, opts: GetOptions) -> ClientResult<RawJson> {
        let request = self
            .endpoint
            .request(Method::GET, &self.doc_path(doc_id))
            .query(&opts.to_query());
        self.endpoint.raw(request).await
    }

    async fn open_revs(
        &self,
        doc_id: &str,
        revs: OpenRevs,
        opts: GetOptions,
    ) -> ClientResult<OpenRevStream> {
        let mut query = vec![("open_revs".to_string(), revs.to_query_value())];
        query.extend(opts.to_query());
        let request = self
            .endpoint
            .request(Method::GET, &self.doc_path(doc_id))
            .header(ACCEPT, "application/json")
            .query(&query);
        let leaves: Vec<OpenRev> = self.endpoint.json(request).await?;
        let doc_id = doc_id.to_string();
        Ok(stream::iter(leaves.into_iter().map(move |leaf| match leaf {
            OpenRev::Found(doc) => Ok(doc),
            OpenRev::Missing(rev) => Err(ClientError::not_found(format!(
                "Not Found: missing revision {rev} of {doc_id}"
            ))),
        }))
        .boxed())
    }

    async fn put(
        &self,
        doc_id: &str,
        doc: Document,
        opts: PutOptions,
    ) -> ClientResult<RevisionId> {
        let supplied = doc.rev()?;
        let request = self
            .endpoint
            .request(Method::PUT, &self.doc_path(doc_id))
            .query(&opts.to_query())
            .json(&doc);
        let response: WriteResponse = self.endpoint.json(request).await?;
        response
            .rev
            .or(supplied)
            .ok_or_else(|| ClientError::Data(format!("no revision returned for {doc_id}")))
    }

    async fn create_doc(
        &self,
        doc: Document,
        opts: PutOptions,
    ) -> ClientResult<(String, RevisionId)> {
        let request = self
            .endpoint
            .request(Method::POST, &self.path)
            .query(&opts.to_query())
            .json(&doc);
        let response: WriteResponse = self.endpoint.json(request).await?;
        match (response.id, response.rev) {
            (Some(id), Some(rev)) => Ok((id, rev)),
            _ => Err(ClientError::Data("incomplete response to document create".into())),
        }
    }

    async fn delete(&self, doc_id: &str, rev: &RevisionId) -> ClientResult<RevisionId> {
        let request = self
            .endpoint
            .request(Method::DELETE, &self.doc_path(doc_id))
            .query(&[("rev", rev.to_string())]);
        let response: WriteResponse = self.endpoint.json(request).await?;
        response
            .rev
            .ok_or_else(|| ClientError::Data(format!("no revision returned for {doc_id}")))
    }

    async fn security(&self) -> ClientResult<SecurityObject> {
        self.endpoint
            .json(self.endpoint.request(Method::GET, &self.sub_path("_security")))
            .await
    }

    async fn set_security(&self, security: &SecurityObject) -> ClientResult<()> {
        let request = self
            .endpoint
            .request(Method::PUT, &self.sub_path("_security"))
            .json(security);
        self.endpoint.send(request).await.map(|_| ())
    }

    async fn compact(&self) -> ClientResult<()> {
        let request = self
            .endpoint
            .request(Method::POST, &self.sub_path("_compact"))
            .header(CONTENT_TYPE, "application/json");
        self.endpoint.send(request).await.map(|_| ())
    }
}

/// State of a changes response being decoded.
struct FeedState {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: Option<FeedDecoder>,
    pending: VecDeque<Change>,
    last_seq: Arc<Mutex<Option<Seq>>>,
}

impl FeedState {
    /// Pulls body chunks only as fast as changes are consumed.
    fn into_stream(self) -> BoxStream<'static, ClientResult<Change>> {
        stream::unfold(self, |mut state| async move {
            loop {
                if let Some(change) = state.pending.pop_front() {
                    return Some((Ok(change), state));
                }
                if state.decoder.is_none() {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        let decoder = state.decoder.as_mut()?;
                        match decoder.push(&chunk) {
                            Ok(changes) => state.pending.extend(changes),
                            Err(e) => {
                                state.decoder = None;
                                return Some((Err(e.into()), state));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.decoder = None;
                        return Some((Err(e.into()), state));
                    }
                    None => {
                        let decoder = state.decoder.take()?;
                        match decoder.finish() {
                            Ok(seq) => *state.last_seq.lock() = seq,
                            Err(e) => return Some((Err(e.into()), state)),
                        }
                    }
                }
            }
        })
        .boxed()
    }
}
