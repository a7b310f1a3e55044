//! HTTP client tests against the fake server.

use futures::TryStreamExt;
use kouch_client::{Client, ClientError, Database, Dsn, HttpClient, HttpConfig, MemoryClient};
use kouch_protocol::{
    Change, ChangesOptions, Document, GetOptions, Manifest, OpenRevs, PutOptions, RevsDiffEntry,
    SecurityObject,
};
use kouch_testkit::{doc, put_replicated, rev, seed, seed_numbered, FakeCouch, FOO_REV};
use serde_json::json;

async fn server(dbs: &[&str]) -> (FakeCouch, HttpClient) {
    let couch = FakeCouch::with_client(MemoryClient::with_dbs(dbs))
        .await
        .unwrap();
    let client = HttpClient::connect(&couch.url(), &HttpConfig::default()).unwrap();
    (couch, client)
}

#[tokio::test]
async fn version_and_ping() {
    let (couch, client) = server(&[]).await;
    let version = client.version().await.unwrap();
    assert_eq!(version.value()["couchdb"], "Welcome");
    assert!(client.ping().await.unwrap());
    assert_eq!(couch.requests_to("/_up").len(), 1);
}

#[tokio::test]
async fn ping_falls_back_to_root() {
    let (couch, client) = server(&[]).await;
    couch.respond_with(404, json!({"error": "not_found", "reason": "missing"}));
    assert!(client.ping().await.unwrap());
    assert_eq!(couch.requests_to("/").len(), 1);
}

#[tokio::test]
async fn database_lifecycle() {
    let (_couch, client) = server(&[]).await;
    assert!(!client.db_exists("foo").await.unwrap());
    client.create_db("foo").await.unwrap();
    assert!(client.db_exists("foo").await.unwrap());
    assert!(matches!(
        client.create_db("foo").await,
        Err(ClientError::Conflict(_))
    ));

    let info = client.db("foo").unwrap().info().await.unwrap();
    assert_eq!(info.value()["db_name"], "foo");

    client.destroy_db("foo").await.unwrap();
    assert!(!client.db_exists("foo").await.unwrap());
}

#[tokio::test]
async fn document_crud() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();

    let r1 = db
        .put("foo", doc(json!({"foo": "bar"})), PutOptions::default())
        .await
        .unwrap();
    let got = db.get("foo", GetOptions::default()).await.unwrap();
    assert_eq!(got.id(), Some("foo"));
    assert_eq!(got.rev().unwrap(), Some(r1.clone()));
    assert_eq!(got.get("foo"), Some(&json!("bar")));

    let (id, _) = db
        .create_doc(doc(json!({"x": 1})), PutOptions::default())
        .await
        .unwrap();
    assert!(!id.is_empty());

    let tombstone = db.delete("foo", &r1).await.unwrap();
    assert_eq!(tombstone.generation(), 2);
    let err = db.get("foo", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert_eq!(err.to_string(), "Not Found: deleted");

    let delete = couch
        .requests()
        .into_iter()
        .find(|r| r.method == "DELETE")
        .unwrap();
    assert_eq!(delete.query_param("rev"), Some(r1.to_string()));
}

#[tokio::test]
async fn response_bodies_kept_verbatim() {
    let (couch, client) = server(&["db"]).await;
    let body = "{\"version\":\"3.3.3\",  \"couchdb\":\"Welcome\",\"n\":1.50}\n";
    couch.respond_raw(200, body);
    let version = client.version().await.unwrap();
    assert_eq!(version.bytes().as_ref(), body.as_bytes());
    assert_eq!(version.value()["couchdb"], "Welcome");

    let doc_body = "{\"_rev\":\"1-abc\",\"_id\":\"foo\",\"z\":1,\"a\":2}";
    couch.respond_raw(200, doc_body);
    let db = client.db("db").unwrap();
    let raw = db.get_raw("foo", GetOptions::default()).await.unwrap();
    assert_eq!(raw.bytes().as_ref(), doc_body.as_bytes());
    assert_eq!(couch.requests_to("/db/foo").len(), 1);
}

#[tokio::test]
async fn design_doc_paths() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    db.put("_design/app", doc(json!({"views": {}})), PutOptions::default())
        .await
        .unwrap();
    db.put("a/b", doc(json!({})), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(couch.requests_to("/db/_design/app").len(), 1);
    assert_eq!(couch.requests_to("/db/a%2Fb").len(), 1);
    assert!(db.get("_design/app", GetOptions::default()).await.is_ok());
}

#[tokio::test]
async fn changes_feed_streams_records() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    seed_numbered(db.as_ref(), 25).await;

    let mut stream = db.changes(ChangesOptions::replication()).await.unwrap();
    let mut ids = Vec::new();
    while let Some(change) = stream.try_next().await.unwrap() {
        ids.push(change.id);
    }
    assert_eq!(ids.len(), 25);
    assert_eq!(ids[0], "doc0000");
    assert!(stream.last_seq().is_some());

    let request = &couch.requests_to("/db/_changes")[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.query_param("feed").as_deref(), Some("normal"));
    assert_eq!(request.query_param("style").as_deref(), Some("all_docs"));
    assert_eq!(request.query_param("since").as_deref(), Some("0"));
}

#[tokio::test]
async fn changes_with_doc_ids_posts_body() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    seed(db.as_ref(), &[("a", json!({})), ("b", json!({}))]).await;

    let mut opts = ChangesOptions::replication();
    opts.doc_ids = vec!["b".into()];
    let changes: Vec<Change> = db.changes(opts).await.unwrap().try_collect().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, "b");

    let request = &couch.requests_to("/db/_changes")[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.query_param("filter").as_deref(), Some("_doc_ids"));
    assert_eq!(request.json(), Some(json!({"doc_ids": ["b"]})));
}

#[tokio::test]
async fn revs_diff_and_open_revs() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    put_replicated(
        db.as_ref(),
        "foo",
        &[FOO_REV, "1-a"],
        json!({"foo": "bar"}),
    )
    .await;

    let mut manifest = Manifest::new();
    manifest.add("foo", &[rev(FOO_REV), rev("3-b")]);
    manifest.add("bar", &[rev("1-c")]);
    let mut diff: Vec<RevsDiffEntry> = db
        .revs_diff(&manifest)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    diff.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(diff.len(), 2);
    assert_eq!(diff[1].id, "foo");
    assert_eq!(diff[1].missing, vec![rev("3-b")]);

    let leaves: Vec<Document> = db
        .open_revs(
            "foo",
            OpenRevs::Revs(vec![rev(FOO_REV)]),
            GetOptions::replication(),
        )
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].revisions().unwrap().unwrap().start, 2);

    let request = couch
        .requests_to("/db/foo")
        .into_iter()
        .find(|r| r.method == "GET")
        .unwrap();
    assert_eq!(request.accept.as_deref(), Some("application/json"));
    assert_eq!(request.query_param("revs").as_deref(), Some("true"));

    let result: Result<Vec<Document>, ClientError> = db
        .open_revs("foo", OpenRevs::Revs(vec![rev("9-z")]), GetOptions::default())
        .await
        .unwrap()
        .try_collect()
        .await;
    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

#[tokio::test]
async fn replicated_put_sends_new_edits_false() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    let input = doc(json!({
        "_id": "foo",
        "_rev": FOO_REV,
        "_revisions": {"start": 2, "ids": ["7051cbe5c8faecd085a3fa619e6e6337", "a"]},
        "foo": "bar"
    }));
    let got = db.put("foo", input, PutOptions::replicated()).await.unwrap();
    assert_eq!(got, rev(FOO_REV));

    let request = &couch.requests_to("/db/foo")[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(request.query_param("new_edits").as_deref(), Some("false"));
    assert!(request.json().unwrap().get("_revisions").is_some());
}

#[tokio::test]
async fn security_round_trip() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();
    let security: SecurityObject =
        serde_json::from_value(json!({"members": {"names": ["bob"]}})).unwrap();
    db.set_security(&security).await.unwrap();
    assert_eq!(db.security().await.unwrap(), security);

    let put = &couch.requests_to("/db/_security")[0];
    assert_eq!(
        put.json(),
        Some(json!({"admins": {}, "members": {"names": ["bob"]}}))
    );
}

#[tokio::test]
async fn compact_posts_json() {
    let (couch, client) = server(&["foo"]).await;
    client.db("foo").unwrap().compact().await.unwrap();
    let request = &couch.requests_to("/foo/_compact")[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn cluster_setup_body_verbatim() {
    let (couch, client) = server(&[]).await;
    client
        .cluster_setup(json!({"action": "finish_cluster"}))
        .await
        .unwrap();
    let request = &couch.requests_to("/_cluster_setup")[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.json(), Some(json!({"action": "finish_cluster"})));
}

#[tokio::test]
async fn error_statuses_classified() {
    let (couch, client) = server(&["db"]).await;
    let db = client.db("db").unwrap();

    couch.respond_with(503, json!({"error": "unavailable", "reason": "maintenance"}));
    let err = db.info().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.to_string(), "Service Unavailable: maintenance");

    couch.respond_with(
        401,
        json!({"error": "unauthorized", "reason": "Name or password is incorrect."}),
    );
    assert!(matches!(
        db.info().await,
        Err(ClientError::Unauthenticated(_))
    ));

    couch.respond_with(403, json!({"error": "forbidden", "reason": "nope"}));
    assert!(matches!(db.info().await, Err(ClientError::Unauthorized(_))));

    couch.respond_with(400, json!({"error": "bad_request", "reason": "invalid"}));
    let err = db.info().await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn connection_refused_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client =
        HttpClient::connect(&format!("http://127.0.0.1:{port}"), &HttpConfig::default()).unwrap();
    let err = client.version().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn basic_auth_from_dsn() {
    let couch = FakeCouch::start().await.unwrap();
    let dsn = Dsn::parse(&couch.url().replace("http://", "couch://admin:secret@")).unwrap();
    let client = HttpClient::new(&dsn, &HttpConfig::default()).unwrap();
    client.version().await.unwrap();

    let request = &couch.requests_to("/")[0];
    assert!(request
        .authorization
        .as_deref()
        .is_some_and(|a| a.starts_with("Basic ")));
    assert_eq!(client.dsn(), couch.url());
}
