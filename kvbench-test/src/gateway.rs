//! Exposes an in-process fake of the store's HTTP+JSON gateway for use in integration tests.
//!
//! ```
//! use kvbench_test::gateway::TestGateway;
//!
//! #[tokio::main]
//! async fn main() {
//!    let gateway = TestGateway::new().await;
//!    let endpoint = gateway.url();
//!    // point a client at the endpoint...
//! }
//! ```
//!
//! The fake keeps all keys in memory and implements just enough of the gateway to drive the
//! benchmark: health checks, puts, ranges over a single key, watches on a single key, and
//! authentication with a single user. Watch responses can be replaced with a script of raw
//! lines to exercise how clients handle broken streams.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// The token handed out to authenticated users.
pub const TEST_TOKEN: &str = "kvbench-test-token.1";

/// Capacity of the change feed shared by all watchers.
const CHANGE_FEED_CAPACITY: usize = 64 * 1024;

#[derive(Clone, Debug)]
struct Change {
    key: Bytes,
    value: Bytes,
    revision: i64,
}

#[derive(Debug, Default)]
struct Data {
    revision: i64,
    entries: HashMap<Bytes, (Bytes, i64)>,
}

#[derive(Debug)]
struct Inner {
    credentials: Option<(String, String)>,
    put_delay: Duration,
    reject_puts: bool,
    watch_script: Option<Vec<String>>,

    data: Mutex<Data>,
    changes: broadcast::Sender<Change>,

    puts: AtomicU64,
    watches: AtomicU64,
    authentications: AtomicU64,
}

impl Inner {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        if self.credentials.is_none() {
            return Ok(());
        }

        let token = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if token == Some(TEST_TOKEN) {
            Ok(())
        } else {
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                16,
                "etcdserver: user name is empty",
            ))
        }
    }
}

/// Builder for a [`TestGateway`] with non-default behavior.
#[derive(Debug, Default)]
pub struct TestGatewayBuilder {
    credentials: Option<(String, String)>,
    put_delay: Duration,
    reject_puts: bool,
    watch_script: Option<Vec<String>>,
}

impl TestGatewayBuilder {
    /// Requires authentication as `username` with `password` for all key-value requests.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_owned(), password.to_owned()));
        self
    }

    /// Delays every put response by `delay`.
    pub fn put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    /// Answers every put with an internal server error.
    pub fn reject_puts(mut self) -> Self {
        self.reject_puts = true;
        self
    }

    /// Answers every watch with exactly `lines`, each terminated by a newline, and then ends
    /// the response body.
    ///
    /// The lines are sent verbatim, so they may be malformed JSON.
    pub fn script_watch<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watch_script = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Starts the gateway on a random port on localhost.
    pub async fn spawn(self) -> TestGateway {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let inner = Arc::new(Inner {
            credentials: self.credentials,
            put_delay: self.put_delay,
            reject_puts: self.reject_puts,
            watch_script: self.watch_script,
            data: Mutex::new(Data::default()),
            changes,
            puts: AtomicU64::new(0),
            watches: AtomicU64::new(0),
            authentications: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/v3/kv/put", post(put))
            .route("/v3/kv/range", post(range))
            .route("/v3/watch", post(watch))
            .route("/v3/auth/authenticate", post(authenticate))
            .with_state(inner.clone());

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        TestGateway {
            handle,
            socket,
            inner,
        }
    }
}

/// An in-process fake gateway for use in integration tests.
///
/// It listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestGateway {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    inner: Arc<Inner>,
}

impl TestGateway {
    /// Starts a gateway that does not require authentication.
    pub async fn new() -> Self {
        Self::builder().spawn().await
    }

    /// Returns a builder to customize the gateway's behavior.
    pub fn builder() -> TestGatewayBuilder {
        TestGatewayBuilder::default()
    }

    /// Returns the endpoint URL of this gateway.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    /// The number of put requests that were accepted.
    pub fn puts(&self) -> u64 {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// The number of watch subscriptions that were accepted.
    pub fn watches(&self) -> u64 {
        self.inner.watches.load(Ordering::SeqCst)
    }

    /// The number of successful authentications.
    pub fn authentications(&self) -> u64 {
        self.inner.authentications.load(Ordering::SeqCst)
    }

    /// The latest revision of the store.
    pub fn revision(&self) -> i64 {
        self.inner.data.lock().unwrap().revision
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn error_response(status: StatusCode, code: u32, message: &str) -> Response {
    let body = json!({ "error": message, "code": code, "message": message });
    (status, Json(body)).into_response()
}

fn header(revision: i64) -> Value {
    json!({
        "cluster_id": "14841639068965178418",
        "member_id": "10276657743932975437",
        "revision": revision.to_string(),
        "raft_term": "2",
    })
}

fn decode(encoded: &str) -> Result<Bytes, Response> {
    STANDARD.decode(encoded).map(Bytes::from).map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            3,
            "invalid base64 data in request body",
        )
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "health": "true", "reason": "" }))
}

#[derive(Deserialize)]
struct PutBody {
    key: String,
    #[serde(default)]
    value: String,
}

async fn put(
    State(inner): State<Arc<Inner>>,
    headers: HeaderMap,
    Json(body): Json<PutBody>,
) -> Result<Json<Value>, Response> {
    inner.authorize(&headers)?;
    if !inner.put_delay.is_zero() {
        tokio::time::sleep(inner.put_delay).await;
    }
    if inner.reject_puts {
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            13,
            "etcdserver: injected failure",
        ));
    }

    let key = decode(&body.key)?;
    let value = decode(&body.value)?;

    let revision = {
        let mut data = inner.data.lock().unwrap();
        data.revision += 1;
        let revision = data.revision;
        data.entries.insert(key.clone(), (value.clone(), revision));
        // published under the lock to keep the change feed in revision order
        inner
            .changes
            .send(Change {
                key,
                value,
                revision,
            })
            .ok();
        revision
    };

    inner.puts.fetch_add(1, Ordering::SeqCst);
    Ok(Json(json!({ "header": header(revision) })))
}

#[derive(Deserialize)]
struct RangeBody {
    key: String,
}

async fn range(
    State(inner): State<Arc<Inner>>,
    headers: HeaderMap,
    Json(body): Json<RangeBody>,
) -> Result<Json<Value>, Response> {
    inner.authorize(&headers)?;
    let key = decode(&body.key)?;

    let data = inner.data.lock().unwrap();
    let response = match data.entries.get(&key) {
        Some((value, revision)) => json!({
            "header": header(data.revision),
            "kvs": [{
                "key": STANDARD.encode(&key),
                "value": STANDARD.encode(value),
                "create_revision": revision.to_string(),
                "mod_revision": revision.to_string(),
                "version": "1",
            }],
            "count": "1",
        }),
        None => json!({ "header": header(data.revision) }),
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
struct WatchBody {
    create_request: WatchCreate,
}

#[derive(Deserialize)]
struct WatchCreate {
    key: String,
}

fn line(value: Value) -> Result<Bytes, Infallible> {
    let mut line = value.to_string();
    line.push('\n');
    Ok(Bytes::from(line))
}

/// Renders a change on the watched `key` as a response line.
///
/// A watcher that fell behind the change feed gets an error line, as it has missed changes.
fn change_line(
    key: &Bytes,
    change: Result<Change, BroadcastStreamRecvError>,
) -> Option<Result<Bytes, Infallible>> {
    match change {
        Ok(change) if change.key == *key => Some(line(json!({
            "result": {
                "header": header(change.revision),
                "events": [{
                    "kv": {
                        "key": STANDARD.encode(&change.key),
                        "value": STANDARD.encode(&change.value),
                        "mod_revision": change.revision.to_string(),
                    }
                }]
            }
        }))),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(line(json!({
            "error": {
                "grpc_code": 8,
                "http_code": 429,
                "message": format!("etcdserver: watcher fell behind by {skipped} changes"),
                "http_status": "Too Many Requests",
            }
        }))),
    }
}

fn streaming_response(body: Body) -> Result<Response, Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn watch(
    State(inner): State<Arc<Inner>>,
    headers: HeaderMap,
    Json(body): Json<WatchBody>,
) -> Result<Response, Response> {
    inner.authorize(&headers)?;
    let key = decode(&body.create_request.key)?;

    if let Some(ref script) = inner.watch_script {
        inner.watches.fetch_add(1, Ordering::SeqCst);
        let lines = script
            .iter()
            .map(|line| Ok::<_, Infallible>(Bytes::from(format!("{line}\n"))))
            .collect::<Vec<_>>();
        return streaming_response(Body::from_stream(futures_util::stream::iter(lines)));
    }

    // subscribe before confirming, so that no change after the confirmation is missed
    let changes = BroadcastStream::new(inner.changes.subscribe());
    let revision = inner.data.lock().unwrap().revision;
    inner.watches.fetch_add(1, Ordering::SeqCst);

    let created = futures_util::stream::once(async move {
        line(json!({ "result": { "header": header(revision), "created": true } }))
    });
    let events =
        changes.filter_map(move |change| std::future::ready(change_line(&key, change)));

    streaming_response(Body::from_stream(created.chain(events)))
}

#[derive(Deserialize)]
struct AuthenticateBody {
    name: String,
    password: String,
}

async fn authenticate(
    State(inner): State<Arc<Inner>>,
    Json(body): Json<AuthenticateBody>,
) -> Result<Json<Value>, Response> {
    let valid = match inner.credentials {
        Some((ref name, ref password)) => *name == body.name && *password == body.password,
        None => false,
    };

    if !valid {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            3,
            "etcdserver: authentication failed, invalid user ID or password",
        ));
    }

    inner.authentications.fetch_add(1, Ordering::SeqCst);
    let revision = inner.data.lock().unwrap().revision;
    Ok(Json(json!({ "header": header(revision), "token": TEST_TOKEN })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &'static [u8], revision: i64) -> Change {
        Change {
            key: Bytes::from_static(key),
            value: Bytes::from_static(b"bar"),
            revision,
        }
    }

    fn parse(chunk: Option<Result<Bytes, Infallible>>) -> Value {
        let Some(Ok(bytes)) = chunk else {
            panic!("expected a response line");
        };
        assert!(bytes.ends_with(b"\n"));
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn change_on_watched_key_becomes_event() {
        let key = Bytes::from_static(b"foo");

        let line = parse(change_line(&key, Ok(change(b"foo", 7))));
        let kv = &line["result"]["events"][0]["kv"];
        assert_eq!(kv["key"], STANDARD.encode(b"foo"));
        assert_eq!(kv["mod_revision"], "7");
    }

    #[test]
    fn change_on_other_key_is_skipped() {
        let key = Bytes::from_static(b"foo");
        assert!(change_line(&key, Ok(change(b"other", 7))).is_none());
    }

    #[test]
    fn lagging_watcher_gets_error_line() {
        let key = Bytes::from_static(b"foo");

        let line = parse(change_line(&key, Err(BroadcastStreamRecvError::Lagged(3))));
        assert!(line.get("result").is_none());
        assert_eq!(line["error"]["http_code"], 429);
        assert!(
            line["error"]["message"]
                .as_str()
                .unwrap()
                .contains("fell behind by 3 changes")
        );
    }
}
