//! Exposes an in-process fake of the store's gRPC API for use in integration tests.
//!
//! ```
//! use kvbench_test::grpc::TestGrpcServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestGrpcServer::new().await;
//!    let endpoint = server.url();
//!    // point a client at the endpoint...
//! }
//! ```
//!
//! The fake serves the `KV`, `Watch` and `Auth` services with the same semantics as the
//! [`TestGateway`](crate::gateway::TestGateway): all keys live in memory, watches cover a single
//! key, and a single user may authenticate. Once credentials are configured, key-value calls
//! without the token in their metadata are rejected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use kvbench_client::TOKEN_METADATA_KEY;
use kvbench_client::proto::auth_server::{Auth, AuthServer};
use kvbench_client::proto::event::EventType;
use kvbench_client::proto::kv_server::{Kv, KvServer};
use kvbench_client::proto::watch_request::RequestUnion;
use kvbench_client::proto::watch_server::{Watch, WatchServer};
use kvbench_client::proto::{
    AuthenticateRequest, AuthenticateResponse, Event, KeyValue, PutRequest, PutResponse,
    RangeRequest, RangeResponse, ResponseHeader, WatchRequest, WatchResponse,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, TcpListenerStream};
use tonic::{Request, Response, Status, Streaming};

use crate::gateway::TEST_TOKEN;

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
    reject_puts: bool,
    cancel_watches: Option<String>,

    data: Mutex<Data>,
    changes: broadcast::Sender<Change>,

    puts: AtomicU64,
    watches: AtomicU64,
    authentications: AtomicU64,
}

impl Inner {
    fn authorize<T>(&self, request: &Request<T>) -> Result<(), Status> {
        if self.credentials.is_none() {
            return Ok(());
        }

        let token = request
            .metadata()
            .get(TOKEN_METADATA_KEY)
            .and_then(|v| v.to_str().ok());
        if token == Some(TEST_TOKEN) {
            Ok(())
        } else {
            Err(Status::unauthenticated("etcdserver: invalid auth token"))
        }
    }

    fn revision(&self) -> i64 {
        self.data.lock().unwrap().revision
    }
}

fn header(revision: i64) -> Option<ResponseHeader> {
    Some(ResponseHeader {
        cluster_id: 14841639068965178418,
        member_id: 10276657743932975437,
        revision,
        raft_term: 2,
    })
}

/// Builder for a [`TestGrpcServer`] with non-default behavior.
#[derive(Debug, Default)]
pub struct TestGrpcServerBuilder {
    credentials: Option<(String, String)>,
    reject_puts: bool,
    cancel_watches: Option<String>,
}

impl TestGrpcServerBuilder {
    /// Requires authentication as `username` with `password` for all key-value calls.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_owned(), password.to_owned()));
        self
    }

    /// Answers every put with an internal error.
    pub fn reject_puts(mut self) -> Self {
        self.reject_puts = true;
        self
    }

    /// Cancels every watch right after confirming it, giving `reason`.
    pub fn cancel_watches(mut self, reason: &str) -> Self {
        self.cancel_watches = Some(reason.to_owned());
        self
    }

    /// Starts the server on a random port on localhost.
    pub async fn spawn(self) -> TestGrpcServer {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let inner = Arc::new(Inner {
            credentials: self.credentials,
            reject_puts: self.reject_puts,
            cancel_watches: self.cancel_watches,
            data: Mutex::new(Data::default()),
            changes,
            puts: AtomicU64::new(0),
            watches: AtomicU64::new(0),
            authentications: AtomicU64::new(0),
        });

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let socket = listener.local_addr().unwrap();

        let service = Service(inner.clone());
        let handle = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(KvServer::new(service.clone()))
                .add_service(WatchServer::new(service.clone()))
                .add_service(AuthServer::new(service))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        TestGrpcServer {
            handle,
            socket,
            inner,
        }
    }
}

/// An in-process fake gRPC server for use in integration tests.
///
/// It listens on a random available port on localhost and stops accepting connections when
/// dropped.
#[derive(Debug)]
pub struct TestGrpcServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    inner: Arc<Inner>,
}

impl TestGrpcServer {
    /// Starts a server that does not require authentication.
    pub async fn new() -> Self {
        Self::builder().spawn().await
    }

    /// Returns a builder to customize the server's behavior.
    pub fn builder() -> TestGrpcServerBuilder {
        TestGrpcServerBuilder::default()
    }

    /// Returns the endpoint URL of this server.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    /// The number of put calls that were accepted.
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
        self.inner.revision()
    }
}

impl Drop for TestGrpcServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone, Debug)]
struct Service(Arc<Inner>);

#[tonic::async_trait]
impl Kv for Service {
    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        self.0.authorize(&request)?;
        if self.0.reject_puts {
            return Err(Status::internal("etcdserver: injected failure"));
        }

        let PutRequest { key, value, .. } = request.into_inner();
        let revision = {
            let mut data = self.0.data.lock().unwrap();
            data.revision += 1;
            let revision = data.revision;
            data.entries.insert(key.clone(), (value.clone(), revision));
            // published under the lock to keep the change feed in revision order
            self.0
                .changes
                .send(Change {
                    key,
                    value,
                    revision,
                })
                .ok();
            revision
        };

        self.0.puts.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(PutResponse {
            header: header(revision),
            prev_kv: None,
        }))
    }

    async fn range(
        &self,
        request: Request<RangeRequest>,
    ) -> Result<Response<RangeResponse>, Status> {
        self.0.authorize(&request)?;
        let key = request.into_inner().key;

        let data = self.0.data.lock().unwrap();
        let kvs: Vec<_> = data
            .entries
            .get(&key)
            .map(|(value, revision)| KeyValue {
                key: key.clone(),
                create_revision: *revision,
                mod_revision: *revision,
                version: 1,
                value: value.clone(),
                lease: 0,
            })
            .into_iter()
            .collect();

        Ok(Response::new(RangeResponse {
            header: header(data.revision),
            count: kvs.len() as i64,
            kvs,
            more: false,
        }))
    }
}

#[tonic::async_trait]
impl Watch for Service {
    type WatchStream = BoxStream<'static, Result<WatchResponse, Status>>;

    async fn watch(
        &self,
        request: Request<Streaming<WatchRequest>>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        self.0.authorize(&request)?;
        let mut requests = request.into_inner();

        let key = match requests.message().await? {
            Some(WatchRequest {
                request_union: Some(RequestUnion::CreateRequest(create)),
            }) => create.key,
            _ => return Err(Status::invalid_argument("expected a watch create request")),
        };

        // keep reading until the client half-closes, as a real server does
        tokio::spawn(async move { while let Ok(Some(_)) = requests.message().await {} });

        // subscribe before confirming, so that no change after the confirmation is missed
        let changes = BroadcastStream::new(self.0.changes.subscribe());
        let created = WatchResponse {
            header: header(self.0.revision()),
            created: true,
            ..Default::default()
        };
        self.0.watches.fetch_add(1, Ordering::SeqCst);

        if let Some(ref reason) = self.0.cancel_watches {
            let canceled = WatchResponse {
                header: header(self.0.revision()),
                canceled: true,
                cancel_reason: reason.clone(),
                ..Default::default()
            };
            let responses = futures_util::stream::iter([Ok(created), Ok(canceled)]);
            return Ok(Response::new(responses.boxed()));
        }

        let events =
            changes.filter_map(move |change| std::future::ready(change_event(&key, change)));
        let responses = futures_util::stream::once(std::future::ready(Ok(created))).chain(events);
        Ok(Response::new(responses.boxed()))
    }
}

/// Wraps a change on the watched `key` into a watch response.
fn change_event(
    key: &Bytes,
    change: Result<Change, BroadcastStreamRecvError>,
) -> Option<Result<WatchResponse, Status>> {
    match change {
        Ok(change) if change.key == *key => Some(Ok(WatchResponse {
            header: header(change.revision),
            events: vec![Event {
                r#type: EventType::Put as i32,
                kv: Some(KeyValue {
                    key: change.key,
                    mod_revision: change.revision,
                    value: change.value,
                    ..Default::default()
                }),
                prev_kv: None,
            }],
            ..Default::default()
        })),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => Some(Err(Status::resource_exhausted(
            format!("etcdserver: watcher fell behind by {skipped} changes"),
        ))),
    }
}

#[tonic::async_trait]
impl Auth for Service {
    async fn authenticate(
        &self,
        request: Request<AuthenticateRequest>,
    ) -> Result<Response<AuthenticateResponse>, Status> {
        let AuthenticateRequest { name, password } = request.into_inner();
        let valid = match self.0.credentials {
            Some((ref expected_name, ref expected_password)) => {
                *expected_name == name && *expected_password == password
            }
            None => false,
        };

        if !valid {
            return Err(Status::invalid_argument(
                "etcdserver: authentication failed, invalid user ID or password",
            ));
        }

        self.0.authentications.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(AuthenticateResponse {
            header: header(self.0.revision()),
            token: TEST_TOKEN.to_owned(),
        }))
    }
}
