use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::{AuthToken, Error, Operation, WatchStream};

/// User agent sent by the HTTP binding.
pub(crate) const USER_AGENT: &str = concat!("kvbench/", env!("CARGO_PKG_VERSION"));

/// Default deadline for establishing the transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default deadline for a single put, get or authenticate call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// A version stamp handed out by the store for every successful write.
///
/// Revisions increase monotonically; the benchmark only reports them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Revision(pub i64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The capabilities a benchmark needs from a key-value store.
///
/// A single handle is created per run and shared read-only between all tasks, so
/// implementations must be usable concurrently through `&self`.
#[async_trait::async_trait]
pub trait StoreClient: fmt::Debug + Send + Sync + 'static {
    /// The binding name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Sets `key` to `value`, returning the revision of the write.
    async fn put(&self, key: &[u8], value: &[u8]) -> crate::Result<Revision>;

    /// Reads the current value of `key`, or `None` if it does not exist.
    async fn get(&self, key: &[u8]) -> crate::Result<Option<Bytes>>;

    /// Opens a fresh subscription to changes of `key`.
    ///
    /// This only returns once the store has confirmed the subscription, so every write issued
    /// afterwards is observed on the returned stream. The stream never ends on its own; a
    /// subscription closed by the store surfaces as [`Error::WatchClosed`].
    async fn watch(&self, key: &[u8]) -> crate::Result<WatchStream>;
}

/// Exchanges credentials for an [`AuthToken`].
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticates `username` with `password`.
    async fn authenticate(&self, username: &str, password: &str) -> crate::Result<AuthToken>;
}

/// Construction of a binding from [`ClientOptions`].
#[async_trait::async_trait]
pub trait Connect: Sized {
    /// Establishes the transport, failing fast if the store is unreachable.
    async fn connect(options: &ClientOptions) -> crate::Result<Self>;

    /// Attaches `token` to every subsequent request made through this handle.
    fn with_token(self, token: AuthToken) -> Self;
}

/// Transport settings shared by all bindings.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub(crate) endpoint: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
}

impl ClientOptions {
    /// Creates options for the store reachable at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the deadline for establishing the transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the deadline applied to every put, get and authenticate call.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The store endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Runs `future`, failing with [`Error::Timeout`] once `timeout` has elapsed.
pub(crate) async fn with_timeout<T, F>(
    operation: Operation,
    timeout: Duration,
    future: F,
) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| Error::Timeout { operation, timeout })?
}

/// Prefixes `endpoint` with `http://` unless it already names a scheme.
///
/// This allows plain `host:port` endpoints for both bindings.
pub(crate) fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}
