//! An in-memory [`StoreClient`] for tests of the harness.
//!
//! This removes the need for a network round trip in unit tests. Every subscriber gets its own
//! unbounded channel, so no change is ever dropped, and counters allow tests to inspect how the
//! store was used.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use kvbench_client::{
    AuthToken, Authenticator, Error, EventKind, Operation, Revision, StoreClient, WatchEvent,
    WatchStream,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Default)]
struct Data {
    revision: i64,
    entries: HashMap<Bytes, Bytes>,
    subscribers: Vec<(Bytes, mpsc::UnboundedSender<WatchEvent>)>,
}

/// A [`StoreClient`] keeping all keys in a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    fail_puts_after: Option<u64>,
    fail_watch: bool,
    credentials: Option<(String, String)>,

    puts: AtomicU64,
    watches: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every put once `count` puts have succeeded.
    pub fn fail_puts_after(mut self, count: u64) -> Self {
        self.fail_puts_after = Some(count);
        self
    }

    /// Rejects every watch subscription.
    pub fn fail_watch(mut self) -> Self {
        self.fail_watch = true;
        self
    }

    /// Only hands out tokens for `username` with `password`.
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_owned(), password.to_owned()));
        self
    }

    /// The number of successful puts.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// The number of opened watch subscriptions.
    pub fn watches(&self) -> u64 {
        self.watches.load(Ordering::SeqCst)
    }

    /// The latest revision.
    pub fn revision(&self) -> Revision {
        Revision(self.data.lock().unwrap().revision)
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> kvbench_client::Result<Revision> {
        if let Some(limit) = self.fail_puts_after
            && self.puts() >= limit
        {
            return Err(Error::Status {
                operation: Operation::Put,
                status: "500".to_owned(),
                message: "injected failure".to_owned(),
            });
        }

        let key = Bytes::copy_from_slice(key);
        let value = Bytes::copy_from_slice(value);

        let mut data = self.data.lock().unwrap();
        data.revision += 1;
        let revision = Revision(data.revision);
        data.entries.insert(key.clone(), value.clone());

        let event = WatchEvent {
            kind: EventKind::Put,
            key: key.clone(),
            value,
            mod_revision: revision,
        };
        data.subscribers
            .retain(|(subject, sender)| *subject != key || sender.send(event.clone()).is_ok());

        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }

    async fn get(&self, key: &[u8]) -> kvbench_client::Result<Option<Bytes>> {
        Ok(self.data.lock().unwrap().entries.get(key).cloned())
    }

    async fn watch(&self, key: &[u8]) -> kvbench_client::Result<WatchStream> {
        if self.fail_watch {
            return Err(Error::Status {
                operation: Operation::Watch,
                status: "503".to_owned(),
                message: "injected failure".to_owned(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.data
            .lock()
            .unwrap()
            .subscribers
            .push((Bytes::copy_from_slice(key), sender));
        self.watches.fetch_add(1, Ordering::SeqCst);

        let closed = futures_util::stream::once(async { Err(Error::WatchClosed) });
        Ok(UnboundedReceiverStream::new(receiver)
            .map(Ok)
            .chain(closed)
            .boxed())
    }
}

#[async_trait::async_trait]
impl Authenticator for MemoryStore {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> kvbench_client::Result<AuthToken> {
        match self.credentials {
            Some((ref name, ref secret)) if name == username && secret == password => {
                Ok(AuthToken::new(format!("memory.{username}")))
            }
            _ => Err(Error::Auth {
                message: "invalid user ID or password".to_owned(),
            }),
        }
    }
}
