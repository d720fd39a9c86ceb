//! The two kinds of work a benchmark run consists of: writers and the watch consumer.

use bytes::Bytes;
use futures_util::StreamExt;
use kvbench_client::{Error, Revision, StoreClient, WatchStream};

/// A closed-loop writer issuing sequential puts of a single key.
#[derive(Debug, Clone)]
pub struct Writer {
    key: Bytes,
    value: Bytes,
    count: u64,
}

/// What a single [`Writer`] accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Number of puts that succeeded.
    pub puts: u64,
    /// Revision returned by the last put, if any.
    pub last_revision: Option<Revision>,
}

impl Writer {
    /// Creates a writer that puts `value` under `key` exactly `count` times.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, count: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            count,
        }
    }

    /// Issues all puts one after another.
    ///
    /// The next put is only sent once the previous one returned. The first failing put ends the
    /// writer with its error.
    pub async fn run<S>(&self, store: &S) -> kvbench_client::Result<WriterStats>
    where
        S: StoreClient + ?Sized,
    {
        let mut stats = WriterStats::default();
        for _ in 0..self.count {
            let revision = store.put(&self.key, &self.value).await?;
            stats.puts += 1;
            stats.last_revision = Some(revision);
        }
        Ok(stats)
    }
}

/// Drains `events` until exactly `target` events have been observed.
///
/// Returns the number of observed events, which always equals `target` on success. Events past
/// the target are left in the stream. A failing or ending stream fails the consumer.
///
/// There is no deadline: if the store never delivers `target` events, this waits forever.
pub async fn consume_events(events: &mut WatchStream, target: u64) -> kvbench_client::Result<u64> {
    let mut observed = 0;
    while observed < target {
        match events.next().await {
            Some(Ok(event)) => {
                observed += 1;
                tracing::trace!(revision = %event.mod_revision, observed, "watch event");
            }
            Some(Err(err)) => return Err(err),
            None => return Err(Error::WatchClosed),
        }
    }
    Ok(observed)
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use kvbench_client::{Operation, WatchEvent};
    use kvbench_test::memory::MemoryStore;

    use super::*;

    fn events(count: usize) -> WatchStream {
        stream::iter((0..count).map(|i| {
            Ok(WatchEvent {
                mod_revision: Revision(i as i64 + 1),
                ..Default::default()
            })
        }))
        .boxed()
    }

    #[tokio::test]
    async fn writer_issues_exactly_count_puts() {
        let store = MemoryStore::new();
        let stats = Writer::new("foo", "bar", 7).run(&store).await.unwrap();

        assert_eq!(stats.puts, 7);
        assert_eq!(stats.last_revision, Some(Revision(7)));
        assert_eq!(store.puts(), 7);
        assert_eq!(
            store.get(b"foo").await.unwrap(),
            Some(Bytes::from_static(b"bar"))
        );
    }

    #[tokio::test]
    async fn writer_without_requests_is_a_noop() {
        let store = MemoryStore::new();
        let stats = Writer::new("foo", "bar", 0).run(&store).await.unwrap();

        assert_eq!(stats, WriterStats::default());
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn writer_stops_at_first_failure() {
        let store = MemoryStore::new().fail_puts_after(3);
        let error = Writer::new("foo", "bar", 10)
            .run(&store)
            .await
            .unwrap_err();

        assert_eq!(error.operation(), Operation::Put);
        assert_eq!(store.puts(), 3);
    }

    #[tokio::test]
    async fn consumer_stops_exactly_at_target() {
        let mut stream = events(15);
        assert_eq!(consume_events(&mut stream, 10).await.unwrap(), 10);

        // the remaining events were not consumed
        assert_eq!(stream.count().await, 5);
    }

    #[tokio::test]
    async fn consumer_with_zero_target_returns_immediately() {
        let mut stream = stream::pending().boxed();
        assert_eq!(consume_events(&mut stream, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumer_fails_on_stream_error() {
        let mut stream = events(2)
            .chain(stream::once(async {
                Err(Error::Decode {
                    operation: Operation::Watch,
                    cause: "expected value at line 1 column 1".into(),
                })
            }))
            .chain(events(5))
            .boxed();

        let error = consume_events(&mut stream, 5).await.unwrap_err();
        assert!(matches!(error, Error::Decode { .. }));
    }

    #[tokio::test]
    async fn consumer_fails_when_stream_ends_early() {
        let mut stream = events(3);
        let error = consume_events(&mut stream, 4).await.unwrap_err();
        assert!(matches!(error, Error::WatchClosed));
    }
}
