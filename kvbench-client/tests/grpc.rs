use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use kvbench_client::{
    Authenticator, ClientOptions, Connect, Error, EventKind, GrpcStore, Operation, Revision,
    StoreClient,
};
use kvbench_test::gateway::TEST_TOKEN;
use kvbench_test::grpc::TestGrpcServer;

async fn connect(server: &TestGrpcServer) -> GrpcStore {
    GrpcStore::connect(&ClientOptions::new(server.url()))
        .await
        .unwrap()
}

#[tokio::test]
async fn puts_and_gets() {
    kvbench_test::tracing::init();
    let server = TestGrpcServer::new().await;
    let store = connect(&server).await;

    assert_eq!(store.get(b"foo").await.unwrap(), None);

    assert_eq!(store.put(b"foo", b"bar").await.unwrap(), Revision(1));
    assert_eq!(store.put(b"\x00\xff", b"\x01\x02").await.unwrap(), Revision(2));

    let value = store.get(b"foo").await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"bar")));
    let value = store.get(b"\x00\xff").await.unwrap();
    assert_eq!(value.as_deref(), Some(&b"\x01\x02"[..]));
    assert_eq!(server.puts(), 2);
}

#[tokio::test]
async fn watch_observes_puts_from_every_writer() {
    kvbench_test::tracing::init();
    let server = TestGrpcServer::new().await;
    let store = Arc::new(connect(&server).await);

    let mut events = store.watch(b"foo").await.unwrap();
    assert_eq!(server.watches(), 1);

    let (concurrency, request_count) = (3, 4);
    let writers: Vec<_> = (0..concurrency)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..request_count {
                    store.put(b"foo", b"bar").await.unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let mut revisions = Vec::new();
    while revisions.len() < concurrency * request_count {
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.key, Bytes::from_static(b"foo"));
        revisions.push(event.mod_revision.0);
    }

    assert_eq!(revisions, (1..=12).collect::<Vec<_>>());
    assert_eq!(server.revision(), 12);
}

#[tokio::test]
async fn canceled_watch_surfaces_status() {
    let server = TestGrpcServer::builder()
        .cancel_watches("etcdserver: mvcc: required revision has been compacted")
        .spawn()
        .await;
    let store = connect(&server).await;

    let mut events = store.watch(b"foo").await.unwrap();

    let error = events.next().await.unwrap().unwrap_err();
    let Error::Status {
        operation,
        status,
        message,
    } = error
    else {
        panic!("expected status error, got {error:?}");
    };
    assert_eq!(operation, Operation::Watch);
    assert_eq!(status, "canceled");
    assert!(message.contains("compacted"), "{message}");
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn rejected_put_surfaces_status() {
    let server = TestGrpcServer::builder().reject_puts().spawn().await;
    let store = connect(&server).await;

    let error = store.put(b"foo", b"bar").await.unwrap_err();
    assert!(
        matches!(
            &error,
            Error::Status { operation: Operation::Put, status, .. } if status == "Internal"
        ),
        "{error:?}"
    );
}

#[tokio::test]
async fn authenticates_and_sends_token() {
    let server = TestGrpcServer::builder()
        .credentials("root", "secret")
        .spawn()
        .await;
    let store = connect(&server).await;

    let error = store.put(b"foo", b"bar").await.unwrap_err();
    assert!(
        matches!(&error, Error::Status { status, .. } if status == "Unauthenticated"),
        "{error:?}"
    );
    let Err(error) = store.watch(b"foo").await else {
        panic!("expected the watch to be rejected without a token");
    };
    assert_eq!(error.operation(), Operation::Watch);
    assert_eq!(server.watches(), 0);

    let token = store.authenticate("root", "secret").await.unwrap();
    assert_eq!(token.as_str(), TEST_TOKEN);
    assert_eq!(server.authentications(), 1);

    let store = store.with_token(token);
    let mut events = store.watch(b"foo").await.unwrap();
    store.put(b"foo", b"baz").await.unwrap();

    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.value, Bytes::from_static(b"baz"));
    assert_eq!(server.puts(), 1);
    assert_eq!(server.watches(), 1);
}

#[tokio::test]
async fn rejects_invalid_credentials() {
    let server = TestGrpcServer::builder()
        .credentials("root", "secret")
        .spawn()
        .await;
    let store = connect(&server).await;

    let error = store.authenticate("root", "wrong").await.unwrap_err();
    let Error::Auth { ref message } = error else {
        panic!("expected auth error, got {error:?}");
    };
    assert!(message.contains("InvalidArgument"), "{message}");
    assert_eq!(error.operation(), Operation::Authenticate);
    assert_eq!(server.authentications(), 0);
}

#[tokio::test]
async fn unreachable_endpoint_fails_to_connect() {
    let options =
        ClientOptions::new("http://127.0.0.1:1").connect_timeout(Duration::from_millis(500));

    let error = GrpcStore::connect(&options).await.unwrap_err();
    assert!(matches!(error, Error::Connection { .. }), "{error:?}");
    assert_eq!(error.operation(), Operation::Connect);
}

#[tokio::test]
async fn invalid_endpoint_fails_to_connect() {
    let options = ClientOptions::new("http://[::1");

    let error = GrpcStore::connect(&options).await.unwrap_err();
    let Error::Connection { endpoint, .. } = error else {
        panic!("expected connection error, got {error:?}");
    };
    assert_eq!(endpoint, "http://[::1");
}
