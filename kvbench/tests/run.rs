use std::time::Duration;

use kvbench::config::{Config, ConfigSecret};
use kvbench::connect::connect;
use kvbench_client::{GrpcStore, HttpStore, Revision};
use kvbench_test::gateway::TestGateway;
use kvbench_test::grpc::TestGrpcServer;
use secrecy::SecretBox;

fn config(gateway: &TestGateway) -> Config {
    Config {
        endpoint: gateway.url(),
        ..Default::default()
    }
}

#[tokio::test]
async fn puts_from_every_writer() {
    kvbench_test::tracing::init();
    let gateway = TestGateway::new().await;
    let config = Config {
        concurrency: 3,
        request_count: 10,
        enable_put: true,
        ..config(&gateway)
    };

    let store = connect::<HttpStore>(&config).await.unwrap();
    let report = kvbench::run(&config, store).await.unwrap();

    assert_eq!(report.puts_per_task, vec![10, 10, 10]);
    assert_eq!(report.last_revision, Some(Revision(30)));
    assert_eq!(report.events_observed, 0);
    assert_eq!(gateway.puts(), 30);
    assert_eq!(gateway.revision(), 30);
    assert_eq!(gateway.watches(), 0);
}

#[tokio::test]
async fn watch_observes_all_puts() {
    kvbench_test::tracing::init();
    let gateway = TestGateway::new().await;
    let config = Config {
        concurrency: 2,
        request_count: 5,
        enable_put: true,
        enable_watch: true,
        ..config(&gateway)
    };

    let store = connect::<HttpStore>(&config).await.unwrap();
    let report = kvbench::run(&config, store).await.unwrap();

    assert_eq!(report.events_observed, 10);
    assert_eq!(report.total_puts(), 10);
    assert_eq!(gateway.puts(), 10);
    assert_eq!(gateway.watches(), 1);
}

#[tokio::test]
async fn zero_requests_finish_immediately() {
    let gateway = TestGateway::new().await;
    let config = Config {
        request_count: 0,
        enable_put: true,
        ..config(&gateway)
    };

    let store = connect::<HttpStore>(&config).await.unwrap();
    let report = kvbench::run(&config, store).await.unwrap();

    assert_eq!(report.total_puts(), 0);
    assert!(report.elapsed < Duration::from_secs(1));
    assert_eq!(gateway.puts(), 0);
}

#[tokio::test]
async fn authenticates_before_any_traffic() {
    let gateway = TestGateway::builder()
        .credentials("root", "secret")
        .spawn()
        .await;
    let config = Config {
        username: "root".to_owned(),
        password: Some(SecretBox::new(Box::new(ConfigSecret::from("secret")))),
        request_count: 4,
        enable_put: true,
        enable_watch: true,
        ..config(&gateway)
    };

    let store = connect::<HttpStore>(&config).await.unwrap();
    assert_eq!(gateway.authentications(), 1);

    let report = kvbench::run(&config, store).await.unwrap();
    assert_eq!(report.events_observed, 4);
    assert_eq!(gateway.puts(), 4);
}

#[tokio::test]
async fn failed_authentication_aborts_before_traffic() {
    let gateway = TestGateway::builder()
        .credentials("root", "secret")
        .spawn()
        .await;
    let config = Config {
        username: "root".to_owned(),
        password: Some(SecretBox::new(Box::new(ConfigSecret::from("wrong")))),
        enable_put: true,
        enable_watch: true,
        ..config(&gateway)
    };

    let error = connect::<HttpStore>(&config).await.unwrap_err();

    assert!(format!("{error:#}").contains("failed to authenticate as `root`"));
    assert_eq!(gateway.authentications(), 0);
    assert_eq!(gateway.puts(), 0);
    assert_eq!(gateway.watches(), 0);
}

#[tokio::test]
async fn unreachable_store_fails_to_connect() {
    let config = Config {
        endpoint: "http://127.0.0.1:1".to_owned(),
        connect_timeout: Duration::from_millis(500),
        enable_put: true,
        ..Default::default()
    };

    let error = connect::<HttpStore>(&config).await.unwrap_err();
    assert!(format!("{error:#}").contains("failed to connect to store"));
}

#[tokio::test]
async fn rejected_put_fails_the_run() {
    let gateway = TestGateway::builder().reject_puts().spawn().await;
    let config = Config {
        concurrency: 2,
        request_count: 3,
        enable_put: true,
        ..config(&gateway)
    };

    let store = connect::<HttpStore>(&config).await.unwrap();
    let error = kvbench::run(&config, store).await.unwrap_err();

    assert!(format!("{error:#}").contains("failed"));
    assert_eq!(gateway.puts(), 0);
}

#[tokio::test]
async fn grpc_binding_observes_all_puts() {
    kvbench_test::tracing::init();
    let server = TestGrpcServer::builder()
        .credentials("root", "secret")
        .spawn()
        .await;
    let config = Config {
        endpoint: server.url(),
        concurrency: 4,
        request_count: 5,
        enable_put: true,
        enable_watch: true,
        username: "root".to_owned(),
        password: Some(SecretBox::new(Box::new(ConfigSecret::from("secret")))),
        ..Default::default()
    };

    let store = connect::<GrpcStore>(&config).await.unwrap();
    let report = kvbench::run(&config, store).await.unwrap();

    assert_eq!(report.puts_per_task, vec![5, 5, 5, 5]);
    assert_eq!(report.events_observed, 20);
    assert_eq!(report.last_revision, Some(Revision(20)));
    assert_eq!(server.authentications(), 1);
    assert_eq!(server.watches(), 1);
    assert_eq!(server.revision(), 20);
}
