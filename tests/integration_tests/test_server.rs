use prometheus::{Gauge, Registry};
use sql_exporter::server;
use std::io::Write;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_scrape_and_health_endpoints() {
    let registry = Registry::new();
    let gauge = Gauge::new("query_result_up", "Result of an SQL query").unwrap();
    gauge.set(1.0);
    registry.register(Box::new(gauge)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(
        listener,
        registry,
        async {
            let _ = stopped.await;
        },
        Duration::from_secs(5),
    ));

    let client = reqwest::Client::new();
    let metrics = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .expect("Scrape should succeed");
    assert!(metrics.status().is_success());
    assert!(
        metrics.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert!(metrics.text().await.unwrap().contains("query_result_up 1"));

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .expect("Health check should succeed");
    assert_eq!(health.text().await.unwrap(), "OK");

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("Server should stop after shutdown")
        .expect("Server task should not panic")
        .expect("Server should exit cleanly");
}

#[tokio::test]
async fn test_stalled_client_does_not_block_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let grace = Duration::from_millis(200);
    let server = tokio::spawn(server::serve(
        listener,
        Registry::new(),
        async {
            let _ = stopped.await;
        },
        grace,
    ));

    // Headers are never terminated, so the connection stays in flight.
    let mut stalled = std::net::TcpStream::connect(addr).expect("Client should connect");
    stalled
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: x\r\n")
        .expect("Partial request should be sent");
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(3), server)
        .await
        .expect("Server should stop once the grace period ends")
        .expect("Server task should not panic")
        .expect("Server should exit cleanly");
    drop(stalled);
}
