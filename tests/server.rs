//! Integration tests driving the server over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use linekv::config::Config;
use linekv::server::Server;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(3);

fn test_config() -> Config {
    Config {
        listen: "127.0.0.1:0".to_string(),
        shutdown_grace: 2,
        ..Config::default()
    }
}

async fn start_server(
    config: Config,
) -> (
    SocketAddr,
    oneshot::Sender<()>,
    JoinHandle<std::io::Result<()>>,
) {
    let server = Server::bind(config).expect("bind server");
    let addr = server.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .run_until(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    (addr, shutdown_tx, handle)
}

async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (reader, writer) = stream.into_split();
    (BufReader::new(reader), writer)
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) {
    writer.write_all(line.as_bytes()).await.expect("send line");
    writer.write_all(b"\n").await.expect("send newline");
}

async fn read_response_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("timed out waiting for response")
        .expect("read response");
    line
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Value {
    let line = read_response_line(reader).await;
    serde_json::from_str(line.trim_end()).expect("response is valid JSON")
}

#[tokio::test]
async fn put_then_get_roundtrip() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    // The canonical load-test exchange: a 256-character value.
    let value = "x".repeat(256);
    send_line(
        &mut writer,
        &json!({"key": "key_1_1", "value": &value}).to_string(),
    )
    .await;
    assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));

    send_line(&mut writer, &json!({"key": "key_1_1"}).to_string()).await;
    assert_eq!(
        read_response(&mut reader).await,
        json!({"status": "OK", "value": value})
    );

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn response_bytes_match_reference_contract() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, r#"{"key":"k1","value":"v1"}"#).await;
    assert_eq!(read_response_line(&mut reader).await, "{\"status\":\"OK\"}\n");

    send_line(&mut writer, r#"{"key":"k1"}"#).await;
    assert_eq!(
        read_response_line(&mut reader).await,
        "{\"status\":\"OK\",\"value\":\"v1\"}\n"
    );

    send_line(&mut writer, r#"{"key":"missing"}"#).await;
    assert_eq!(
        read_response_line(&mut reader).await,
        "{\"status\":\"NOT_FOUND\"}\n"
    );

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn get_of_never_put_key_is_not_found() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, r#"{"key":"missing"}"#).await;
    assert_eq!(
        read_response(&mut reader).await,
        json!({"status": "NOT_FOUND"})
    );

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn malformed_line_leaves_connection_usable() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, "definitely not json").await;
    let response = read_response(&mut reader).await;
    assert_eq!(response["status"], "ERROR");
    assert!(response["reason"].is_string());

    // The connection stays open and serves the next valid request.
    send_line(&mut writer, r#"{"key":"k1","value":"v1"}"#).await;
    assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn pipelined_requests_answered_in_order() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    writer
        .write_all(
            b"{\"key\":\"a\",\"value\":\"1\"}\n{\"key\":\"b\",\"value\":\"2\"}\n{\"key\":\"a\"}\n{\"key\":\"b\"}\n",
        )
        .await?;

    assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));
    assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));
    assert_eq!(
        read_response(&mut reader).await,
        json!({"status": "OK", "value": "1"})
    );
    assert_eq!(
        read_response(&mut reader).await,
        json!({"status": "OK", "value": "2"})
    );

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn last_write_wins_across_connections() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;

    let (mut reader_a, mut writer_a) = connect(addr).await;
    send_line(&mut writer_a, r#"{"key":"shared","value":"first"}"#).await;
    assert_eq!(read_response(&mut reader_a).await, json!({"status": "OK"}));

    let (mut reader_b, mut writer_b) = connect(addr).await;
    send_line(&mut writer_b, r#"{"key":"shared","value":"second"}"#).await;
    assert_eq!(read_response(&mut reader_b).await, json!({"status": "OK"}));

    // Either connection observes the later write.
    send_line(&mut writer_a, r#"{"key":"shared"}"#).await;
    assert_eq!(
        read_response(&mut reader_a).await,
        json!({"status": "OK", "value": "second"})
    );

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn concurrent_connections_with_disjoint_keys() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;

    let mut clients = Vec::new();
    for vu in 0..10 {
        clients.push(tokio::spawn(async move {
            let (mut reader, mut writer) = connect(addr).await;
            for iter in 0..50 {
                let key = format!("key_{vu}_{iter}");
                let value = format!("value_{vu}_{iter}");
                send_line(
                    &mut writer,
                    &json!({"key": &key, "value": &value}).to_string(),
                )
                .await;
                assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));

                // Read-your-writes on the same connection.
                send_line(&mut writer, &json!({"key": &key}).to_string()).await;
                assert_eq!(
                    read_response(&mut reader).await,
                    json!({"status": "OK", "value": value})
                );
            }
        }));
    }
    for client in clients {
        client.await.expect("client task");
    }

    // Every key written concurrently is independently retrievable afterward.
    let (mut reader, mut writer) = connect(addr).await;
    for vu in 0..10 {
        for iter in 0..50 {
            send_line(&mut writer, &json!({"key": format!("key_{vu}_{iter}")}).to_string()).await;
            assert_eq!(
                read_response(&mut reader).await,
                json!({"status": "OK", "value": format!("value_{vu}_{iter}")})
            );
        }
    }

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn oversized_frame_gets_error_then_close() -> std::io::Result<()> {
    let config = Config {
        max_frame_bytes: 64,
        ..test_config()
    };
    let (addr, shutdown, server) = start_server(config).await;
    let (mut reader, mut writer) = connect(addr).await;

    let oversized = format!("{{\"key\":\"k\",\"value\":\"{}\"}}", "x".repeat(200));
    send_line(&mut writer, &oversized).await;

    let response = read_response(&mut reader).await;
    assert_eq!(response["status"], "ERROR");

    // Server closes the connection afterwards.
    let eof = timeout(READ_TIMEOUT, async {
        let mut line = String::new();
        reader.read_line(&mut line).await
    })
    .await
    .expect("timed out waiting for close")?;
    assert_eq!(eof, 0);

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}

#[tokio::test]
async fn graceful_shutdown_closes_idle_connections() -> std::io::Result<()> {
    let (addr, shutdown, server) = start_server(test_config()).await;
    let (mut reader, mut writer) = connect(addr).await;

    // One round-trip so the connection is accepted before we shut down.
    send_line(&mut writer, r#"{"key":"k","value":"v"}"#).await;
    assert_eq!(read_response(&mut reader).await, json!({"status": "OK"}));

    let _ = shutdown.send(());

    // The drained handler hangs up on its own; the server task finishes
    // well inside the grace period.
    let eof = timeout(READ_TIMEOUT, async {
        let mut line = String::new();
        reader.read_line(&mut line).await
    })
    .await
    .expect("timed out waiting for drain")?;
    assert_eq!(eof, 0);

    timeout(READ_TIMEOUT, server)
        .await
        .expect("server did not stop")??;
    Ok(())
}

#[tokio::test]
async fn idle_connection_is_closed_after_timeout() -> std::io::Result<()> {
    let config = Config {
        idle_timeout: 1,
        ..test_config()
    };
    let (addr, shutdown, server) = start_server(config).await;
    let (mut reader, _writer) = connect(addr).await;

    // Send nothing; the server should hang up after the idle period.
    let eof = timeout(Duration::from_secs(5), async {
        let mut line = String::new();
        reader.read_line(&mut line).await
    })
    .await
    .expect("timed out waiting for idle close")?;
    assert_eq!(eof, 0);

    let _ = shutdown.send(());
    server.await??;
    Ok(())
}
