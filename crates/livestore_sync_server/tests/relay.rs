//! End-to-end relay tests over real sockets.

use livestore_sync_server::{ServerConfig, SyncServer};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

async fn start() -> (Arc<SyncServer>, SocketAddr, oneshot::Sender<()>) {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
    let server = Arc::new(SyncServer::new(config));
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = Arc::clone(&server);
    tokio::spawn(async move {
        running
            .serve(listener, async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
    });
    (server, addr, stop_tx)
}

async fn wait_for_sessions(server: &SyncServer, n: usize) {
    timeout(Duration::from_secs(5), async {
        while server.session_count() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn read_event(reader: &mut BufReader<OwnedReadHalf>) -> Value {
    let mut line = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn event_reaches_other_sessions_only() {
    let (server, addr, _stop) = start().await;

    let (a_read, mut a_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let (b_read, _b_write) = TcpStream::connect(addr).await.unwrap().into_split();
    wait_for_sessions(&server, 2).await;

    a_write
        .write_all(b"{\"event\":\"refresh:chat\",\"table\":\"messages\"}\n")
        .await
        .unwrap();

    let mut b_reader = BufReader::new(b_read);
    assert_eq!(
        read_event(&mut b_reader).await,
        json!({"event": "refresh:chat", "table": "messages"})
    );

    // Nothing comes back to the sender.
    let mut a_reader = BufReader::new(a_read);
    let mut line = String::new();
    assert!(
        timeout(Duration::from_millis(100), a_reader.read_line(&mut line))
            .await
            .is_err()
    );
    assert_eq!(server.relayed_count(), 1);
}

#[tokio::test]
async fn invalid_lines_are_skipped_not_fatal() {
    let (server, addr, _stop) = start().await;

    let (_a_read, mut a_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let (b_read, _b_write) = TcpStream::connect(addr).await.unwrap().into_split();
    wait_for_sessions(&server, 2).await;

    a_write
        .write_all(b"garbage\n{\"event\":\"other\",\"table\":\"users\"}\n")
        .await
        .unwrap();
    a_write
        .write_all(b"{\"event\":\"refresh:data\",\"table\":\"users\"}\n")
        .await
        .unwrap();

    let mut b_reader = BufReader::new(b_read);
    assert_eq!(
        read_event(&mut b_reader).await,
        json!({"event": "refresh:data", "table": "users"})
    );
    assert_eq!(server.session_count(), 2);
}

#[tokio::test]
async fn disconnect_unregisters_session() {
    let (server, addr, _stop) = start().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    wait_for_sessions(&server, 1).await;

    drop(stream);
    wait_for_sessions(&server, 0).await;
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let (server, addr, stop) = start().await;
    let _stream = TcpStream::connect(addr).await.unwrap();
    wait_for_sessions(&server, 1).await;

    stop.send(()).unwrap();
    wait_for_sessions(&server, 0).await;
}
