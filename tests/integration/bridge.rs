//! Bridge integration tests
//!
//! Each test runs a real [`Bridge`] on loopback. A [`StaticResolver`] stands
//! in for `SO_ORIGINAL_DST`, pointing at an upstream server owned by the test.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use ya_proxy::config::{ConnectionConfig, ListenConfig};
use ya_proxy::{
    Bridge, BridgeError, BridgeHandle, ConnectionStats, OriginalDstResolver, StaticResolver,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

struct RunningBridge {
    addr: SocketAddr,
    handle: BridgeHandle,
    stats: Arc<ConnectionStats>,
    task: JoinHandle<Result<(), BridgeError>>,
}

impl RunningBridge {
    async fn shutdown(self) {
        self.handle.stop();
        let result = timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("accept loop did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

fn start_bridge(
    resolver: Arc<dyn OriginalDstResolver>,
    connection: &ConnectionConfig,
) -> RunningBridge {
    let bridge = Bridge::bind(&ListenConfig::new("127.0.0.1:0".parse().unwrap()), connection)
        .unwrap()
        .with_resolver(resolver);

    RunningBridge {
        addr: bridge.local_addr(),
        handle: bridge.handle(),
        stats: bridge.stats(),
        task: tokio::spawn(bridge.run()),
    }
}

/// Upstream that answers every `PING` with `PONG` until EOF
async fn spawn_ping_pong_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                while stream.read_exact(&mut buf).await.is_ok() {
                    if &buf == b"PING" && stream.write_all(b"PONG").await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Upstream that echoes everything until EOF
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });

    addr
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct FailingResolver;

impl OriginalDstResolver for FailingResolver {
    fn original_dst(&self, _stream: &TcpStream) -> Result<SocketAddr, BridgeError> {
        Err(BridgeError::no_original_destination("SO_ORIGINAL_DST not set"))
    }
}

// ============================================================================
// Data path
// ============================================================================

#[tokio::test]
async fn test_ping_pong_through_bridge() {
    let upstream = spawn_ping_pong_server().await;
    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(b"PING").await.unwrap();

    let mut reply = [0u8; 4];
    timeout(TEST_TIMEOUT, client.read_exact(&mut reply))
        .await
        .expect("no reply")
        .unwrap();
    assert_eq!(&reply, b"PONG");

    drop(client);
    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.completed() == 1).await;

    let snapshot = bridge.stats.snapshot();
    assert_eq!(snapshot.total_accepted, 1);
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.bytes_forward, 4);
    assert_eq!(snapshot.bytes_reverse, 4);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_upstream_sees_proxy_not_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, peer) = listener.accept().await.unwrap();
        let mut line = [0u8; 5];
        stream.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"PING\n");
        stream.write_all(b"PONG\n").await.unwrap();
        // Client-initiated FIN reaches the upstream
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        peer
    });

    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    let client_addr = client.local_addr().unwrap();
    client.write_all(b"PING\n").await.unwrap();

    let mut reply = [0u8; 5];
    timeout(TEST_TIMEOUT, client.read_exact(&mut reply))
        .await
        .expect("no reply")
        .unwrap();
    assert_eq!(&reply, b"PONG\n");
    client.shutdown().await.unwrap();

    let upstream_peer = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert_ne!(upstream_peer, client_addr);
    assert_ne!(upstream_peer, bridge.addr);

    // Both sides closed once the upstream hung up
    let mut rest = Vec::new();
    timeout(TEST_TIMEOUT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_large_transfer_is_byte_exact() {
    const LEN: usize = 1024 * 1024 + 17;

    let upstream = spawn_echo_server().await;
    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );

    let payload: Vec<u8> = (0..LEN).map(|i| (i % 251) as u8).collect();
    let client = TcpStream::connect(bridge.addr).await.unwrap();
    let (mut rd, mut wr) = client.into_split();

    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    });

    let mut received = Vec::with_capacity(LEN);
    timeout(TEST_TIMEOUT, rd.read_to_end(&mut received))
        .await
        .expect("transfer did not finish")
        .unwrap();
    writer.await.unwrap();

    assert_eq!(received.len(), LEN);
    assert!(received == expected);

    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.completed() == 1).await;
    assert_eq!(bridge.stats.bytes_forward(), LEN as u64);
    assert_eq!(bridge.stats.bytes_reverse(), LEN as u64);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_half_close_delivers_late_response() {
    // Upstream reads the whole request before answering
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        stream.read_to_end(&mut request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream
            .write_all(format!("got {} bytes", request.len()).as_bytes())
            .await
            .unwrap();
    });

    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    client.write_all(b"hello upstream").await.unwrap();
    client.shutdown().await.unwrap();

    let mut response = String::new();
    timeout(TEST_TIMEOUT, client.read_to_string(&mut response))
        .await
        .expect("response never arrived")
        .unwrap();
    assert_eq!(response, "got 14 bytes");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() {
    let upstream = spawn_echo_server().await;
    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );
    let addr = bridge.addr;

    let clients: Vec<_> = (0..16u8)
        .map(|i| {
            tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let message = vec![i; 64];
                client.write_all(&message).await.unwrap();
                let mut echoed = vec![0u8; 64];
                client.read_exact(&mut echoed).await.unwrap();
                assert_eq!(echoed, message);
            })
        })
        .collect();

    for client in clients {
        timeout(TEST_TIMEOUT, client).await.unwrap().unwrap();
    }

    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.completed() == 16).await;
    assert_eq!(bridge.stats.total_accepted(), 16);

    bridge.shutdown().await;
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_missing_original_destination_closes_inbound() {
    // Would-be upstream; the bridge must never dial it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let bridge = start_bridge(Arc::new(FailingResolver), &ConnectionConfig::default());

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(TEST_TIMEOUT, client.read(&mut buf))
        .await
        .expect("inbound was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.no_original_dst() == 1).await;
    assert_eq!(bridge.stats.dial_failures(), 0);
    assert_eq!(bridge.stats.active(), 0);

    let no_dial = timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(no_dial.is_err(), "upstream must not be contacted");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_dial_failure_closes_inbound() {
    let refused = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let bridge = start_bridge(Arc::new(StaticResolver::new(refused)), &ConnectionConfig::default());

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(TEST_TIMEOUT, client.read(&mut buf))
        .await
        .expect("inbound was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.dial_failures() == 1).await;
    assert_eq!(bridge.stats.completed(), 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_upstream_reset_ends_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Zero linger turns close into RST
        stream.set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);
    });

    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );

    let mut client = TcpStream::connect(bridge.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(TEST_TIMEOUT, client.read(&mut buf))
        .await
        .expect("session did not end")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = Arc::clone(&bridge.stats);
    wait_for(|| stats.active() == 0 && stats.total_accepted() == 1).await;

    bridge.shutdown().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_keeps_in_flight_sessions() {
    let upstream = spawn_ping_pong_server().await;
    let bridge = start_bridge(
        Arc::new(StaticResolver::new(upstream)),
        &ConnectionConfig::default(),
    );
    let addr = bridge.addr;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PING").await.unwrap();
    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).await.unwrap();

    bridge.shutdown().await;

    // Listener is closed
    assert!(TcpStream::connect(addr).await.is_err());

    // Existing session still works
    client.write_all(b"PING").await.unwrap();
    timeout(TEST_TIMEOUT, client.read_exact(&mut reply))
        .await
        .expect("in-flight session was torn down")
        .unwrap();
    assert_eq!(&reply, b"PONG");
}

#[tokio::test]
async fn test_static_destination_mode() {
    let upstream = spawn_ping_pong_server().await;
    let connection = ConnectionConfig {
        static_destination: Some(upstream),
        ..ConnectionConfig::default()
    };

    let bridge =
        Bridge::bind(&ListenConfig::new("127.0.0.1:0".parse().unwrap()), &connection).unwrap();
    let addr = bridge.local_addr();
    let handle = bridge.handle();
    let task = tokio::spawn(bridge.run());

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PING").await.unwrap();
    let mut reply = [0u8; 4];
    timeout(TEST_TIMEOUT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"PONG");

    handle.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_run_fails_on_taken_address() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let result = ya_proxy::run(taken.local_addr().unwrap()).await;
    assert!(matches!(result, Err(BridgeError::ListenFailed { .. })));
}
