mod e2e_utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use e2e_utils::{ClosingServer, CountingDialer, EchoServer, FailingDialer, SilentServer, TestProxyServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use tunnelproxy::adapters::RuleAccept;
use tunnelproxy::domain::RewriteRule;
use tunnelproxy::server::ProxyServerBuilder;
use tunnelproxy::tunnel::{TunnelSettings, CONNECTION_ESTABLISHED};

const IDLE: Duration = Duration::from_millis(100);

fn settings() -> TunnelSettings {
    TunnelSettings {
        buffer_size: 1024,
        idle_timeout: IDLE,
        socket_buffer_size: None,
    }
}

async fn expect_established(stream: &mut TcpStream) {
    let mut line = vec![0u8; CONNECTION_ESTABLISHED.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut line))
        .await
        .expect("Should receive the CONNECT reply within timeout")
        .expect("Should be able to read the CONNECT reply");
    assert_eq!(
        line,
        CONNECTION_ESTABLISHED,
        "unexpected reply: {}",
        String::from_utf8_lossy(&line)
    );
}

async fn read_response(stream: &mut TcpStream) -> String {
    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("Should receive a response within timeout")
        .expect("Should be able to read the response");
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_rewritten_connect_reaches_echo_server() {
    let echo = EchoServer::start().await.unwrap();
    let accept = RuleAccept::new(
        vec![],
        vec![RewriteRule {
            target: "www.example.com:443".to_string(),
            replacement: echo.addr().to_string(),
        }],
    );
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings()).accept(Arc::new(accept)))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect("www.example.com:443").await.unwrap();
    expect_established(&mut stream).await;

    stream.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("echo should answer")
        .unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn test_tunnel_works_with_socket_buffer_size_hint() {
    let echo = EchoServer::start().await.unwrap();
    let settings = TunnelSettings {
        socket_buffer_size: Some(8192),
        ..settings()
    };
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect(&echo.addr().to_string()).await.unwrap();
    expect_established(&mut stream).await;

    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
    let (mut reader, mut writer) = stream.into_split();
    let sent = payload.clone();
    let writing = tokio::spawn(async move { writer.write_all(&sent).await.map(|_| writer) });

    let mut received = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), reader.read_exact(&mut received))
        .await
        .expect("echo should answer")
        .unwrap();
    assert_eq!(received, payload);
    writing.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_blocked_target_is_forbidden_without_dialing() {
    let dialer = Arc::new(CountingDialer::default());
    let accept = RuleAccept::new(vec!["www.apple.com".to_string()], vec![]);
    let proxy = TestProxyServer::start(
        ProxyServerBuilder::new()
            .settings(settings())
            .accept(Arc::new(accept))
            .dial(dialer.clone()),
    )
    .await
    .expect("Failed to start proxy");

    let mut stream = proxy.connect("blocked.example:443").await.unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 403"), "got: {}", response);
    assert!(response.ends_with("CONNECT Not Allowed\n"), "got: {}", response);
    assert_eq!(dialer.calls(), 0);
}

#[tokio::test]
async fn test_dial_failure_is_bad_gateway() {
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings()).dial(Arc::new(FailingDialer)))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect("unreachable.example:443").await.unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 502"), "got: {}", response);
    assert!(response.contains("Content-Type: text/plain; charset=utf-8"));
    assert!(response.ends_with("CONNECT Not Allowed\n"), "got: {}", response);
}

#[tokio::test]
async fn test_silent_target_outlives_idle_timeout() {
    let silent = SilentServer::start(IDLE * 4, b"late").await.unwrap();
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings()))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect(&silent.addr().to_string()).await.unwrap();
    expect_established(&mut stream).await;

    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("late data should arrive")
        .expect("tunnel should still be open");
    assert_eq!(&buf, b"late");
}

#[tokio::test]
async fn test_target_close_reaches_client() {
    let closing = ClosingServer::start(b"bye").await.unwrap();
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings()))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect(&closing.addr().to_string()).await.unwrap();
    expect_established(&mut stream).await;

    let started = Instant::now();
    let rest = read_response(&mut stream).await;

    assert_eq!(rest, "bye");
    assert!(started.elapsed() < IDLE * 10, "close took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_shutdown_tears_down_open_tunnels() {
    let echo = EchoServer::start().await.unwrap();
    let proxy = TestProxyServer::start(ProxyServerBuilder::new().settings(settings()))
        .await
        .expect("Failed to start proxy");

    let mut stream = proxy.connect(&echo.addr().to_string()).await.unwrap();
    expect_established(&mut stream).await;

    drop(proxy);

    let rest = read_response(&mut stream).await;
    assert_eq!(rest, "");
}
