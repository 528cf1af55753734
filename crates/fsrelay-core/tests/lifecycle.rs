//! Connection lifecycle: idle timeout, frame deadline, and shutdown drain.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use fsrelay_core::ShutdownReason;
use fsrelay_core::protocol::{Method, encode_request, read_response};
use fsrelay_test_utils::TestServer;

/// Read until the server closes the connection, returning how long it took.
async fn wait_closed(stream: &mut TcpStream, limit: Duration) -> Duration {
    let started = Instant::now();
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(limit, stream.read(&mut buf))
        .await
        .expect("connection was not closed in time")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes before close");
    started.elapsed()
}

fn frame(server: &TestServer, name: &str) -> Vec<u8> {
    encode_request(Method::CreateFile, b"", server.remote(name).as_bytes(), b"payload").unwrap()
}

#[test_log::test(tokio::test)]
async fn idle_connection_closed_after_timeout() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(1)).await;
    let mut stream = server.raw_connect().await;
    server.wait_for_active(1).await;

    let elapsed = wait_closed(&mut stream, Duration::from_secs(5)).await;
    assert!(elapsed >= Duration::from_millis(800), "closed after {elapsed:?}");
    server.wait_for_active(0).await;
}

#[test_log::test(tokio::test)]
async fn idle_timer_resets_after_each_response() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(1)).await;
    let mut stream = server.raw_connect().await;

    for i in 0..3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        stream.write_all(&frame(&server, &format!("f{i}"))).await.unwrap();
        assert!(read_response(&mut stream).await.unwrap().is_success());
    }
    // 1.8 s since connect, well past one idle window.
    assert_eq!(server.active_connections(), 1);

    wait_closed(&mut stream, Duration::from_secs(5)).await;
}

#[test_log::test(tokio::test)]
async fn half_closed_connection_lingers_for_idle_window() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(1)).await;
    let mut stream = server.raw_connect().await;

    stream.write_all(&frame(&server, "linger")).await.unwrap();
    assert!(read_response(&mut stream).await.unwrap().is_success());
    stream.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.active_connections(), 1);
    server.wait_for_active(0).await;
}

#[test_log::test(tokio::test)]
async fn half_closed_without_requests_closes_immediately() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(30)).await;
    let mut stream = server.raw_connect().await;
    stream.shutdown().await.unwrap();

    let elapsed = wait_closed(&mut stream, Duration::from_secs(5)).await;
    assert!(elapsed < Duration::from_secs(5));
    server.wait_for_active(0).await;
}

#[test_log::test(tokio::test)]
async fn stalled_frame_hits_deadline() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(30).frame_timeout_secs(1)).await;
    let mut stream = server.raw_connect().await;

    let bytes = frame(&server, "stalled");
    stream.write_all(&bytes[..10]).await.unwrap();

    let started = Instant::now();
    let response = tokio::time::timeout(Duration::from_secs(5), read_response(&mut stream))
        .await
        .unwrap()
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(800), "failed after {:?}", started.elapsed());
    assert_eq!(response.code, 1);
    wait_closed(&mut stream, Duration::from_secs(5)).await;
    assert!(!server.path("stalled").exists());
}

#[test_log::test(tokio::test)]
async fn slow_steady_upload_outlasts_frame_deadline() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(30).frame_timeout_secs(1)).await;
    let mut stream = server.raw_connect().await;

    let body = vec![b'z'; 40];
    let bytes = encode_request(Method::CreateFile, b"", server.remote("slow.txt").as_bytes(), &body).unwrap();
    let (head, rest) = bytes.split_at(bytes.len() - body.len());
    stream.write_all(head).await.unwrap();
    for chunk in rest.chunks(2) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.write_all(chunk).await.unwrap();
    }

    let response = read_response(&mut stream).await.unwrap();
    assert!(response.is_success(), "{response:?}");
    assert_eq!(std::fs::read(server.path("slow.txt")).unwrap(), body);
}

#[test_log::test(tokio::test)]
async fn short_frame_before_half_close_gets_failure() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(30)).await;
    let mut stream = server.raw_connect().await;

    let bytes = frame(&server, "short");
    stream.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
    stream.shutdown().await.unwrap();

    let response = read_response(&mut stream).await.unwrap();
    assert_eq!(response.code, 1);
    assert!(response.message.contains("body"), "{}", response.message);
    wait_closed(&mut stream, Duration::from_secs(5)).await;
    assert!(!server.path("short").exists());
}

#[test_log::test(tokio::test)]
async fn shutdown_with_no_connections() {
    let server = TestServer::start().await;
    assert_eq!(server.shutdown().await, ShutdownReason::Terminate);
}

#[test_log::test(tokio::test)]
async fn shutdown_closes_idle_connections() {
    let server = TestServer::start_with(|b| b.idle_timeout_secs(30)).await;
    let mut stream = server.raw_connect().await;
    server.wait_for_active(1).await;

    server.trigger_shutdown();
    wait_closed(&mut stream, Duration::from_secs(5)).await;
    server.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn shutdown_drains_in_flight_frame() {
    let server = TestServer::start_with(|b| b.drain_poll_interval_ms(20)).await;
    let addr = server.addr();
    let mut stream = server.raw_connect().await;

    let bytes = frame(&server, "in-flight.txt");
    let (head, tail) = bytes.split_at(12);
    stream.write_all(head).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.trigger_shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!server.is_stopped(), "drain finished with a frame in flight");
    assert_eq!(server.active_connections(), 1);
    assert!(TcpStream::connect(addr).await.is_err(), "listener still accepting");

    stream.write_all(tail).await.unwrap();
    let response = read_response(&mut stream).await.unwrap();
    assert!(response.is_success());
    assert_eq!(std::fs::read(server.path("in-flight.txt")).unwrap(), b"payload");

    wait_closed(&mut stream, Duration::from_secs(5)).await;
    assert_eq!(server.shutdown().await, ShutdownReason::Terminate);
}
