use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use identicore_protocol::{
    DiagnosticResponse, IdentifyRequest, Request, Response, StatusModel,
};
use identicore_server::{AppState, NullRecognizer, RateLimit, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (state, _worker) = AppState::new(&config, Arc::new(NullRecognizer)).unwrap();
    tokio::spawn(identicore_server::serve(listener, state));
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/core/ws"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Vec<u8>) {
    ws.send(Message::Binary(frame.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no frame within 5s")
        .expect("stream ended")
        .unwrap()
}

async fn recv_response(ws: &mut Client) -> Response {
    match recv(ws).await {
        Message::Binary(frame) => Response::from_frame(&frame).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

fn relaxed() -> ServerConfig {
    ServerConfig {
        send_limit: RateLimit::new(100, Duration::from_secs(30)),
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn ping_gets_pong() {
    let addr = start(relaxed()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, vec![0x10, 0x80]).await;
    match recv(&mut ws).await {
        Message::Binary(frame) => assert_eq!(frame.as_ref(), &[0x11, 0x80]),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn short_and_non_map_frames_are_ignored() {
    let addr = start(relaxed()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, vec![0x10]).await;
    send(&mut ws, vec![0x10, 0x90]).await;
    send(&mut ws, vec![0xA0, 0x80]).await; // identify without an image
    send(&mut ws, vec![0x00, 0x80]).await; // unknown tag
    send(&mut ws, Request::Ping.to_frame().unwrap()).await;

    assert_eq!(recv_response(&mut ws).await, Response::Pong);
}

#[tokio::test]
async fn diagnostic_reports_counters() {
    let addr = start(relaxed()).await;
    let mut ws = connect(addr).await;

    send(&mut ws, Request::Diagnostic.to_frame().unwrap()).await;
    assert_eq!(
        recv_response(&mut ws).await,
        Response::Diagnostic(DiagnosticResponse {
            alive: true,
            queue_len: 0,
            ws_clients: 1,
        })
    );

    let body = http_get(addr, "/api/diagnostic").await;
    assert!(body.contains("\"alive\":true"), "{body}");
}

#[tokio::test]
async fn identify_is_answered_by_the_worker() {
    let addr = start(relaxed()).await;
    let mut ws = connect(addr).await;

    let request = Request::Identify(IdentifyRequest {
        image: bytes::Bytes::from_static(b"jpeg"),
    });
    send(&mut ws, request.to_frame().unwrap()).await;

    let response = recv_response(&mut ws).await;
    assert!(matches!(response, Response::Identification(_)));
    assert_eq!(response.error_detail(), Some("No faces were found"));
}

#[tokio::test]
async fn requests_over_the_send_limit_are_throttled_but_pings_are_not() {
    let addr = start(ServerConfig {
        send_limit: RateLimit::new(2, Duration::from_secs(60)),
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(addr).await;

    for _ in 0..2 {
        send(&mut ws, Request::Diagnostic.to_frame().unwrap()).await;
        assert!(matches!(recv_response(&mut ws).await, Response::Diagnostic(_)));
    }

    send(&mut ws, Request::Diagnostic.to_frame().unwrap()).await;
    assert_eq!(
        recv_response(&mut ws).await,
        Response::Throttled(StatusModel::error("Too many requests, try again later."))
    );

    send(&mut ws, Request::Ping.to_frame().unwrap()).await;
    assert_eq!(recv_response(&mut ws).await, Response::Pong);
}

#[tokio::test]
async fn connections_over_the_connect_limit_are_closed() {
    let addr = start(ServerConfig {
        connect_limit: RateLimit::new(1, Duration::from_secs(60)),
        ..relaxed()
    })
    .await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    match recv(&mut second).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1013);
            assert_eq!(frame.reason.as_str(), "too many connections, try again later.");
        }
        other => panic!("expected close, got {other:?}"),
    }

    send(&mut first, Request::Ping.to_frame().unwrap()).await;
    assert_eq!(recv_response(&mut first).await, Response::Pong);
}

/// Minimal HTTP/1.1 GET over a raw socket.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}
