#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Integration tests use unwrap for brevity

//! End-to-end tests for the WebSocket gateway.
//!
//! Binds the gateway on an ephemeral port and talks to it with a real
//! WebSocket client.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

use pseudorun_core::protocol::ServerMessage;
use pseudorun_daemon::server::{GatewayState, HealthReport, build_router, serve};

use common::{ECHO_SOURCE, Fixture, INTERACTIVE};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

async fn spawn_gateway(state: GatewayState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state));
    addr
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap();
        if frame.is_text() {
            return frame.to_text().unwrap().to_string();
        }
    }
}

async fn next_message(client: &mut Client) -> ServerMessage {
    let text = next_text(client).await;
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("bad frame {text:?}: {e}"))
}

fn output(message: &str) -> ServerMessage {
    ServerMessage::Output {
        message: message.to_string(),
    }
}

#[tokio::test]
async fn interactive_session_end_to_end() {
    let fx = Fixture::new(INTERACTIVE);
    let addr = spawn_gateway(GatewayState::from_config(&fx.config())).await;
    let mut client = connect(addr, "/").await;

    assert_eq!(next_text(&mut client).await, "Connected to Compiler Server");

    client
        .send(Message::text("print 1\nread x\nprint x"))
        .await
        .unwrap();
    assert_eq!(next_message(&mut client).await, output("1"));
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::Input {
            prompt: "x?".to_string()
        }
    );

    client
        .send(Message::text(r#"{"type":"input","value":"42"}"#))
        .await
        .unwrap();
    assert_eq!(next_message(&mut client).await, output("42"));
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::Exit { code: Some(0) }
    );
}

#[tokio::test]
async fn run_envelope_is_unwrapped() {
    let fx = Fixture::new(ECHO_SOURCE);
    let addr = spawn_gateway(GatewayState::from_config(&fx.config())).await;
    let mut client = connect(addr, "/ws").await;
    next_text(&mut client).await;

    client
        .send(Message::text(r#"{"type":"run","code":"hello"}"#))
        .await
        .unwrap();
    assert_eq!(next_message(&mut client).await, output("hello"));
    assert_eq!(
        next_message(&mut client).await,
        ServerMessage::Exit { code: Some(0) }
    );
}

#[tokio::test]
async fn input_without_program_is_reported() {
    let fx = Fixture::new(ECHO_SOURCE);
    let addr = spawn_gateway(GatewayState::from_config(&fx.config())).await;
    let mut client = connect(addr, "/").await;
    next_text(&mut client).await;

    client
        .send(Message::text(r#"{"type":"input","value":"5"}"#))
        .await
        .unwrap();
    let ServerMessage::Output { message } = next_message(&mut client).await else {
        panic!("expected an output frame");
    };
    assert!(message.starts_with("[error] "), "{message}");
    assert!(!fx.input_path().exists());
}

#[tokio::test]
async fn launch_failure_is_reported() {
    let fx = Fixture::new(ECHO_SOURCE);
    let mut config = fx.config();
    config.compiler.executable = fx.dir.path().join("missing-compiler");
    let addr = spawn_gateway(GatewayState::from_config(&config)).await;
    let mut client = connect(addr, "/").await;
    next_text(&mut client).await;

    client.send(Message::text("print 1")).await.unwrap();
    let ServerMessage::Output { message } = next_message(&mut client).await else {
        panic!("expected an output frame");
    };
    assert!(message.starts_with("[error] "), "{message}");
}

#[tokio::test]
async fn disconnect_terminates_running_process() {
    let fx = Fixture::new(INTERACTIVE);
    let state = GatewayState::from_config(&fx.config());
    let launcher = std::sync::Arc::clone(&state.launcher);
    let connections = std::sync::Arc::clone(&state.connections);
    let addr = spawn_gateway(state).await;
    let mut client = connect(addr, "/").await;
    next_text(&mut client).await;

    client.send(Message::text("read x")).await.unwrap();
    assert_eq!(next_message(&mut client).await, output("1"));
    assert_eq!(launcher.active_count(), 1);
    assert_eq!(connections.connection_count(), 1);

    client.close(None).await.unwrap();
    drop(client);

    tokio::time::timeout(FRAME_TIMEOUT, async {
        while launcher.active_count() > 0 || connections.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process was not terminated after disconnect");
}

#[tokio::test]
async fn health_reports_pool_and_connections() {
    let fx = Fixture::new(ECHO_SOURCE);
    let app = build_router(GatewayState::from_config(&fx.config()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let report: HealthReport = serde_json::from_slice(&body).unwrap();
    assert_eq!(report.status, "serving");
    assert_eq!(report.active_processes, 0);
    assert_eq!(report.max_processes, 1);
    assert_eq!(report.connections, 0);
}

#[tokio::test]
async fn plain_get_is_not_upgraded() {
    let fx = Fixture::new(ECHO_SOURCE);
    let app = build_router(GatewayState::from_config(&fx.config()));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
