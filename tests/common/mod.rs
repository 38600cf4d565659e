#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::Result;
use controller_bridge::{config::Config, mock::MockTransport, router::RoutingMode};
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub const TARGET: &str = "bauklank-controller";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A configuration with short intervals so tests run quickly.
pub fn fast_config(routing: RoutingMode) -> Config {
    let mut config = Config::default();

    config.websocket.host = [127, 0, 0, 1].into();
    config.engines.routing = routing;
    config.serial.scan_interval = Duration::from_millis(50);
    config.serial.probe_timeout = Duration::from_millis(200);
    config.liveness.poll_interval = Duration::from_millis(50);
    config.liveness.refresh_interval = Duration::from_millis(500);

    config
}

/// Start a server on an arbitrary port, returning that port.
pub async fn start(config: Config, transport: MockTransport) -> Result<u16> {
    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move {
        controller_bridge::server::run_any_port(config, transport, port_tx).await
    });
    let port = port_rx.await?;

    Ok(port)
}

pub async fn connect_to(port: u16) -> Result<Client> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

pub async fn connect(config: Config, transport: MockTransport) -> Result<Client> {
    let port = start(config, transport).await?;

    connect_to(port).await
}

pub async fn receive(client: &mut Client) -> Result<Value> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let message = message.to_text()?;
    let message = serde_json::from_str(message)?;

    Ok(message)
}

/// Receive until a message satisfies the predicate.
pub async fn receive_until<F>(client: &mut Client, mut predicate: F) -> Result<Value>
where
    F: FnMut(&Value) -> bool,
{
    let found = async {
        loop {
            let message = receive(client).await?;
            if predicate(&message) {
                return Ok::<_, color_eyre::Report>(message);
            }
        }
    };

    timeout(Duration::from_secs(10), found).await?
}

pub fn is_status(message: &Value) -> bool {
    message["type"] == "controllerStatus"
}

pub fn is_slot_status(message: &Value, engine: &str, connected: bool) -> bool {
    is_status(message) && message["engine"] == engine && message["connected"] == connected
}
