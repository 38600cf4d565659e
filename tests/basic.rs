use color_eyre::Result;
use controller_bridge::{mock::MockTransport, router::RoutingMode};
use pretty_assertions::assert_eq;
use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn can_connect() -> Result<()> {
    connect(fast_config(RoutingMode::Channels), MockTransport::new()).await?;

    Ok(())
}

#[tokio::test]
async fn welcome_in_channels_mode() -> Result<()> {
    let mut client = connect(fast_config(RoutingMode::Channels), MockTransport::new()).await?;

    let version = receive(&mut client).await?;
    assert_eq!(version["type"], "serverVersion");
    assert!(version["version"]
        .as_str()
        .unwrap()
        .starts_with(env!("CARGO_PKG_VERSION")));

    assert_eq!(receive(&mut client).await?["type"], "machineStatus");

    let status = receive(&mut client).await?;
    assert_eq!(
        status,
        json!({
            "type": "controllerStatus",
            "connected": false,
            "engines": ["A", "B"],
            "encoders": {
                "timeoutSec": 6.0,
                "channels": {
                    "A": {"online": false, "ageMs": null},
                    "B": {"online": false, "ageMs": null},
                }
            }
        })
    );

    Ok(())
}

#[tokio::test]
async fn welcome_in_controllers_mode() -> Result<()> {
    let mut client = connect(fast_config(RoutingMode::Controllers), MockTransport::new()).await?;

    receive(&mut client).await?;
    receive(&mut client).await?;

    let a = receive(&mut client).await?;
    let b = receive(&mut client).await?;

    assert!(is_slot_status(&a, "A", false));
    assert!(is_slot_status(&b, "B", false));
    assert_eq!(
        a["encoders"]["channels"],
        json!({"A": {"online": false, "ageMs": null}})
    );

    Ok(())
}

#[tokio::test]
async fn machine_status_arrives() -> Result<()> {
    let mut client = connect(fast_config(RoutingMode::Channels), MockTransport::new()).await?;

    let status = receive_until(&mut client, |m| m["type"] == "machineStatus").await?;

    for field in ["hostname", "user", "platform", "arch", "ip", "ips"] {
        assert!(status.get(field).is_some(), "missing {field}");
    }

    Ok(())
}

#[tokio::test]
async fn subscriber_text_is_ignored() -> Result<()> {
    use futures::SinkExt;

    let mut client = connect(fast_config(RoutingMode::Channels), MockTransport::new()).await?;
    receive(&mut client).await?;

    client
        .send(tungstenite::Message::Text("hi".into()))
        .await?;

    // Still served.
    assert_eq!(receive(&mut client).await?["type"], "machineStatus");

    Ok(())
}

#[tokio::test]
async fn several_subscribers() -> Result<()> {
    let port = start(fast_config(RoutingMode::Channels), MockTransport::new()).await?;

    let mut first = connect_to(port).await?;
    let mut second = connect_to(port).await?;

    assert_eq!(receive(&mut first).await?["type"], "serverVersion");
    assert_eq!(receive(&mut second).await?["type"], "serverVersion");

    drop(first);

    receive_until(&mut second, is_status).await?;

    Ok(())
}

#[tokio::test]
async fn config_and_version_routes() -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let port = start(fast_config(RoutingMode::Channels), MockTransport::new()).await?;

    for (path, expected) in [("/config", "scan_interval_ms: 50"), ("/version", env!("CARGO_PKG_VERSION"))] {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes())
            .await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(expected), "{response}");
    }

    Ok(())
}
