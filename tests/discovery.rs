use std::time::Duration;

use color_eyre::Result;
use controller_bridge::{
    mock::{MockDevice, MockTransport},
    router::{RoutingMode, SlotId},
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::time::Instant;

mod common;
use common::*;

async fn connected_status(client: &mut Client) -> Result<Value> {
    receive_until(client, |m| is_status(m) && m["connected"] == true).await
}

/// Collect everything for a while.
async fn collect_for(client: &mut Client, duration: Duration) -> Vec<Value> {
    let deadline = Instant::now() + duration;
    let mut messages = vec![];

    while let Ok(Ok(message)) = tokio::time::timeout_at(deadline, receive(client)).await {
        messages.push(message);
    }

    messages
}

#[tokio::test]
async fn scenario_a_mapped_and_unmapped_controllers() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-a", "2.15.1");
    transport.add_controller("/dev/ttyACM1", TARGET, "ctl-b", "2.15.1");

    let mut config = fast_config(RoutingMode::Controllers);
    config
        .engines
        .slot_table
        .insert("ctl-a".into(), SlotId::new("A"));

    let mut client = connect(config, transport.clone()).await?;

    let a = receive_until(&mut client, |m| is_slot_status(m, "A", true)).await?;
    assert_eq!(a["deviceId"], "ctl-a");
    assert_eq!(a["port"], "/dev/ttyACM0");
    assert_eq!(a["fw"], "2.15.1");

    let b = receive_until(&mut client, |m| is_slot_status(m, "B", true)).await?;
    assert_eq!(b["deviceId"], "ctl-b");

    transport.unplug("/dev/ttyACM0");

    let a = receive_until(&mut client, |m| is_slot_status(m, "A", false)).await?;
    assert!(a.get("deviceId").is_none());
    assert_eq!(a["encoders"]["channels"]["A"]["ageMs"], Value::Null);

    // A replacement shows up on another port and takes its slot back.
    transport.add_controller("/dev/ttyACM2", TARGET, "ctl-a", "2.16.0");

    let a = receive_until(&mut client, |m| is_slot_status(m, "A", true)).await?;
    assert_eq!(a["deviceId"], "ctl-a");
    assert_eq!(a["port"], "/dev/ttyACM2");
    assert_eq!(a["fw"], "2.16.0");

    Ok(())
}

#[tokio::test]
async fn mapped_controller_enumerated_last_gets_its_slot() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-b", "2.15.1");
    transport.add_controller("/dev/ttyACM1", TARGET, "ctl-a", "2.15.1");

    let mut config = fast_config(RoutingMode::Controllers);
    config
        .engines
        .slot_table
        .insert("ctl-a".into(), SlotId::new("A"));

    let mut client = connect(config, transport.clone()).await?;

    let a = receive_until(&mut client, |m| is_slot_status(m, "A", true)).await?;
    assert_eq!(a["deviceId"], "ctl-a");
    assert_eq!(a["port"], "/dev/ttyACM1");

    let b = receive_until(&mut client, |m| is_slot_status(m, "B", true)).await?;
    assert_eq!(b["deviceId"], "ctl-b");
    assert_eq!(b["port"], "/dev/ttyACM0");

    Ok(())
}

#[tokio::test]
async fn scenario_b_string_value_is_coerced_and_routed() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-a", "1.0");

    let mut config = fast_config(RoutingMode::Controllers);
    config
        .engines
        .slot_table
        .insert("ctl-a".into(), SlotId::new("A"));

    let mut client = connect(config, transport.clone()).await?;
    receive_until(&mut client, |m| is_slot_status(m, "A", true)).await?;

    assert!(transport.send_line("/dev/ttyACM0", "debug: knob turned"));
    assert!(transport.send_line(
        "/dev/ttyACM0",
        r#"{"type":"set","key":"volume","value":"7"}"#
    ));

    let set = receive_until(&mut client, |m| m["type"] == "set").await?;
    assert_eq!(
        set,
        json!({"type": "set", "channel": "A", "key": "volume", "value": 7, "engine": "A"})
    );

    Ok(())
}

#[tokio::test]
async fn channels_mode_routes_by_channel_in_order() -> Result<()> {
    let transport = MockTransport::new();
    transport.add(
        "/dev/ttyACM0",
        MockDevice::controller(TARGET, "ctl-1", "1.0").with_preamble("booting"),
    );

    let mut client = connect(fast_config(RoutingMode::Channels), transport.clone()).await?;
    let status = connected_status(&mut client).await?;
    assert_eq!(status["deviceId"], "ctl-1");

    for (channel, value) in [("A", 1), ("b", 2), ("C", 3), ("A", 4)] {
        let line = format!(r#"{{"type":"set","channel":"{channel}","key":"tone","value":{value}}}"#);
        assert!(transport.send_line("/dev/ttyACM0", &line));
    }

    let mut seen = vec![];
    while seen.len() < 3 {
        let set = receive_until(&mut client, |m| m["type"] == "set").await?;
        seen.push((set["engine"].clone(), set["value"].clone()));
    }

    // Channel C is not active and was dropped.
    assert_eq!(
        seen,
        vec![
            (json!("A"), json!(1)),
            (json!("B"), json!(2)),
            (json!("A"), json!(4)),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn scenario_c_silent_channel_goes_offline() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-1", "1.0");

    let mut config = fast_config(RoutingMode::Channels);
    config.liveness.offline_timeout = Duration::from_millis(300);

    let mut client = connect(config, transport.clone()).await?;
    connected_status(&mut client).await?;

    let rate = |channel: &str| format!(r#"{{"type":"set","channel":"{channel}","key":"rate","value":1.0}}"#);

    assert!(transport.send_line("/dev/ttyACM0", &rate("A")));
    assert!(transport.send_line("/dev/ttyACM0", &rate("B")));

    receive_until(&mut client, |m| {
        is_status(m) && m["encoders"]["channels"]["B"]["online"] == true
    })
    .await?;

    // Keep A alive, let B fall silent.
    let keep_alive = {
        let transport = transport.clone();
        tokio::spawn(async move {
            loop {
                transport.send_line("/dev/ttyACM0", &rate("A"));
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let status = receive_until(&mut client, |m| {
        is_status(m) && m["encoders"]["channels"]["B"]["online"] == false
    })
    .await?;
    keep_alive.abort();

    assert_eq!(status["connected"], true);
    assert_eq!(status["encoders"]["timeoutSec"], 0.3);
    assert_eq!(status["encoders"]["channels"]["A"]["online"], true);
    assert!(status["encoders"]["channels"]["B"]["ageMs"].as_u64().unwrap() >= 300);

    Ok(())
}

#[tokio::test]
async fn restart_resets_liveness() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-1", "1.0");

    let mut client = connect(fast_config(RoutingMode::Channels), transport.clone()).await?;
    connected_status(&mut client).await?;

    assert!(transport.send_line(
        "/dev/ttyACM0",
        r#"{"type":"set","channel":"A","key":"rate","value":1.0}"#
    ));
    receive_until(&mut client, |m| {
        is_status(m) && m["encoders"]["channels"]["A"]["online"] == true
    })
    .await?;

    transport.unplug("/dev/ttyACM0");
    let status = receive_until(&mut client, |m| is_status(m) && m["connected"] == false).await?;
    assert_eq!(
        status["encoders"]["channels"]["A"],
        json!({"online": false, "ageMs": null})
    );

    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-1", "1.0");
    let status = connected_status(&mut client).await?;
    assert_eq!(
        status["encoders"]["channels"]["A"],
        json!({"online": false, "ageMs": null})
    );

    Ok(())
}

#[tokio::test]
async fn wrong_device_type_is_never_attached() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/ttyUSB0", "gps", "gps-1", "1.0");

    let mut client = connect(fast_config(RoutingMode::Controllers), transport.clone()).await?;

    let messages = collect_for(&mut client, Duration::from_millis(700)).await;

    assert!(messages.iter().filter(|m| is_status(m)).all(|m| m["connected"] == false));
    assert!(messages.iter().all(|m| m["type"] != "set"));

    // Re-probed on every scan, never kept open.
    assert!(transport.opens("/dev/ttyUSB0") > 1);

    Ok(())
}

#[tokio::test]
async fn late_answer_is_picked_up_by_a_later_probe() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_silent("/dev/ttyACM0");

    let mut client = connect(fast_config(RoutingMode::Channels), transport.clone()).await?;

    let messages = collect_for(&mut client, Duration::from_millis(500)).await;
    assert!(messages.iter().filter(|m| is_status(m)).all(|m| m["connected"] == false));

    transport.add_controller("/dev/ttyACM0", TARGET, "ctl-1", "1.0");

    let status = connected_status(&mut client).await?;
    assert_eq!(status["port"], "/dev/ttyACM0");

    Ok(())
}

#[tokio::test]
async fn duplicate_device_id_is_attached_once() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/cu.usbmodem1101", TARGET, "ctl-1", "1.0");
    transport.add_controller("/dev/tty.usbmodem1101", TARGET, "ctl-1", "1.0");

    let mut client = connect(fast_config(RoutingMode::Controllers), transport.clone()).await?;

    let a = receive_until(&mut client, |m| is_slot_status(m, "A", true)).await?;
    assert_eq!(a["port"], "/dev/cu.usbmodem1101");

    let messages = collect_for(&mut client, Duration::from_millis(1200)).await;

    let b_statuses = messages
        .iter()
        .filter(|m| is_status(m) && m["engine"] == "B")
        .collect::<Vec<_>>();
    assert!(!b_statuses.is_empty());
    assert!(b_statuses.iter().all(|m| m["connected"] == false));

    Ok(())
}

#[tokio::test]
async fn excluded_ports_are_not_probed() -> Result<()> {
    let transport = MockTransport::new();
    transport.add_controller("/dev/cu.debug-console", TARGET, "ctl-1", "1.0");

    let mut client = connect(fast_config(RoutingMode::Channels), transport.clone()).await?;
    collect_for(&mut client, Duration::from_millis(300)).await;

    assert_eq!(transport.opens("/dev/cu.debug-console"), 0);

    Ok(())
}
