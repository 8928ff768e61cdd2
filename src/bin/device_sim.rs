//! Device Event Simulator
//!
//! Publishes synthetic ChirpStack device events to the MQTT broker so the
//! fleet monitor can be exercised without hardware or a network server.
//!
//! Usage: cargo run --bin device-sim [broker_host] [broker_port]

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::env;
use tokio::time::{sleep, Duration};

const APPLICATION_ID: &str = "1";

/// Fake fleet
const TRACKER_EUI: &str = "aabbccddeeff0011";
const SENSOR_EUI: &str = "0000000000000001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = match env::args().nth(2) {
        Some(p) => p.parse()?,
        None => 1883,
    };

    println!("📡 LoRa Fleet Device Simulator");
    println!("  Broker: {}:{}", host, port);
    println!();

    let client_id = format!("device-sim-{}", uuid::Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, host.clone(), port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 16);

    // Drive the connection in the background
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("❌ Broker connection error: {}", e);
                sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let scenarios = vec![
        (
            "Join (gate tracker comes up)",
            topic("join", TRACKER_EUI),
            join_event(TRACKER_EUI, "gate-tracker", "01ab5678"),
        ),
        (
            "Uplink (temperature 22.5°C)",
            topic("up", SENSOR_EUI),
            uplink_event(SENSOR_EUI, "temp-sensor", 66, 1, &[0x00, 0xE1], -65, 7.5),
        ),
        (
            "Status (healthy battery)",
            topic("status", TRACKER_EUI),
            status_event(TRACKER_EUI, "gate-tracker", 12, 87.0),
        ),
        (
            "Uplink (door open)",
            topic("up", TRACKER_EUI),
            uplink_event(TRACKER_EUI, "gate-tracker", 7, 2, &[0x01], -112, -5.0),
        ),
        (
            "Ack (confirmed downlink delivered)",
            topic("ack", TRACKER_EUI),
            ack_event(TRACKER_EUI, "gate-tracker", true, 3),
        ),
        (
            "Txack (gateway transmitted downlink)",
            topic("txack", SENSOR_EUI),
            txack_event(SENSOR_EUI, "temp-sensor", 9),
        ),
        (
            "Status (low battery, should alert)",
            topic("status", SENSOR_EUI),
            status_event(SENSOR_EUI, "temp-sensor", 4, 12.0),
        ),
        (
            "Log (server-side error for the device)",
            topic("log", SENSOR_EUI),
            log_event(SENSOR_EUI, "temp-sensor", "ERROR", "UPLINK_CODEC", "codec failed"),
        ),
    ];

    for (desc, topic, payload) in &scenarios {
        println!("🚀 Publishing: {}", desc);
        println!("   {}", topic);

        client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload.to_string())
            .await?;

        sleep(Duration::from_secs(2)).await;
    }

    println!();
    println!("✨ Simulation complete!");
    Ok(())
}

fn topic(kind: &str, dev_eui: &str) -> String {
    format!(
        "application/{}/device/{}/event/{}",
        APPLICATION_ID, dev_eui, kind
    )
}

fn device_info(dev_eui: &str, name: &str) -> serde_json::Value {
    json!({
        "deviceName": name,
        "devEui": dev_eui,
        "applicationId": APPLICATION_ID,
        "applicationName": "fleet"
    })
}

fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn join_event(dev_eui: &str, name: &str, dev_addr: &str) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "devAddr": dev_addr
    })
}

fn uplink_event(
    dev_eui: &str,
    name: &str,
    f_cnt: u32,
    f_port: u8,
    payload: &[u8],
    rssi: i32,
    snr: f64,
) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "fCnt": f_cnt,
        "fPort": f_port,
        "data": b64(payload),
        "rxInfo": [{"gatewayId": "aa555a0000000000", "rssi": rssi, "snr": snr}]
    })
}

fn status_event(dev_eui: &str, name: &str, margin: i32, battery_level: f64) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "margin": margin,
        "externalPowerSource": false,
        "batteryLevel": battery_level
    })
}

fn ack_event(dev_eui: &str, name: &str, acknowledged: bool, f_cnt_down: u32) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "acknowledged": acknowledged,
        "fCntDown": f_cnt_down
    })
}

fn txack_event(dev_eui: &str, name: &str, f_cnt_down: u32) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "fCntDown": f_cnt_down
    })
}

fn log_event(
    dev_eui: &str,
    name: &str,
    level: &str,
    code: &str,
    description: &str,
) -> serde_json::Value {
    json!({
        "deviceInfo": device_info(dev_eui, name),
        "level": level,
        "code": code,
        "description": description
    })
}
