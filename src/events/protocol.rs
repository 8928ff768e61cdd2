//! Event bus topic and payload decoding
//!
//! The server publishes one topic per device event:
//!
//!   application/{applicationId}/device/{devEui}/event/{kind}
//!
//! with kinds up, join, status, ack, txack and log, and a JSON payload
//! that always carries a `deviceInfo` block naming the device. Everything
//! is decoded here, once, into the closed [`NodeEvent`] enum; downstream
//! code matches on it exhaustively instead of re-inspecting topic strings.

use serde::Deserialize;
use std::fmt;

/// The closed set of device event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Up,
    Join,
    Status,
    Ack,
    TxAck,
    Log,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Up,
        EventKind::Join,
        EventKind::Status,
        EventKind::Ack,
        EventKind::TxAck,
        EventKind::Log,
    ];

    /// The trailing topic segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Up => "up",
            EventKind::Join => "join",
            EventKind::Status => "status",
            EventKind::Ack => "ack",
            EventKind::TxAck => "txack",
            EventKind::Log => "log",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "up" => Some(EventKind::Up),
            "join" => Some(EventKind::Join),
            "status" => Some(EventKind::Status),
            "ack" => Some(EventKind::Ack),
            "txack" => Some(EventKind::TxAck),
            "log" => Some(EventKind::Log),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed event topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath {
    pub application_id: String,
    pub dev_eui: String,
    pub kind: EventKind,
}

/// Parse an event topic; `None` for anything that is not a device event
/// topic or carries an unknown kind
pub fn parse_topic(topic: &str) -> Option<TopicPath> {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        ["application", app_id, "device", dev_eui, "event", suffix] => {
            Some(TopicPath {
                application_id: app_id.to_string(),
                dev_eui: dev_eui.to_string(),
                kind: EventKind::from_suffix(suffix)?,
            })
        }
        _ => None,
    }
}

/// Event payload that could not be decoded; logged and dropped by the
/// router, never fatal to the subscriber loop
#[derive(Debug, thiserror::Error)]
#[error("malformed {kind} payload: {source}")]
pub struct MalformedPayload {
    pub kind: EventKind,
    #[source]
    source: serde_json::Error,
}

/// Identity block present in every event payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_name: String,
    pub dev_eui: String,
}

/// Per-gateway reception metadata on an uplink
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RxInfo {
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub snr: Option<f64>,
}

/// Uplink frame forwarded by the server
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplinkEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub f_port: Option<u8>,
    #[serde(default)]
    pub f_cnt: Option<u32>,
    /// Application payload, base64 encoded
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub rx_info: Vec<RxInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub dev_addr: Option<String>,
}

/// Battery and link margin report
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub margin: Option<i32>,
    #[serde(default)]
    pub external_power_source: Option<bool>,
    #[serde(default)]
    pub battery_level: Option<f64>,
}

/// Device acknowledgment of a confirmed downlink
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub acknowledged: Option<bool>,
    #[serde(default)]
    pub f_cnt_down: Option<u32>,
}

/// Gateway transmission acknowledgment for a downlink
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxAckEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub f_cnt_down: Option<u32>,
}

/// Server-side log line concerning a device
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A decoded device event
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Uplink(UplinkEvent),
    Join(JoinEvent),
    Status(StatusEvent),
    Ack(AckEvent),
    TxAck(TxAckEvent),
    Log(LogEvent),
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::Uplink(_) => EventKind::Up,
            NodeEvent::Join(_) => EventKind::Join,
            NodeEvent::Status(_) => EventKind::Status,
            NodeEvent::Ack(_) => EventKind::Ack,
            NodeEvent::TxAck(_) => EventKind::TxAck,
            NodeEvent::Log(_) => EventKind::Log,
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        match self {
            NodeEvent::Uplink(e) => &e.device_info,
            NodeEvent::Join(e) => &e.device_info,
            NodeEvent::Status(e) => &e.device_info,
            NodeEvent::Ack(e) => &e.device_info,
            NodeEvent::TxAck(e) => &e.device_info,
            NodeEvent::Log(e) => &e.device_info,
        }
    }
}

/// Decode a raw payload for the given event kind
pub fn decode_event(kind: EventKind, payload: &[u8]) -> Result<NodeEvent, MalformedPayload> {
    let wrap = |source| MalformedPayload { kind, source };
    let event = match kind {
        EventKind::Up => NodeEvent::Uplink(serde_json::from_slice(payload).map_err(wrap)?),
        EventKind::Join => NodeEvent::Join(serde_json::from_slice(payload).map_err(wrap)?),
        EventKind::Status => NodeEvent::Status(serde_json::from_slice(payload).map_err(wrap)?),
        EventKind::Ack => NodeEvent::Ack(serde_json::from_slice(payload).map_err(wrap)?),
        EventKind::TxAck => NodeEvent::TxAck(serde_json::from_slice(payload).map_err(wrap)?),
        EventKind::Log => NodeEvent::Log(serde_json::from_slice(payload).map_err(wrap)?),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_topic() {
        let path =
            parse_topic("application/1/device/aabbccddeeff0011/event/join").unwrap();
        assert_eq!(path.application_id, "1");
        assert_eq!(path.dev_eui, "aabbccddeeff0011");
        assert_eq!(path.kind, EventKind::Join);
    }

    #[test]
    fn test_parse_rejects_foreign_topics() {
        assert!(parse_topic("gateway/abcd/event/up").is_none());
        assert!(parse_topic("application/1/device/aabb/command/down").is_none());
        assert!(parse_topic("application/1/device/aabb/event").is_none());
    }

    #[test]
    fn test_unknown_kind_is_dropped() {
        assert!(parse_topic("application/1/device/aabb/event/gps").is_none());
    }

    #[test]
    fn test_decode_join_event() {
        let payload = br#"{
            "deviceInfo": {
                "deviceName": "gate-tracker",
                "devEui": "aabbccddeeff0011",
                "applicationId": "1"
            },
            "devAddr": "01020304"
        }"#;

        let event = decode_event(EventKind::Join, payload).unwrap();
        match event {
            NodeEvent::Join(join) => {
                assert_eq!(join.device_info.device_name, "gate-tracker");
                assert_eq!(join.dev_addr.as_deref(), Some("01020304"));
            }
            other => panic!("expected Join, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_decode_uplink_with_signal_metrics() {
        let payload = br#"{
            "deviceInfo": {"deviceName": "sensor", "devEui": "0000000000000001"},
            "fPort": 1,
            "fCnt": 66,
            "data": "AOE=",
            "rxInfo": [{"gatewayId": "aabbccddeeff0011", "rssi": -65, "snr": 7.5}]
        }"#;

        let event = decode_event(EventKind::Up, payload).unwrap();
        match event {
            NodeEvent::Uplink(up) => {
                assert_eq!(up.f_port, Some(1));
                assert_eq!(up.f_cnt, Some(66));
                assert_eq!(up.rx_info[0].rssi, Some(-65));
            }
            other => panic!("expected Uplink, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_event(EventKind::Up, b"not json").is_err());
        // deviceInfo is mandatory
        assert!(decode_event(EventKind::Status, b"{\"margin\": 10}").is_err());
    }

    #[test]
    fn test_event_kind_round_trip() {
        for kind in EventKind::ALL {
            let topic = format!("application/1/device/aabb/event/{}", kind);
            assert_eq!(parse_topic(&topic).unwrap().kind, kind);
        }
    }
}
