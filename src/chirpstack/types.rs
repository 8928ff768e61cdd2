//! Records exchanged with the ChirpStack API
//!
//! The public types at the top are what callers see; the `Api*` structs
//! below them mirror the server's JSON representation (camelCase) and stay
//! inside this module.

use crate::registry::{DevEui, DeviceType, Node};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device as listed by the server
///
/// This is a cache entry: accurate as of the call that produced it, with no
/// freshness guarantee after that.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub dev_eui: DevEui,
    pub name: String,
    /// Derived from the server-side description field
    pub device_type: DeviceType,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    /// Convert into a registry node under the given application
    pub fn into_node(self, application_id: &str) -> Node {
        Node {
            dev_eui: self.dev_eui,
            name: self.name,
            device_type: self.device_type,
            application_id: Some(application_id.to_string()),
        }
    }
}

/// A device profile visible to the tenant
#[derive(Debug, Clone)]
pub struct DeviceProfileRecord {
    pub id: String,
    pub name: String,
}

/// Derived status of a single device
#[derive(Debug, Clone, Copy)]
pub struct DeviceStatus {
    /// Recency heuristic over `last_seen_at`, not an authoritative flag
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Outcome of a downlink enqueue request
///
/// `accepted` means the server took the payload into the device's queue;
/// it says nothing about delivery.
#[derive(Debug, Clone)]
pub struct DownlinkAck {
    pub accepted: bool,
    pub message: String,
}

/// Parameters for provisioning a new device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub dev_eui: DevEui,
    pub name: String,
    pub device_profile_id: String,
    pub application_id: String,
    /// Root network key, 32 hex digits
    pub nwk_key: String,
    pub device_type: DeviceType,
}

// --- wire format -----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiListDevicesResponse {
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub result: Vec<ApiDeviceListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiDeviceListItem {
    pub dev_eui: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiCreateDeviceRequest {
    pub device: ApiDevice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiDevice {
    pub dev_eui: String,
    pub name: String,
    pub description: String,
    pub application_id: String,
    pub device_profile_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiCreateDeviceKeysRequest {
    pub device_keys: ApiDeviceKeys,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiDeviceKeys {
    pub nwk_key: String,
    /// LoRaWAN 1.1 application key; unused on 1.0 devices but the server
    /// expects the field
    pub app_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiGetDeviceResponse {
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiListDeviceProfilesResponse {
    #[serde(default)]
    pub result: Vec<ApiDeviceProfileListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiDeviceProfileListItem {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiEnqueueRequest {
    pub queue_item: ApiQueueItem,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiQueueItem {
    pub confirmed: bool,
    /// Payload bytes, base64 encoded
    pub data: String,
    pub f_port: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiEnqueueResponse {
    #[serde(default)]
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_list_item_decodes_server_json() {
        let json = r#"{
            "totalCount": 1,
            "result": [{
                "devEui": "aabbccddeeff0011",
                "name": "gate-tracker",
                "description": "Tracker",
                "lastSeenAt": "2026-03-01T10:15:00Z",
                "deviceProfileId": "f23a...",
                "deviceProfileName": "default"
            }]
        }"#;

        let resp: ApiListDevicesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.total_count, 1);
        assert_eq!(resp.result[0].dev_eui, "aabbccddeeff0011");
        assert!(resp.result[0].last_seen_at.is_some());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{"result": [{"devEui": "aabbccddeeff0011", "name": "n"}]}"#;
        let resp: ApiListDevicesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.result[0].description, "");
        assert!(resp.result[0].last_seen_at.is_none());
    }

    #[test]
    fn test_enqueue_request_wire_shape() {
        let req = ApiEnqueueRequest {
            queue_item: ApiQueueItem {
                confirmed: true,
                data: "AQID".to_string(),
                f_port: 10,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["queueItem"]["fPort"], 10);
        assert_eq!(json["queueItem"]["data"], "AQID");
    }
}
