//! ChirpStack remote device client
//!
//! Thin facade over the network server's HTTP API gateway: device and
//! device-profile CRUD, status lookup, and downlink enqueue. Every request
//! carries the API token as a bearer credential. Failures surface as
//! [`RemoteError`] with the transport detail attached; nothing is retried
//! here, the caller decides.

pub mod types;

use crate::config::ChirpstackConfig;
use crate::registry::DevEui;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

pub use types::{DeviceProfileRecord, DeviceRecord, DeviceStatus, DownlinkAck, NewDevice};

use types::{
    ApiCreateDeviceKeysRequest, ApiCreateDeviceRequest, ApiDevice, ApiDeviceKeys,
    ApiEnqueueRequest, ApiEnqueueResponse, ApiGetDeviceResponse, ApiListDeviceProfilesResponse,
    ApiListDevicesResponse, ApiQueueItem,
};

/// Classified remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorCode {
    Unauthenticated,
    NotFound,
    InvalidArgument,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl std::fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteErrorCode::Unauthenticated => "unauthenticated",
            RemoteErrorCode::NotFound => "not found",
            RemoteErrorCode::InvalidArgument => "invalid argument",
            RemoteErrorCode::DeadlineExceeded => "deadline exceeded",
            RemoteErrorCode::Unavailable => "unavailable",
            RemoteErrorCode::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// A failed call against the network server
#[derive(Debug, Clone, thiserror::Error)]
#[error("remote call failed ({code}): {detail}")]
pub struct RemoteError {
    pub code: RemoteErrorCode,
    pub detail: String,
}

impl RemoteError {
    fn from_status(status: StatusCode, body: String) -> Self {
        let code = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteErrorCode::Unauthenticated,
            StatusCode::NOT_FOUND => RemoteErrorCode::NotFound,
            StatusCode::BAD_REQUEST => RemoteErrorCode::InvalidArgument,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                RemoteErrorCode::DeadlineExceeded
            }
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                RemoteErrorCode::Unavailable
            }
            _ => RemoteErrorCode::Internal,
        };
        let detail = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        RemoteError { code, detail }
    }

    fn from_transport(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            RemoteErrorCode::DeadlineExceeded
        } else {
            RemoteErrorCode::Unavailable
        };
        RemoteError {
            code,
            detail: err.to_string(),
        }
    }
}

/// Device provisioning outcome
///
/// Provisioning is two sequential calls (device, then its root key) and is
/// not atomic. [`ProvisionError::KeysRejected`] is the window where the
/// device exists on the server without keys; the caller can retry key
/// creation alone or delete the orphan.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("device creation rejected: {0}")]
    Rejected(RemoteError),
    #[error("device {dev_eui} was created but key provisioning failed: {source}")]
    KeysRejected {
        dev_eui: DevEui,
        #[source]
        source: RemoteError,
    },
}

/// How recently a device must have been seen to count as online
const ONLINE_WINDOW_MINUTES: i64 = 10;

/// A device is online if it was seen strictly less than
/// [`ONLINE_WINDOW_MINUTES`] ago; exactly at the boundary is offline.
fn is_recent(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(last_seen) < Duration::minutes(ONLINE_WINDOW_MINUTES)
}

/// Client for the ChirpStack HTTP API
pub struct ChirpstackClient {
    http: Client,
    config: ChirpstackConfig,
}

impl ChirpstackClient {
    /// Create a client; no connection is made until the first call
    pub fn new(config: &ChirpstackConfig) -> Self {
        let http = Client::new();
        info!("ChirpStack client configured for {}", config.api_url);
        Self {
            http,
            config: config.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        // The API gateway forwards this header as per-call metadata to the
        // server's authentication layer.
        self.http.request(method, url).header(
            "Grpc-Metadata-Authorization",
            format!("Bearer {}", self.config.api_token),
        )
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await.map_err(RemoteError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status, body));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let resp = self.send(req).await?;
        resp.json().await.map_err(|e| RemoteError {
            code: RemoteErrorCode::Internal,
            detail: format!("unreadable response body: {}", e),
        })
    }

    /// List the devices of an application
    ///
    /// Returns a single page capped at 100 devices; larger fleets are
    /// truncated rather than auto-paginated.
    pub async fn list_devices(
        &self,
        application_id: &str,
    ) -> Result<Vec<DeviceRecord>, RemoteError> {
        let req = self
            .request(Method::GET, "/api/devices")
            .query(&[("limit", "100"), ("applicationId", application_id)]);
        let resp: ApiListDevicesResponse = self.send_json(req).await?;

        if resp.total_count > resp.result.len() as u32 {
            warn!(
                "Server reports {} devices, only the first {} were fetched",
                resp.total_count,
                resp.result.len()
            );
        }

        let mut records = Vec::with_capacity(resp.result.len());
        for item in resp.result {
            let dev_eui: DevEui = item.dev_eui.parse().map_err(|_| RemoteError {
                code: RemoteErrorCode::Internal,
                detail: format!("server returned invalid device EUI '{}'", item.dev_eui),
            })?;
            records.push(DeviceRecord {
                dev_eui,
                name: item.name,
                device_type: item.description.as_str().into(),
                last_seen_at: item.last_seen_at,
            });
        }
        Ok(records)
    }

    /// Create a device on the server, without keys
    pub async fn create_device(&self, device: &NewDevice) -> Result<(), RemoteError> {
        let body = ApiCreateDeviceRequest {
            device: ApiDevice {
                dev_eui: device.dev_eui.to_string(),
                name: device.name.clone(),
                description: device.device_type.to_string(),
                application_id: device.application_id.clone(),
                device_profile_id: device.device_profile_id.clone(),
            },
        };
        let req = self.request(Method::POST, "/api/devices").json(&body);
        self.send(req).await?;
        debug!("Created device {}", device.dev_eui);
        Ok(())
    }

    /// Set the root network key of an existing device
    pub async fn create_device_keys(
        &self,
        dev_eui: &DevEui,
        nwk_key: &str,
    ) -> Result<(), RemoteError> {
        let body = ApiCreateDeviceKeysRequest {
            device_keys: ApiDeviceKeys {
                nwk_key: nwk_key.to_string(),
                app_key: String::new(),
            },
        };
        let path = format!("/api/devices/{}/keys", dev_eui);
        let req = self.request(Method::POST, &path).json(&body);
        self.send(req).await?;
        debug!("Created keys for device {}", dev_eui);
        Ok(())
    }

    /// Provision a device and its root key
    ///
    /// Two sequential calls; see [`ProvisionError`] for the partial-failure
    /// window.
    pub async fn provision_device(&self, device: &NewDevice) -> Result<(), ProvisionError> {
        self.create_device(device)
            .await
            .map_err(ProvisionError::Rejected)?;

        self.create_device_keys(&device.dev_eui, &device.nwk_key)
            .await
            .map_err(|source| ProvisionError::KeysRejected {
                dev_eui: device.dev_eui.clone(),
                source,
            })?;

        info!("Provisioned device {} ({})", device.dev_eui, device.name);
        Ok(())
    }

    /// Delete a device from the server
    ///
    /// Not idempotent: deleting an unknown device surfaces the server's
    /// not-found error.
    pub async fn delete_device(&self, dev_eui: &DevEui) -> Result<(), RemoteError> {
        let path = format!("/api/devices/{}", dev_eui);
        let req = self.request(Method::DELETE, &path);
        self.send(req).await?;
        debug!("Deleted device {}", dev_eui);
        Ok(())
    }

    /// List device profiles available to the tenant
    pub async fn list_device_profiles(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<DeviceProfileRecord>, RemoteError> {
        let req = self
            .request(Method::GET, "/api/device-profiles")
            .query(&[("limit", "100"), ("tenantId", tenant_id)]);
        let resp: ApiListDeviceProfilesResponse = self.send_json(req).await?;
        Ok(resp
            .result
            .into_iter()
            .map(|p| DeviceProfileRecord {
                id: p.id,
                name: p.name,
            })
            .collect())
    }

    /// Fetch a device's last-seen timestamp and derive its online state
    pub async fn device_status(&self, dev_eui: &DevEui) -> Result<DeviceStatus, RemoteError> {
        let path = format!("/api/devices/{}", dev_eui);
        let resp: ApiGetDeviceResponse = self.send_json(self.request(Method::GET, &path)).await?;

        let now = Utc::now();
        let is_online = resp
            .last_seen_at
            .map(|seen| is_recent(seen, now))
            .unwrap_or(false);

        Ok(DeviceStatus {
            is_online,
            last_seen_at: resp.last_seen_at,
        })
    }

    /// Enqueue a downlink payload for the device's next receive window
    ///
    /// Never fails to the caller: a rejected or unreachable enqueue comes
    /// back as `accepted = false` with the failure detail in `message`.
    /// Acceptance means the server queued the payload, nothing more; this
    /// call does not wait for any device acknowledgment.
    pub async fn enqueue_downlink(
        &self,
        dev_eui: &DevEui,
        payload: &[u8],
        confirmed: bool,
        f_port: u8,
    ) -> DownlinkAck {
        let body = ApiEnqueueRequest {
            queue_item: ApiQueueItem {
                confirmed,
                data: base64::engine::general_purpose::STANDARD.encode(payload),
                f_port,
            },
        };
        let path = format!("/api/devices/{}/queue", dev_eui);
        let req = self.request(Method::POST, &path).json(&body);

        let result: Result<ApiEnqueueResponse, RemoteError> = self.send_json(req).await;
        if let Err(e) = &result {
            warn!("Downlink enqueue for {} rejected: {}", dev_eui, e);
        }
        ack_from_result(result)
    }
}

fn ack_from_result(result: Result<ApiEnqueueResponse, RemoteError>) -> DownlinkAck {
    match result {
        Ok(resp) => DownlinkAck {
            accepted: true,
            message: format!("queued as item {}", resp.id),
        },
        Err(e) => DownlinkAck {
            accepted: false,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_classification() {
        let cases = [
            (StatusCode::UNAUTHORIZED, RemoteErrorCode::Unauthenticated),
            (StatusCode::FORBIDDEN, RemoteErrorCode::Unauthenticated),
            (StatusCode::NOT_FOUND, RemoteErrorCode::NotFound),
            (StatusCode::BAD_REQUEST, RemoteErrorCode::InvalidArgument),
            (StatusCode::GATEWAY_TIMEOUT, RemoteErrorCode::DeadlineExceeded),
            (StatusCode::SERVICE_UNAVAILABLE, RemoteErrorCode::Unavailable),
            (StatusCode::INTERNAL_SERVER_ERROR, RemoteErrorCode::Internal),
        ];
        for (status, expected) in cases {
            let err = RemoteError::from_status(status, String::new());
            assert_eq!(err.code, expected, "status {}", status);
        }
    }

    #[test]
    fn test_error_detail_keeps_body() {
        let err = RemoteError::from_status(
            StatusCode::BAD_REQUEST,
            "object already exists".to_string(),
        );
        assert!(err.detail.contains("object already exists"));
        assert!(err.to_string().contains("invalid argument"));
    }

    #[test]
    fn test_online_window_is_exclusive() {
        let now = Utc::now();

        let just_inside = now - Duration::minutes(ONLINE_WINDOW_MINUTES) + Duration::seconds(1);
        assert!(is_recent(just_inside, now));

        // Exactly at the threshold counts as offline
        let boundary = now - Duration::minutes(ONLINE_WINDOW_MINUTES);
        assert!(!is_recent(boundary, now));

        let outside = now - Duration::minutes(ONLINE_WINDOW_MINUTES) - Duration::seconds(1);
        assert!(!is_recent(outside, now));
    }

    #[test]
    fn test_future_last_seen_counts_as_online() {
        // Clock skew between server and client can put last-seen slightly
        // ahead of local now
        let now = Utc::now();
        assert!(is_recent(now + Duration::seconds(30), now));
    }

    #[test]
    fn test_rejected_enqueue_maps_to_unaccepted_ack() {
        let err = RemoteError {
            code: RemoteErrorCode::InvalidArgument,
            detail: "HTTP 400: device does not exist".to_string(),
        };
        let ack = ack_from_result(Err(err));
        assert!(!ack.accepted);
        assert!(ack.message.contains("device does not exist"));
    }

    #[tokio::test]
    async fn test_enqueue_against_unreachable_server_does_not_raise() {
        let config = ChirpstackConfig {
            // Discard port; nothing listens there
            api_url: "http://127.0.0.1:9".to_string(),
            api_token: "token".to_string(),
            application_id: "app".to_string(),
            tenant_id: None,
        };
        let client = ChirpstackClient::new(&config);
        let dev_eui: DevEui = "aabbccddeeff0011".parse().unwrap();

        let ack = client.enqueue_downlink(&dev_eui, &[0x01], false, 10).await;
        assert!(!ack.accepted);
        assert!(!ack.message.is_empty());
    }
}
