//! Event router
//!
//! Single long-lived subscription to the server's MQTT event topics.
//! Inbound messages are decoded into [`NodeEvent`]s and handed to the
//! consuming task over an mpsc channel; the consumer dispatches them from
//! its own loop (see [`dispatch`]). The registry and any UI state stay
//! owned by that task, never touched from the subscriber.
//!
//! A malformed payload is logged and dropped; the loop continues. A
//! transport drop ends [`EventRouter::run`] with an error — reconnection
//! is the caller's decision, not made here.

pub mod protocol;

use crate::config::MqttConfig;
use anyhow::Context;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use protocol::{
    AckEvent, DeviceInfo, EventKind, JoinEvent, LogEvent, MalformedPayload, NodeEvent,
    StatusEvent, TxAckEvent, UplinkEvent,
};

/// The wildcard filter for one event kind: any application, any device
pub fn subscription_filter(kind: EventKind) -> String {
    format!("application/+/device/+/event/{}", kind.as_str())
}

/// Subscriber for device events
pub struct EventRouter {
    config: MqttConfig,
}

impl EventRouter {
    /// Create a router (does not connect yet)
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Connect, subscribe and pump events into `tx` until the transport
    /// drops or the receiver goes away
    pub async fn run(self, tx: mpsc::Sender<NodeEvent>) -> anyhow::Result<()> {
        let client_id = format!("lora-fleet-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        for kind in EventKind::ALL {
            client
                .subscribe(subscription_filter(kind), QoS::AtMostOnce)
                .await
                .context("failed to queue event subscription")?;
        }

        info!(
            "Subscribing to device events on {}:{}",
            self.config.host, self.config.port
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to event bus");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if !handle_publish(&publish.topic, &publish.payload, &tx).await {
                        // Receiver dropped; nobody is listening anymore
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(e).context("event bus connection lost");
                }
            }
        }
    }
}

/// Decode one message and forward it; returns false once the receiver is
/// gone
async fn handle_publish(topic: &str, payload: &[u8], tx: &mpsc::Sender<NodeEvent>) -> bool {
    let Some(path) = protocol::parse_topic(topic) else {
        debug!("Ignoring message on unrecognized topic {}", topic);
        return true;
    };

    match protocol::decode_event(path.kind, payload) {
        Ok(event) => {
            debug!(
                "Forwarding {} event from {}",
                event.kind(),
                event.device_info().dev_eui
            );
            tx.send(event).await.is_ok()
        }
        Err(e) => {
            warn!(
                "Dropping event from {} (application {}): {}",
                path.dev_eui, path.application_id, e
            );
            true
        }
    }
}

/// Per-kind event callbacks
///
/// All methods default to no-ops so consumers implement only what they
/// render. Implementations run on the consuming task's loop and should
/// stay short.
pub trait EventHandler {
    fn on_uplink(&mut self, _event: UplinkEvent) {}
    fn on_join(&mut self, _event: JoinEvent) {}
    fn on_status(&mut self, _event: StatusEvent) {}
    fn on_ack(&mut self, _event: AckEvent) {}
    fn on_tx_ack(&mut self, _event: TxAckEvent) {}
    fn on_log(&mut self, _event: LogEvent) {}
}

/// Route a decoded event to the matching handler method
pub fn dispatch<H: EventHandler>(handler: &mut H, event: NodeEvent) {
    match event {
        NodeEvent::Uplink(e) => handler.on_uplink(e),
        NodeEvent::Join(e) => handler.on_join(e),
        NodeEvent::Status(e) => handler.on_status(e),
        NodeEvent::Ack(e) => handler.on_ack(e),
        NodeEvent::TxAck(e) => handler.on_tx_ack(e),
        NodeEvent::Log(e) => handler.on_log(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingHandler {
        uplinks: usize,
        joins: usize,
        statuses: usize,
        acks: usize,
        tx_acks: usize,
        logs: usize,
    }

    impl EventHandler for CountingHandler {
        fn on_uplink(&mut self, _event: UplinkEvent) {
            self.uplinks += 1;
        }
        fn on_join(&mut self, _event: JoinEvent) {
            self.joins += 1;
        }
        fn on_status(&mut self, _event: StatusEvent) {
            self.statuses += 1;
        }
        fn on_ack(&mut self, _event: AckEvent) {
            self.acks += 1;
        }
        fn on_tx_ack(&mut self, _event: TxAckEvent) {
            self.tx_acks += 1;
        }
        fn on_log(&mut self, _event: LogEvent) {
            self.logs += 1;
        }
    }

    #[test]
    fn test_join_dispatches_only_to_join_handler() {
        let payload = br#"{
            "deviceInfo": {"deviceName": "t", "devEui": "aabbccddeeff0011"}
        }"#;
        let event = protocol::decode_event(EventKind::Join, payload).unwrap();

        let mut handler = CountingHandler::default();
        dispatch(&mut handler, event);

        assert_eq!(handler.joins, 1);
        assert_eq!(
            handler.uplinks + handler.statuses + handler.acks + handler.tx_acks + handler.logs,
            0
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_invokes_no_handler_and_keeps_loop() {
        let (tx, mut rx) = mpsc::channel(4);

        let keep_going = handle_publish(
            "application/1/device/aabbccddeeff0011/event/join",
            b"{truncated",
            &tx,
        )
        .await;

        assert!(keep_going);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_well_formed_event_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);

        let keep_going = handle_publish(
            "application/1/device/aabbccddeeff0011/event/join",
            br#"{"deviceInfo": {"deviceName": "t", "devEui": "aabbccddeeff0011"}}"#,
            &tx,
        )
        .await;

        assert!(keep_going);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::Join);
    }

    #[test]
    fn test_subscription_filters_cover_all_kinds() {
        let filters: Vec<String> = EventKind::ALL.iter().copied().map(subscription_filter).collect();
        assert_eq!(filters.len(), 6);
        assert!(filters.contains(&"application/+/device/+/event/txack".to_string()));
    }
}
