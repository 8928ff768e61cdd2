mod chirpstack;
mod config;
mod events;
mod registry;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chirpstack::{ChirpstackClient, NewDevice, ProvisionError};
use config::Config;
use events::{
    AckEvent, DeviceInfo, EventHandler, EventRouter, JoinEvent, LogEvent, NodeEvent, StatusEvent,
    TxAckEvent, UplinkEvent,
};
use registry::{DevEui, DeviceType, Node, NodeRegistry};

#[derive(Parser)]
#[command(name = "lora-fleet")]
#[command(about = "Fleet operations console for LoRaWAN end-nodes on ChirpStack")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rebuild the local registry from the server's device list
    Sync,
    /// List registered nodes
    List,
    /// Provision a device on the server and add it to the registry
    Register {
        /// Device EUI (16 hex digits)
        dev_eui: String,
        /// Display name
        name: String,
        /// Device profile to assign
        #[arg(long)]
        profile_id: String,
        /// Device classification, free text
        #[arg(long, default_value = "Blank Unit")]
        device_type: String,
        /// Root network key (32 hex digits); generated when omitted
        #[arg(long)]
        nwk_key: Option<String>,
    },
    /// Delete a device from the server and the registry
    Remove {
        dev_eui: String,
    },
    /// Show a node's last-seen time and online state
    Status {
        dev_eui: String,
    },
    /// List device profiles available to the tenant
    Profiles,
    /// Enqueue a downlink payload
    Downlink {
        dev_eui: String,
        /// Payload bytes as hex
        payload: String,
        /// Request a device acknowledgment
        #[arg(long)]
        confirmed: bool,
        #[arg(long, default_value_t = 10)]
        port: u8,
    },
    /// Subscribe to the event bus and print device events
    Monitor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let mut registry = match config.registry.store_path.clone() {
        Some(path) => NodeRegistry::with_store(path)?,
        None => NodeRegistry::new(),
    };
    let client = ChirpstackClient::new(&config.chirpstack);

    match cli.command {
        Command::Sync => cmd_sync(&config, &client, &mut registry).await,
        Command::List => cmd_list(&registry),
        Command::Register {
            dev_eui,
            name,
            profile_id,
            device_type,
            nwk_key,
        } => {
            cmd_register(
                &config,
                &client,
                &mut registry,
                &dev_eui,
                &name,
                &profile_id,
                &device_type,
                nwk_key,
            )
            .await
        }
        Command::Remove { dev_eui } => cmd_remove(&client, &mut registry, &dev_eui).await,
        Command::Status { dev_eui } => cmd_status(&client, &registry, &dev_eui).await,
        Command::Profiles => cmd_profiles(&config, &client).await,
        Command::Downlink {
            dev_eui,
            payload,
            confirmed,
            port,
        } => cmd_downlink(&client, &registry, &dev_eui, &payload, confirmed, port).await,
        Command::Monitor => cmd_monitor(&config, &registry).await,
    }
}

async fn cmd_sync(
    config: &Config,
    client: &ChirpstackClient,
    registry: &mut NodeRegistry,
) -> anyhow::Result<()> {
    let app_id = &config.chirpstack.application_id;
    let records = client.list_devices(app_id).await?;
    let seen = records.iter().filter(|r| r.last_seen_at.is_some()).count();

    registry.resync(records.into_iter().map(|r| r.into_node(app_id)))?;
    println!(
        "Synchronized {} device(s) from the server ({} seen at least once)",
        registry.len(),
        seen
    );
    Ok(())
}

fn cmd_list(registry: &NodeRegistry) -> anyhow::Result<()> {
    if registry.is_empty() {
        println!("No nodes registered. Run `lora-fleet sync` or `lora-fleet register`.");
        return Ok(());
    }
    for node in registry.list() {
        println!("{}  [{}]", node, node.device_type);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_register(
    config: &Config,
    client: &ChirpstackClient,
    registry: &mut NodeRegistry,
    dev_eui: &str,
    name: &str,
    profile_id: &str,
    device_type: &str,
    nwk_key: Option<String>,
) -> anyhow::Result<()> {
    let dev_eui: DevEui = dev_eui.parse()?;
    let nwk_key = match nwk_key {
        Some(key) => {
            if key.len() != 32 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("root key must be 32 hex digits");
            }
            key.to_ascii_lowercase()
        }
        None => {
            let key: [u8; 16] = rand::random();
            let key = hex::encode(key);
            println!("Generated root key: {}", key);
            key
        }
    };

    let device = NewDevice {
        dev_eui: dev_eui.clone(),
        name: name.to_string(),
        device_profile_id: profile_id.to_string(),
        application_id: config.chirpstack.application_id.clone(),
        nwk_key,
        device_type: DeviceType::from(device_type),
    };

    match client.provision_device(&device).await {
        Ok(()) => {}
        Err(e @ ProvisionError::KeysRejected { .. }) => {
            // The device now exists on the server without keys; tell the
            // operator rather than pretending the whole thing failed
            eprintln!(
                "Device {} was created but has no root key. \
                 Remove it with `lora-fleet remove {}` or retry.",
                dev_eui, dev_eui
            );
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    }

    let mut node = Node::new(dev_eui, name);
    node.device_type = device.device_type.clone();
    node.application_id = Some(device.application_id.clone());
    let display = node.to_string();
    registry.add(node)?;

    println!("Registered {}", display);
    Ok(())
}

async fn cmd_remove(
    client: &ChirpstackClient,
    registry: &mut NodeRegistry,
    dev_eui: &str,
) -> anyhow::Result<()> {
    let dev_eui: DevEui = dev_eui.parse()?;

    client.delete_device(&dev_eui).await?;
    let removed = registry.remove(&dev_eui)?;

    if removed {
        println!("Removed {}", dev_eui);
    } else {
        println!("Removed {} from the server (it was not in the local registry)", dev_eui);
    }
    Ok(())
}

async fn cmd_status(
    client: &ChirpstackClient,
    registry: &NodeRegistry,
    dev_eui: &str,
) -> anyhow::Result<()> {
    let dev_eui: DevEui = dev_eui.parse()?;
    let node = registry.get(&dev_eui)?;

    let status = client.device_status(&dev_eui).await?;
    println!(
        "{}: {}",
        node,
        if status.is_online { "online" } else { "offline" }
    );
    match status.last_seen_at {
        Some(seen) => println!("  last seen: {}", seen.to_rfc3339()),
        None => println!("  last seen: never"),
    }
    Ok(())
}

async fn cmd_profiles(config: &Config, client: &ChirpstackClient) -> anyhow::Result<()> {
    let tenant_id = config
        .chirpstack
        .tenant_id
        .as_deref()
        .context("tenant_id is not configured")?;

    let profiles = client.list_device_profiles(tenant_id).await?;
    if profiles.is_empty() {
        println!("No device profiles visible to this tenant");
        return Ok(());
    }
    for profile in profiles {
        println!("{}  {}", profile.id, profile.name);
    }
    Ok(())
}

async fn cmd_downlink(
    client: &ChirpstackClient,
    registry: &NodeRegistry,
    dev_eui: &str,
    payload: &str,
    confirmed: bool,
    port: u8,
) -> anyhow::Result<()> {
    let dev_eui: DevEui = dev_eui.parse()?;
    let node = registry.get(&dev_eui)?;
    let payload = hex::decode(payload).context("payload must be hex encoded")?;

    let ack = client
        .enqueue_downlink(&dev_eui, &payload, confirmed, port)
        .await;

    if ack.accepted {
        println!("Downlink queued for {}: {}", node.name, ack.message);
    } else {
        println!("Downlink rejected for {}: {}", node.name, ack.message);
    }
    Ok(())
}

async fn cmd_monitor(config: &Config, registry: &NodeRegistry) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NodeEvent>(256);

    let router = EventRouter::new(&config.mqtt);
    let router_task = tokio::spawn(router.run(tx));

    let mut handler = MonitorHandler::new(registry);
    println!("Monitoring device events. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            maybe_event = rx.recv() => match maybe_event {
                // Events cross from the subscriber task to this one here;
                // all registry reads and printing happen on this task
                Some(event) => events::dispatch(&mut handler, event),
                // Sender gone: the router stopped
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                handler.print_summary();
                return Ok(());
            }
        }
    }

    handler.print_summary();
    router_task.await.context("event router task failed")??;
    Ok(())
}

/// Renders incoming events and tracks per-device activity
struct MonitorHandler<'a> {
    registry: &'a NodeRegistry,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl<'a> MonitorHandler<'a> {
    fn new(registry: &'a NodeRegistry) -> Self {
        Self {
            registry,
            last_seen: HashMap::new(),
        }
    }

    /// Prefer the registry's name for the device; flag devices we do not
    /// know about
    fn display_name(&self, info: &DeviceInfo) -> String {
        let known = info
            .dev_eui
            .parse::<DevEui>()
            .ok()
            .and_then(|eui| self.registry.lookup(&eui));
        match known {
            Some(node) => node.name.clone(),
            None => format!("{} (unregistered)", info.device_name),
        }
    }

    fn mark_seen(&mut self, info: &DeviceInfo) {
        self.last_seen.insert(info.dev_eui.clone(), Utc::now());
    }

    fn print_summary(&self) {
        if self.last_seen.is_empty() {
            return;
        }
        println!();
        println!("Devices heard this session:");
        for (dev_eui, at) in &self.last_seen {
            println!("  {}  last event {}", dev_eui, at.to_rfc3339());
        }
    }
}

impl EventHandler for MonitorHandler<'_> {
    fn on_uplink(&mut self, event: UplinkEvent) {
        self.mark_seen(&event.device_info);

        let payload = match event.data.as_deref() {
            Some(data) => decode_payload(data),
            None => "-".to_string(),
        };
        let rssi = event
            .rx_info
            .first()
            .and_then(|rx| rx.rssi)
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        let snr = event
            .rx_info
            .first()
            .and_then(|rx| rx.snr)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "[up]     {} fcnt={} port={} payload={} rssi={} snr={}",
            self.display_name(&event.device_info),
            event.f_cnt.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            event.f_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            payload,
            rssi,
            snr,
        );
    }

    fn on_join(&mut self, event: JoinEvent) {
        self.mark_seen(&event.device_info);
        println!(
            "[join]   {} joined (DevAddr: {})",
            self.display_name(&event.device_info),
            event.dev_addr.as_deref().unwrap_or("-"),
        );
    }

    fn on_status(&mut self, event: StatusEvent) {
        self.mark_seen(&event.device_info);

        let name = self.display_name(&event.device_info);
        let battery = match (event.external_power_source, event.battery_level) {
            (Some(true), _) => "external power".to_string(),
            (_, Some(level)) => format!("battery {:.0}%", level),
            _ => "battery unknown".to_string(),
        };
        println!(
            "[status] {} margin={} {}",
            name,
            event.margin.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string()),
            battery,
        );

        if let Some(level) = event.battery_level {
            if event.external_power_source != Some(true) && level < 20.0 {
                println!("[alert]  {} battery low ({:.0}%)", name, level);
            }
        }
    }

    fn on_ack(&mut self, event: AckEvent) {
        let outcome = match event.acknowledged {
            Some(true) => "acknowledged",
            Some(false) => "NOT acknowledged",
            None => "ack state unknown",
        };
        println!(
            "[ack]    {} downlink {} (fCntDown: {})",
            self.display_name(&event.device_info),
            outcome,
            event
                .f_cnt_down
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    fn on_tx_ack(&mut self, event: TxAckEvent) {
        println!(
            "[txack]  {} downlink transmitted by gateway (fCntDown: {})",
            self.display_name(&event.device_info),
            event
                .f_cnt_down
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    fn on_log(&mut self, event: LogEvent) {
        println!(
            "[alert]  {} {} {}: {}",
            self.display_name(&event.device_info),
            event.level.as_deref().unwrap_or("LOG"),
            event.code.as_deref().unwrap_or("-"),
            event.description.as_deref().unwrap_or("(no description)"),
        );
    }
}

/// Render a base64 uplink payload as hex, or pass it through when it does
/// not decode
fn decode_payload(data: &str) -> String {
    use base64::Engine;
    match base64::engine::general_purpose::STANDARD.decode(data) {
        Ok(bytes) => hex::encode(bytes),
        Err(_) => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payload_base64_to_hex() {
        assert_eq!(decode_payload("AQID"), "010203");
        assert_eq!(decode_payload("!!!"), "!!!");
    }

    #[test]
    fn test_monitor_prefers_registry_names() {
        let mut registry = NodeRegistry::new();
        registry
            .add(Node::new("aabbccddeeff0011".parse().unwrap(), "gate"))
            .unwrap();
        let handler = MonitorHandler::new(&registry);

        let known = DeviceInfo {
            device_name: "server-side-name".to_string(),
            dev_eui: "AABBCCDDEEFF0011".to_string(),
        };
        let unknown = DeviceInfo {
            device_name: "stray".to_string(),
            dev_eui: "0000000000000099".to_string(),
        };

        assert_eq!(handler.display_name(&known), "gate");
        assert_eq!(handler.display_name(&unknown), "stray (unregistered)");
    }
}
