//! Registry of known end-nodes
//!
//! Owns the set of devices the operator works with. The registry is an
//! insertion-ordered collection keyed by device EUI, optionally backed by
//! a JSON file that is rewritten wholesale after every mutation. The file
//! gives at-least-once durability, not transactions: a crash between a
//! mutation and its flush loses that one change.
//!
//! The registry is a cache of the server's device list with no freshness
//! guarantee beyond the last `resync`. It must only be mutated from the
//! task that owns it.

pub mod node;

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use node::{DevEui, DeviceType, Node};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a node with EUI {0} is already registered")]
    Duplicate(DevEui),
    #[error("no node with EUI {0} is registered")]
    NotFound(DevEui),
    #[error("node store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("node store is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Mapping from device EUI to [`Node`], at most one node per EUI
///
/// `list()` returns nodes in insertion order.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    store_path: Option<PathBuf>,
}

impl NodeRegistry {
    /// Create an empty in-memory registry with no backing store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry backed by `path`, loading it if the file exists
    pub fn with_store(path: PathBuf) -> Result<Self, RegistryError> {
        let nodes = if path.exists() {
            let loaded = load_nodes(&path)?;
            info!("Loaded {} node(s) from {:?}", loaded.len(), path);
            loaded
        } else {
            debug!("Node store {:?} does not exist yet, starting empty", path);
            Vec::new()
        };

        Ok(Self {
            nodes,
            store_path: Some(path),
        })
    }

    /// Register a node
    ///
    /// Fails with [`RegistryError::Duplicate`] if a node with the same EUI
    /// already exists. Re-registration under the same EUI requires
    /// remove-then-add.
    pub fn add(&mut self, node: Node) -> Result<(), RegistryError> {
        if self.lookup(&node.dev_eui).is_some() {
            return Err(RegistryError::Duplicate(node.dev_eui));
        }
        self.nodes.push(node);
        self.flush()
    }

    /// Remove a node by EUI
    ///
    /// Removing an absent EUI is a no-op, not an error. Returns whether a
    /// node was actually removed.
    pub fn remove(&mut self, dev_eui: &DevEui) -> Result<bool, RegistryError> {
        let before = self.nodes.len();
        self.nodes.retain(|n| &n.dev_eui != dev_eui);
        let removed = self.nodes.len() != before;
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn lookup(&self, dev_eui: &DevEui) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.dev_eui == dev_eui)
    }

    /// Like [`lookup`](Self::lookup) but absence is a typed failure,
    /// for command paths that require the node to exist
    pub fn get(&self, dev_eui: &DevEui) -> Result<&Node, RegistryError> {
        self.lookup(dev_eui)
            .ok_or_else(|| RegistryError::NotFound(dev_eui.clone()))
    }

    /// All nodes, in insertion order
    pub fn list(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace the entire registry with nodes derived from a remote listing
    ///
    /// This is a destructive full replace, not a merge: nodes registered
    /// locally but absent from the listing are lost. Duplicate EUIs in the
    /// listing keep the first occurrence.
    pub fn resync(
        &mut self,
        listing: impl IntoIterator<Item = Node>,
    ) -> Result<(), RegistryError> {
        self.nodes.clear();
        for node in listing {
            if self.lookup(&node.dev_eui).is_some() {
                warn!("Remote listing repeats EUI {}, keeping first", node.dev_eui);
                continue;
            }
            self.nodes.push(node);
        }
        self.flush()
    }

    /// Rewrite the backing store, if one is configured
    fn flush(&self) -> Result<(), RegistryError> {
        if let Some(path) = &self.store_path {
            save_nodes(path, &self.nodes)?;
            debug!("Flushed {} node(s) to {:?}", self.nodes.len(), path);
        }
        Ok(())
    }
}

fn load_nodes(path: &Path) -> Result<Vec<Node>, RegistryError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_nodes(path: &Path, nodes: &[Node]) -> Result<(), RegistryError> {
    let content = serde_json::to_string_pretty(nodes)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui(s: &str) -> DevEui {
        s.parse().unwrap()
    }

    fn node(eui_str: &str, name: &str) -> Node {
        Node::new(eui(eui_str), name)
    }

    #[test]
    fn test_add_rejects_duplicate_eui() {
        let mut reg = NodeRegistry::new();
        reg.add(node("aabbccddeeff0011", "first")).unwrap();

        let err = reg.add(node("AABBCCDDEEFF0011", "second")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut reg = NodeRegistry::new();
        reg.add(node("aabbccddeeff0011", "only")).unwrap();

        let removed = reg.remove(&eui("0000000000000000")).unwrap();
        assert!(!removed);
        assert_eq!(reg.len(), 1);

        let removed = reg.remove(&eui("aabbccddeeff0011")).unwrap();
        assert!(removed);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let mut reg = NodeRegistry::new();
        reg.add(node("0000000000000003", "c")).unwrap();
        reg.add(node("0000000000000001", "a")).unwrap();
        reg.add(node("0000000000000002", "b")).unwrap();

        let names: Vec<&str> = reg.list().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_resync_replaces_everything() {
        let mut reg = NodeRegistry::new();
        reg.add(node("0000000000000001", "local-only")).unwrap();
        reg.add(node("0000000000000002", "stays")).unwrap();

        reg.resync(vec![
            node("0000000000000002", "stays"),
            node("0000000000000003", "remote-new"),
        ])
        .unwrap();

        assert_eq!(reg.len(), 2);
        assert!(reg.lookup(&eui("0000000000000001")).is_none());
        assert!(reg.lookup(&eui("0000000000000002")).is_some());
        assert!(reg.lookup(&eui("0000000000000003")).is_some());
    }

    #[test]
    fn test_resync_drops_repeated_euis() {
        let mut reg = NodeRegistry::new();
        reg.resync(vec![
            node("0000000000000001", "first"),
            node("0000000000000001", "second"),
        ])
        .unwrap();

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.list()[0].name, "first");
    }

    #[test]
    fn test_get_absent_is_not_found() {
        let reg = NodeRegistry::new();
        let err = reg.get(&eui("aabbccddeeff0011")).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        {
            let mut reg = NodeRegistry::with_store(path.clone()).unwrap();
            let mut tracker = node("aabbccddeeff0011", "gate");
            tracker.device_type = DeviceType::Tracker;
            reg.add(tracker).unwrap();
            reg.add(node("0000000000000001", "pump")).unwrap();
        }

        let reloaded = NodeRegistry::with_store(path).unwrap();
        assert_eq!(reloaded.len(), 2);

        let gate = reloaded.get(&eui("aabbccddeeff0011")).unwrap();
        assert_eq!(gate.name, "gate");
        assert_eq!(gate.device_type, DeviceType::Tracker);

        let pump = reloaded.get(&eui("0000000000000001")).unwrap();
        assert_eq!(pump.device_type, DeviceType::BlankUnit);
    }

    #[test]
    fn test_mutations_flush_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        let mut reg = NodeRegistry::with_store(path.clone()).unwrap();
        reg.add(node("aabbccddeeff0011", "gate")).unwrap();
        reg.remove(&eui("aabbccddeeff0011")).unwrap();

        let reloaded = NodeRegistry::with_store(path).unwrap();
        assert!(reloaded.is_empty());
    }
}
