//! Per-node configuration
//!
//! Every node carries its own configuration, chosen at construction.
//! There is no global registry of node kinds: a fixed-arity node and a
//! growable node are the same type with a different storage strategy.
//!
//! Author: Moroya Sakamoto

/// Child storage strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Growable ordered list; every entry is a live child.
    List,
    /// Fixed number of slots; empty slots are placeholders.
    Fixed(usize),
}

impl StorageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StorageKind::List => "list",
            StorageKind::Fixed(_) => "fixed",
        }
    }
}

/// Node construction options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// How children are stored
    pub storage: StorageKind,
    /// Whether the node takes part in structure-change notification
    pub notify: bool,
    /// Check parent/child consistency after every completed edit
    pub verify_consistency: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::List,
            notify: true,
            verify_consistency: cfg!(debug_assertions),
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Shorthand for `with_storage(StorageKind::Fixed(arity))`
    pub fn fixed(self, arity: usize) -> Self {
        self.with_storage(StorageKind::Fixed(arity))
    }

    /// A node that never raises notifications
    pub fn silent(mut self) -> Self {
        self.notify = false;
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_consistency = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_notifying_list() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.storage, StorageKind::List);
        assert!(cfg.notify);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = NodeConfig::new().fixed(2).silent().with_verification(true);
        assert_eq!(cfg.storage, StorageKind::Fixed(2));
        assert!(!cfg.notify);
        assert!(cfg.verify_consistency);
    }

    #[test]
    fn test_storage_names() {
        assert_eq!(StorageKind::List.name(), "list");
        assert_eq!(StorageKind::Fixed(3).name(), "fixed");
    }
}
