//! Per-tier cache policy and request depth.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Read/write enablement for one cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CachePolicy {
    pub read: bool,
    pub write: bool,
}

impl CachePolicy {
    pub const ENABLED: CachePolicy = CachePolicy {
        read: true,
        write: true,
    };
    pub const READ_ONLY: CachePolicy = CachePolicy {
        read: true,
        write: false,
    };
    pub const WRITE_ONLY: CachePolicy = CachePolicy {
        read: false,
        write: true,
    };
    pub const DISABLED: CachePolicy = CachePolicy {
        read: false,
        write: false,
    };

    /// Parse `enabled`, `read_only`, `write_only` or `disabled`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "enabled" => Some(Self::ENABLED),
            "read_only" => Some(Self::READ_ONLY),
            "write_only" => Some(Self::WRITE_ONLY),
            "disabled" => Some(Self::DISABLED),
            _ => None,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::ENABLED
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match (self.read, self.write) {
            (true, true) => "ENABLED",
            (true, false) => "READ_ONLY",
            (false, true) => "WRITE_ONLY",
            (false, false) => "DISABLED",
        };
        f.write_str(name)
    }
}

/// The deepest source a request may reach.
///
/// Ordered from deepest to shallowest: a `Local` request may use memory and
/// disk, never the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Depth {
    #[default]
    Network,
    Local,
    Memory,
}

impl Depth {
    pub fn allows_network(&self) -> bool {
        *self == Depth::Network
    }

    pub fn allows_local(&self) -> bool {
        *self != Depth::Memory
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Depth::Network => "NETWORK",
            Depth::Local => "LOCAL",
            Depth::Memory => "MEMORY",
        };
        f.write_str(name)
    }
}
