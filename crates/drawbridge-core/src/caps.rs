//! Immutable snapshot of what the native graphics device supports.

use serde::{Deserialize, Serialize};

/// Device capability descriptor, taken once at context setup.
///
/// Consumed by [`crate::strategy::StrategySet::select`] to pick the texture
/// and readback techniques; never re-queried afterwards. Backends construct
/// this from their own probe (GL version + extensions, wgpu features).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// Native API version (major, minor). Informational.
    pub version: (u32, u32),
    /// Persistent, coherent buffer mapping (GL `ARB_buffer_storage` class).
    /// Gates the persistent-mapped readback strategy.
    pub buffer_storage: bool,
    /// Direct-state-access style object calls that take a handle instead of
    /// requiring a bind (GL 4.5 class).
    pub direct_state_access: bool,
    /// Immutable texture storage allocation (GL 4.2 `TexStorage` class).
    pub texture_storage: bool,
}

impl DeviceCaps {
    /// Everything on: DSA, immutable storage, persistent mapping.
    pub fn modern() -> Self {
        Self {
            version: (4, 5),
            buffer_storage: true,
            direct_state_access: true,
            texture_storage: true,
        }
    }

    /// Lowest common denominator: bind-to-edit, mutable storage, explicit
    /// map/unmap readback.
    pub fn legacy() -> Self {
        Self {
            version: (2, 1),
            buffer_storage: false,
            direct_state_access: false,
            texture_storage: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_snapshot_roundtrip() {
        let caps = DeviceCaps::modern();
        let json = serde_json::to_string(&caps).expect("caps should serialize");
        let back: DeviceCaps = serde_json::from_str(&json).expect("caps should deserialize");
        assert_eq!(caps, back);
    }
}
