//! Runtime configuration for the deferred context.
//!
//! Defaults suit the threaded production setup; every knob can be
//! overridden from the environment, which is how the host frontend and the
//! test harness flip the context into direct mode.

use serde::{Deserialize, Serialize};

const DEFAULT_THREADED: bool = true;
const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_TRANSFER_SLOTS: usize = 3;

/// Knobs for [`crate::context::DeferredContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Run commands on a dedicated consumer thread. When false, the same
    /// command stream executes inline on the caller's thread.
    pub threaded: bool,
    /// Bounded capacity of the command queue (threaded mode only). A full
    /// queue blocks producers instead of dropping commands.
    pub queue_capacity: usize,
    /// Transfer slots per persistent-mapped color-buffer reader.
    pub transfer_slots: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            threaded: DEFAULT_THREADED,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            transfer_slots: DEFAULT_TRANSFER_SLOTS,
        }
    }
}

impl ContextConfig {
    /// Defaults overridden by `DRAWBRIDGE_THREADED`,
    /// `DRAWBRIDGE_QUEUE_CAPACITY` and `DRAWBRIDGE_TRANSFER_SLOTS`.
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("DRAWBRIDGE_THREADED") {
            match raw.trim() {
                "0" | "false" => config.threaded = false,
                "1" | "true" => config.threaded = true,
                other => {
                    tracing::warn!(value = other, "ignoring invalid DRAWBRIDGE_THREADED");
                }
            }
        }
        if let Ok(raw) = std::env::var("DRAWBRIDGE_QUEUE_CAPACITY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.queue_capacity = n,
                _ => {
                    tracing::warn!(value = raw, "ignoring invalid DRAWBRIDGE_QUEUE_CAPACITY");
                }
            }
        }
        if let Ok(raw) = std::env::var("DRAWBRIDGE_TRANSFER_SLOTS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.transfer_slots = n,
                _ => {
                    tracing::warn!(value = raw, "ignoring invalid DRAWBRIDGE_TRANSFER_SLOTS");
                }
            }
        }
        config
    }

    /// Direct-mode preset used by tests and single-threaded hosts.
    pub fn direct() -> Self {
        Self {
            threaded: false,
            ..Self::default()
        }
    }
}
