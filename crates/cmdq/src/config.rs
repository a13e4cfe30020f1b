//! Transport configuration
//!
//! Loaded from TOML by the embedding program; every field has a default so a
//! partial file is enough.

use crate::error::TransportError;
use crate::types::{QueueId, ALIGNMENT, HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Placement of the shared window in both address spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Host-relative offset of the first window byte
    pub host_base: u32,
    /// Controller virtual address of the first window byte
    pub local_base: u32,
    /// Window length in bytes
    pub size: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            host_base: 0x1000,
            local_base: 0x0040_0000,
            size: 0x800,
        }
    }
}

/// Placement of one ring inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    pub queue_id: u8,
    /// Host-relative base offset of the ring
    pub offset: u32,
    /// Ring capacity in bytes
    pub size: u32,
}

impl RingConfig {
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    pub fn queue_id(&self) -> QueueId {
        QueueId(self.queue_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub window: WindowConfig,
    /// Host -> controller command ring
    pub command_queue: RingConfig,
    /// Controller -> host response ring
    pub response_queue: RingConfig,
    /// Default depth of each unit inbox
    pub inbox_capacity: usize,
    /// Bounded wait for the startup gate
    pub setup_timeout_ms: u64,
    /// Absent: block on a full inbox forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox_send_timeout_ms: Option<u64>,
    /// Absent: wait for response ring space forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_post_timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            command_queue: RingConfig {
                queue_id: 0,
                offset: 0x1000,
                size: 0x400,
            },
            response_queue: RingConfig {
                queue_id: 1,
                offset: 0x1400,
                size: 0x400,
            },
            inbox_capacity: 8,
            setup_timeout_ms: 1_000,
            inbox_send_timeout_ms: None,
            response_post_timeout_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, TransportError> {
        let config: Self =
            toml::from_str(content).map_err(|e| TransportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, TransportError> {
        log::info!("Loading transport config from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| TransportError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, TransportError> {
        toml::to_string_pretty(self).map_err(|e| TransportError::Config(e.to_string()))
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn inbox_send_timeout(&self) -> Option<Duration> {
        self.inbox_send_timeout_ms.map(Duration::from_millis)
    }

    pub fn response_post_timeout(&self) -> Option<Duration> {
        self.response_post_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        let w = &self.window;
        if w.size == 0 {
            return Err(TransportError::Config("window size is zero".into()));
        }
        if w.host_base.checked_add(w.size).is_none() {
            return Err(TransportError::Config(
                "window overflows host offset space".into(),
            ));
        }
        if w.local_base.checked_add(w.size).is_none() {
            return Err(TransportError::Config(
                "window overflows local address space".into(),
            ));
        }
        if w.host_base % ALIGNMENT != 0 || w.local_base % ALIGNMENT != 0 {
            return Err(TransportError::Config("window bases must be 4-byte aligned".into()));
        }

        for (name, ring) in [
            ("command_queue", &self.command_queue),
            ("response_queue", &self.response_queue),
        ] {
            if ring.offset % ALIGNMENT != 0 || ring.size % ALIGNMENT != 0 {
                return Err(TransportError::Config(format!(
                    "{name}: offset and size must be 4-byte aligned"
                )));
            }
            if ring.size < 2 * HEADER_SIZE {
                return Err(TransportError::Config(format!(
                    "{name}: ring must hold at least two headers"
                )));
            }
            if ring.offset < w.host_base || ring.end() > w.host_base as u64 + w.size as u64 {
                return Err(TransportError::Config(format!(
                    "{name}: ring [0x{:x}, 0x{:x}) lies outside the window",
                    ring.offset,
                    ring.end()
                )));
            }
            if ring.queue_id >= 31 {
                return Err(TransportError::Config(format!(
                    "{name}: queue id {} exceeds notification bits",
                    ring.queue_id
                )));
            }
        }

        let (a, b) = (&self.command_queue, &self.response_queue);
        if (a.offset as u64) < b.end() && (b.offset as u64) < a.end() {
            return Err(TransportError::Config("command and response rings overlap".into()));
        }
        if a.queue_id == b.queue_id {
            return Err(TransportError::Config("rings share a queue id".into()));
        }
        if self.inbox_capacity == 0 {
            return Err(TransportError::Config("inbox_capacity must be non-zero".into()));
        }

        Ok(())
    }
}
