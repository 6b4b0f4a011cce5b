use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default minimum ring size requested by a client. Default: 4 KiB.
pub const DEFAULT_BUFFER_SIZE: u32 = 4096;

/// Default upper bound on buffers a [`LocalDevice`](crate::LocalDevice) hands out. Default: 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: u32 = 1024 * 1024;

/// Client-side configuration for opening a looped stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Minimum ring buffer size in bytes; the device may round up.
    pub buffer_size: u32,
    /// Timeout applied to each negotiation request.
    #[serde(rename = "negotiation_timeout_ms", with = "millis")]
    pub negotiation_timeout: Duration,
    /// Terminate open SysEx7 streams when an inadmissible packet is enqueued.
    pub enforce_sysex_interleave: bool,
    /// Ask the device for exclusive access.
    pub exclusive: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            negotiation_timeout: Duration::from_secs(5),
            enforce_sysex_interleave: true,
            exclusive: false,
        }
    }
}

/// Configuration of an in-process [`LocalDevice`](crate::LocalDevice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Largest buffer the device will allocate, in bytes.
    pub max_buffer_size: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
