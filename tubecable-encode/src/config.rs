//! Configuration for the encoder CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tubecable_core::huffman::BLOCK_HEADER_LEN;
use tubecable_core::session::MIN_BUFFER_CAPACITY;
use tubecable_core::{GrowthPolicy, Mode, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Adapter selection and transfer settings.
    pub device: DeviceConfig,
    /// Command buffer and compression settings.
    pub stream: StreamConfig,
    /// Display mode.
    pub display: DisplayConfig,
    /// Huffman table source.
    pub huffman: HuffmanConfig,
    /// Stream key.
    pub cipher: CipherConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Adapter selection and transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB vendor id.
    pub vendor: u16,
    /// USB product id (0 matches any product).
    pub product: u16,
    /// Interface to claim.
    pub interface: u8,
    /// Bulk endpoint for command streams.
    pub endpoint: u8,
    /// Per-transfer timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Command buffer and compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Command buffer size in bytes.
    pub buffer_capacity: usize,
    /// "fixed" (send when full) or "grow".
    pub growth: String,
    /// Upper bound for one compressed block in bytes.
    pub blocksize: usize,
    /// Huffman-compress framebuffer writes; RLE/raw otherwise.
    pub compress: bool,
}

/// Display mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Resolution, e.g. "1024x768".
    pub mode: Mode,
}

/// Huffman table source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HuffmanConfig {
    /// Table file in text format. If empty, the built-in table is used.
    pub table_file: String,
}

/// Stream key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// 32 hex digits. If empty, the stream stays unkeyed.
    pub key: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor: 0x17E9,
            product: 0,
            interface: 0,
            endpoint: tubecable_core::DEFAULT_ENDPOINT,
            timeout_ms: 1000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64 * 1024,
            growth: "fixed".into(),
            blocksize: tubecable_core::DEFAULT_BLOCKSIZE,
            compress: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl EncodeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Table file to load, if one is configured.
    pub fn table_file(&self) -> Option<PathBuf> {
        let file = self.huffman.table_file.trim();
        (!file.is_empty()).then(|| PathBuf::from(file))
    }

    /// Convert into a `SessionConfig`, clamping values the encoder cannot
    /// work with.
    pub fn to_session_config(&self) -> SessionConfig {
        let growth = match self.stream.growth.trim().to_ascii_lowercase().as_str() {
            "grow" => GrowthPolicy::Grow,
            _ => GrowthPolicy::Fixed,
        };
        let blocksize = self.stream.blocksize.clamp(BLOCK_HEADER_LEN + 1, 64 * 1024);
        SessionConfig {
            endpoint: self.device.endpoint,
            timeout: Duration::from_millis(self.device.timeout_ms.max(1)),
            buffer_capacity: self.stream.buffer_capacity.max(MIN_BUFFER_CAPACITY).max(blocksize),
            growth,
            blocksize,
            mode: self.display.mode,
            compress: self.stream.compress,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
