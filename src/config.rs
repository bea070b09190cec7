//! # Board Configuration
//!
//! JSON-based description of the emulated board: which GPIO bit carries which
//! bus line, how large the emulated store is, and where the trace table lives
//! in non-volatile storage.
//!
//! ## Configuration File Format
//!
//! ```json
//! {
//!   "name": "lower-ram-board",
//!   "description": "Lower 16K RAM replacement",
//!   "pins": {
//!     "address_base": 0,
//!     "data_base": 8,
//!     "direction": 16,
//!     "write": 17,
//!     "column_strobe": 18,
//!     "row_strobe": 19,
//!     "mode_select": 22
//!   },
//!   "trace_capacity": 50000,
//!   "trace_flash_offset": 65536
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// GPIO bit assignment for every monitored or driven bus line.
///
/// The address bus occupies seven consecutive bits starting at `address_base`
/// and the data bus eight consecutive bits starting at `data_base`, matching
/// the board layout where the address lines sit in the lowest GPIOs so the
/// sampled word needs no rotation before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    pub address_base: u8,
    pub data_base: u8,
    /// Level-shifter direction control, driven by the emulator.
    pub direction: u8,
    /// Active-low read/write line: high means the requester is reading.
    pub write: u8,
    pub column_strobe: u8,
    pub row_strobe: u8,
    /// Sampled once at boot: asserted selects "dump persisted trace".
    pub mode_select: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            address_base: 0,
            data_base: 8,
            direction: 16,
            write: 17,
            column_strobe: 18,
            row_strobe: 19,
            mode_select: 22,
        }
    }
}

/// Complete board configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub pins: PinConfig,
    /// Capacity of the transaction trace log, in entries.
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,
    /// Byte offset of the trace table in non-volatile storage.
    #[serde(default = "default_trace_flash_offset")]
    pub trace_flash_offset: usize,
}

fn default_trace_capacity() -> usize {
    50_000
}

fn default_trace_flash_offset() -> usize {
    0x10000
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            name: "lower-ram-board".to_string(),
            description: "Multiplexed DRAM bus emulator, 16K store".to_string(),
            pins: PinConfig::default(),
            trace_capacity: default_trace_capacity(),
            trace_flash_offset: default_trace_flash_offset(),
        }
    }
}

impl BoardConfig {
    /// Loads a board configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Failed to parse config JSON: {}", e))
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))
    }
}
