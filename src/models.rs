//! Data models for OLT records returned by the driver.

use serde::{Deserialize, Serialize};

/// Immutable per-model metadata.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub vendor: &'static str,
    pub max_boards: u32,
    pub max_pon_per_board: u32,
    pub max_onu_per_pon: u32,
}

/// One customer terminal discovered on a PON port.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TerminalSummary {
    pub board: u32,
    pub pon: u32,
    pub onu_id: u32,
    pub name: String,
    pub onu_type: String,
    pub serial_number: String,
    /// Received optical power in dBm.
    pub rx_power: String,
    /// Transmitted optical power in dBm.
    pub tx_power: String,
    pub distance: String,
    pub status: String,
}

impl TerminalSummary {
    /// A terminal with every device-read field at its default.
    pub fn new(board: u32, pon: u32, onu_id: u32) -> Self {
        Self {
            board,
            pon,
            onu_id,
            rx_power: "0.00".to_string(),
            tx_power: "0.00".to_string(),
            ..Default::default()
        }
    }
}

/// Full record for a single terminal.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TerminalDetail {
    #[serde(flatten)]
    pub summary: TerminalSummary,
    pub ip_address: String,
    pub description: String,
    pub last_online: String,
    pub last_offline: String,
    pub uptime: String,
    pub last_down_cause: String,
}

/// A terminal id on a PON port that no terminal occupies.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EmptySlot {
    pub board: u32,
    pub pon: u32,
    pub onu_id: u32,
}

/// Generic system group of the device.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub description: String,
    pub uptime: String,
    pub contact: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BoardStatus {
    pub board_id: u32,
    pub card_type: String,
    pub status: String,
    pub cpu_load: i64,
    pub memory_usage: i64,
}

/// Optical levels of a PON port, in dBm.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PonPortStats {
    pub board: u32,
    pub pon: u32,
    pub tx_power: f64,
    pub rx_power: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InterfaceStats {
    pub index: u32,
    pub description: String,
    pub status: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Point-in-time view of the connection pool. Advisory only.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max: usize,
    pub active: usize,
    pub available: usize,
}
