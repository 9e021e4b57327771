//! Address and value codec for the ZTE C320.
//!
//! Maps a logical (board, PON, terminal) address to the OIDs the device
//! publishes, and decodes raw SNMP values into display data. Everything in
//! here is pure: no I/O, no caching, and the decoders never fail. A value of
//! the wrong type decodes to a safe default instead.
//!
//! The C320 numbers its per-port tables in two independent families:
//!
//! - the *identity* family, `base_identity(board) + pon`, used by almost
//!   every terminal attribute;
//! - the *type* family, `base_type(board) + pon * 256`, used by the terminal
//!   type and IP tables.
//!
//! Mixing them up does not fail on the wire, it silently reads another port.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{GatewayError, Result};
use crate::models::ModelDescriptor;
use crate::snmp::SnmpValue;

/// Root of the identity-family tables.
pub const IDENTITY_ROOT: &str = "1.3.6.1.4.1.3902.1082";
/// Root of the type-family tables.
pub const TYPE_ROOT: &str = "1.3.6.1.4.1.3902.1012";

const NAME_PREFIX: &str = ".500.10.2.3.3.1.2";
const SERIAL_PREFIX: &str = ".500.10.2.3.3.1.18";
const DESCRIPTION_PREFIX: &str = ".500.10.2.3.3.1.3";
const RX_POWER_PREFIX: &str = ".500.20.2.2.2.1.10";
const TX_POWER_PREFIX: &str = ".500.20.2.2.2.1.14";
const STATUS_PREFIX: &str = ".500.10.2.3.8.1.4";
const LAST_ONLINE_PREFIX: &str = ".500.10.2.3.8.1.5";
const LAST_OFFLINE_PREFIX: &str = ".500.10.2.3.8.1.6";
const OFFLINE_REASON_PREFIX: &str = ".500.10.2.3.8.1.7";
const DISTANCE_PREFIX: &str = ".500.10.2.3.10.1.2";
const TYPE_PREFIX: &str = ".3.28.1.1.1";
const IP_ADDRESS_PREFIX: &str = ".3.50.16.1.1.10";

/// Identity-family base per board. Board 1 PON 1 is 285278465.
const IDENTITY_BASE: [u64; 2] = [285_278_464, 285_278_720];
/// Type-family base per board. Board 1 PON 1 is 268501248.
const TYPE_BASE: [u64; 2] = [268_500_992, 268_566_528];
const TYPE_PON_STRIDE: u64 = 256;

// Card table, indexed by board slot.
pub const CARD_TYPE_OID: &str = "1.3.6.1.4.1.3902.1015.2.1.1.3.1.4.1.1";
pub const CARD_STATUS_OID: &str = "1.3.6.1.4.1.3902.1015.2.1.1.3.1.5.1.1";
pub const CARD_CPU_OID: &str = "1.3.6.1.4.1.3902.1015.2.1.1.3.1.9.1.1";
pub const CARD_MEMORY_OID: &str = "1.3.6.1.4.1.3902.1015.2.1.1.3.1.11.1.1";

// PON port optical levels, indexed by the flat PON index.
pub const PON_TX_POWER_OID: &str = "1.3.6.1.4.1.3902.1082.30.40.2.4.1.6";
pub const PON_RX_POWER_OID: &str = "1.3.6.1.4.1.3902.1082.30.40.2.4.1.7";

// MIB-II system group.
pub const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
pub const SYS_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";
pub const SYS_CONTACT_OID: &str = "1.3.6.1.2.1.1.4.0";
pub const SYS_NAME_OID: &str = "1.3.6.1.2.1.1.5.0";
pub const SYS_LOCATION_OID: &str = "1.3.6.1.2.1.1.6.0";

// Interface tables.
pub const IF_DESCR_OID: &str = "1.3.6.1.2.1.2.2.1.2";
pub const IF_OPER_STATUS_OID: &str = "1.3.6.1.2.1.2.2.1.8";
pub const IF_HC_IN_OCTETS_OID: &str = "1.3.6.1.2.1.31.1.1.1.6";
pub const IF_HC_OUT_OCTETS_OID: &str = "1.3.6.1.2.1.31.1.1.1.10";

pub const C320: ModelDescriptor = ModelDescriptor {
    name: "C320",
    vendor: "ZTE",
    max_boards: 2,
    max_pon_per_board: 16,
    max_onu_per_pon: 128,
};

pub const C300: ModelDescriptor = ModelDescriptor {
    name: "C300",
    vendor: "ZTE",
    max_boards: 14,
    max_pon_per_board: 16,
    max_onu_per_pon: 128,
};

pub const C600: ModelDescriptor = ModelDescriptor {
    name: "C600",
    vendor: "ZTE",
    max_boards: 17,
    max_pon_per_board: 16,
    max_onu_per_pon: 128,
};

/// Supported OLT product lines. Only the C320 has a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OltModel {
    C320,
    C300,
    C600,
}

impl OltModel {
    pub fn descriptor(self) -> ModelDescriptor {
        match self {
            OltModel::C320 => C320,
            OltModel::C300 => C300,
            OltModel::C600 => C600,
        }
    }
}

impl FromStr for OltModel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C320" => Ok(OltModel::C320),
            "C300" => Ok(OltModel::C300),
            "C600" => Ok(OltModel::C600),
            other => Err(GatewayError::UnsupportedModel(other.to_string())),
        }
    }
}

impl fmt::Display for OltModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().name)
    }
}

/// Per-terminal attributes published by the C320.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Name,
    OnuType,
    Serial,
    RxPower,
    TxPower,
    Status,
    IpAddress,
    Description,
    LastOnline,
    LastOffline,
    OfflineReason,
    Distance,
}

/// Fully-qualified OID prefixes for every attribute of one (board, PON).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSet {
    pub board: u32,
    pub pon: u32,
    pub identity_suffix: u64,
    pub type_suffix: u64,
    pub name: String,
    pub onu_type: String,
    pub serial: String,
    pub rx_power: String,
    pub tx_power: String,
    pub status: String,
    pub ip_address: String,
    pub description: String,
    pub last_online: String,
    pub last_offline: String,
    pub offline_reason: String,
    pub distance: String,
}

impl AddressSet {
    /// Table prefix of `attr`, without the terminal id.
    pub fn prefix(&self, attr: Attribute) -> &str {
        match attr {
            Attribute::Name => &self.name,
            Attribute::OnuType => &self.onu_type,
            Attribute::Serial => &self.serial,
            Attribute::RxPower => &self.rx_power,
            Attribute::TxPower => &self.tx_power,
            Attribute::Status => &self.status,
            Attribute::IpAddress => &self.ip_address,
            Attribute::Description => &self.description,
            Attribute::LastOnline => &self.last_online,
            Attribute::LastOffline => &self.last_offline,
            Attribute::OfflineReason => &self.offline_reason,
            Attribute::Distance => &self.distance,
        }
    }

    /// Full OID of `attr` for terminal `onu_id`.
    ///
    /// Optical power and IP rows carry an extra trailing `.1` instance.
    pub fn oid(&self, attr: Attribute, onu_id: u32) -> String {
        match attr {
            Attribute::RxPower | Attribute::TxPower | Attribute::IpAddress => {
                format!("{}.{}.1", self.prefix(attr), onu_id)
            }
            _ => format!("{}.{}", self.prefix(attr), onu_id),
        }
    }
}

fn board_slot(board: u32) -> Result<usize> {
    match board {
        1 | 2 => Ok(board as usize - 1),
        _ => Err(GatewayError::Validation(format!(
            "board {board} has no address constants"
        ))),
    }
}

pub fn identity_suffix(board: u32, pon: u32) -> Result<u64> {
    Ok(IDENTITY_BASE[board_slot(board)?] + u64::from(pon))
}

pub fn type_suffix(board: u32, pon: u32) -> Result<u64> {
    Ok(TYPE_BASE[board_slot(board)?] + u64::from(pon) * TYPE_PON_STRIDE)
}

/// Builds the address set for (board, PON).
pub fn compute_address_set(board: u32, pon: u32) -> Result<AddressSet> {
    let id = identity_suffix(board, pon)?;
    let ty = type_suffix(board, pon)?;
    let identity = |prefix: &str| format!("{IDENTITY_ROOT}{prefix}.{id}");
    let typed = |prefix: &str| format!("{TYPE_ROOT}{prefix}.{ty}");

    Ok(AddressSet {
        board,
        pon,
        identity_suffix: id,
        type_suffix: ty,
        name: identity(NAME_PREFIX),
        onu_type: typed(TYPE_PREFIX),
        serial: identity(SERIAL_PREFIX),
        rx_power: identity(RX_POWER_PREFIX),
        tx_power: identity(TX_POWER_PREFIX),
        status: identity(STATUS_PREFIX),
        ip_address: typed(IP_ADDRESS_PREFIX),
        description: identity(DESCRIPTION_PREFIX),
        last_online: identity(LAST_ONLINE_PREFIX),
        last_offline: identity(LAST_OFFLINE_PREFIX),
        offline_reason: identity(OFFLINE_REASON_PREFIX),
        distance: identity(DISTANCE_PREFIX),
    })
}

/// Flat PON index used by the board-level optical tables.
pub fn compute_pon_index(board: u32, pon: u32) -> u32 {
    board.saturating_sub(1) * C320.max_pon_per_board + pon
}

/// Last dotted segment of an OID as an integer, 0 when it does not parse.
pub fn trailing_segment(oid: &str) -> u32 {
    oid.rsplit('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Terminal optical power: `raw * 0.002 - 30` dBm, two decimals.
pub fn decode_power_raw(raw: i64) -> String {
    let dbm = ((raw as f64 * 0.002 - 30.0) * 100.0).round() / 100.0;
    // -0.0 would render as "-0.00"
    format!("{:.2}", dbm + 0.0)
}

pub fn decode_power(value: &SnmpValue) -> String {
    match value.as_i64() {
        Some(raw) => decode_power_raw(raw),
        None => "0.00".to_string(),
    }
}

/// PON port optical level: raw hundredths of a dBm.
pub fn decode_pon_dbm(value: &SnmpValue) -> f64 {
    value.as_i64().map(|raw| raw as f64 / 100.0).unwrap_or(0.0)
}

/// Strips the `1,` tag some firmware puts in front of the serial.
pub fn decode_serial(raw: &str) -> String {
    raw.strip_prefix("1,").unwrap_or(raw).to_string()
}

pub fn decode_serial_value(value: &SnmpValue) -> String {
    decode_serial(&decode_text(value))
}

/// Eight-byte DateAndTime: big-endian year, then month, day, hour, minute,
/// second. Anything else decodes to an empty string.
pub fn decode_timestamp(bytes: &[u8]) -> String {
    match bytes {
        [y0, y1, month, day, hour, minute, second, _] => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            u16::from_be_bytes([*y0, *y1]),
            month,
            day,
            hour,
            minute,
            second
        ),
        _ => String::new(),
    }
}

pub fn decode_timestamp_value(value: &SnmpValue) -> String {
    match value {
        SnmpValue::OctetString(bytes) => decode_timestamp(bytes),
        _ => String::new(),
    }
}

/// Printable text of a value. Trailing NULs are dropped.
pub fn decode_text(value: &SnmpValue) -> String {
    match value {
        SnmpValue::OctetString(bytes) => String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .trim()
            .to_string(),
        SnmpValue::Integer(v) => v.to_string(),
        SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
            v.to_string()
        }
        SnmpValue::Counter64(v) => v.to_string(),
        SnmpValue::IpAddress(_) => decode_ip(value),
        SnmpValue::ObjectId(oid) => oid.clone(),
        _ => String::new(),
    }
}

pub fn decode_integer(value: &SnmpValue) -> i64 {
    value.as_i64().unwrap_or(0)
}

pub fn decode_counter(value: &SnmpValue) -> u64 {
    match value {
        SnmpValue::Counter64(v) => *v,
        other => other
            .as_i64()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0),
    }
}

pub fn decode_ip(value: &SnmpValue) -> String {
    match value {
        SnmpValue::IpAddress(octets) => std::net::Ipv4Addr::from(*octets).to_string(),
        SnmpValue::OctetString(bytes) if bytes.len() == 4 => {
            std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()
        }
        SnmpValue::OctetString(_) => decode_text(value),
        _ => String::new(),
    }
}

/// Optical distance in meters, rendered as text.
pub fn decode_distance(value: &SnmpValue) -> String {
    match value.as_i64() {
        Some(meters) => meters.to_string(),
        None => decode_text(value),
    }
}

/// ifOperStatus: 1 is up, everything else is down.
pub fn decode_if_status(value: &SnmpValue) -> String {
    match value.as_i64() {
        Some(1) => "Up".to_string(),
        _ => "Down".to_string(),
    }
}

/// sysUpTime in hundredths of a second, as `Nd HH:MM:SS`.
pub fn decode_timeticks(value: &SnmpValue) -> String {
    let Some(ticks) = value.as_i64() else {
        return String::new();
    };
    let secs = ticks / 100;
    format!(
        "{}d {:02}:{:02}:{:02}",
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

/// Terminal phase state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnuStatus {
    Logging,
    Los,
    SyncMib,
    Online,
    DyingGasp,
    AuthFailed,
    Offline,
}

impl OnuStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => OnuStatus::Logging,
            2 => OnuStatus::Los,
            3 => OnuStatus::SyncMib,
            4 => OnuStatus::Online,
            5 => OnuStatus::DyingGasp,
            6 => OnuStatus::AuthFailed,
            7 => OnuStatus::Offline,
            _ => return None,
        })
    }
}

impl fmt::Display for OnuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnuStatus::Logging => "Logging",
            OnuStatus::Los => "LOS",
            OnuStatus::SyncMib => "Synchronization",
            OnuStatus::Online => "Online",
            OnuStatus::DyingGasp => "Dying Gasp",
            OnuStatus::AuthFailed => "Auth Failed",
            OnuStatus::Offline => "Offline",
        })
    }
}

/// Reason recorded for the last time a terminal went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    Unknown,
    Los,
    LosI,
    LofI,
    Sfi,
    LoaI,
    LoamI,
    AuthFail,
    PowerOff,
    DeactiveSuccess,
    DeactiveFail,
    Reboot,
    Shutdown,
}

impl OfflineReason {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => OfflineReason::Unknown,
            2 => OfflineReason::Los,
            3 => OfflineReason::LosI,
            4 => OfflineReason::LofI,
            5 => OfflineReason::Sfi,
            6 => OfflineReason::LoaI,
            7 => OfflineReason::LoamI,
            8 => OfflineReason::AuthFail,
            9 => OfflineReason::PowerOff,
            10 => OfflineReason::DeactiveSuccess,
            11 => OfflineReason::DeactiveFail,
            12 => OfflineReason::Reboot,
            13 => OfflineReason::Shutdown,
            _ => return None,
        })
    }
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OfflineReason::Unknown => "Unknown",
            OfflineReason::Los => "LOS",
            OfflineReason::LosI => "LOSi",
            OfflineReason::LofI => "LOFi",
            OfflineReason::Sfi => "SFi",
            OfflineReason::LoaI => "LOAi",
            OfflineReason::LoamI => "LOAMi",
            OfflineReason::AuthFail => "Auth Fail",
            OfflineReason::PowerOff => "Power Off",
            OfflineReason::DeactiveSuccess => "Deactive Success",
            OfflineReason::DeactiveFail => "Deactive Fail",
            OfflineReason::Reboot => "Reboot",
            OfflineReason::Shutdown => "Shutdown",
        })
    }
}

/// Operational state of a line card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    InService,
    NotInService,
    HwOnline,
    HwOffline,
    Configuring,
    ConfigFailed,
    TypeMismatch,
    Deactivated,
    Faulty,
    Invalid,
    NoPower,
}

impl CardStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => CardStatus::InService,
            2 => CardStatus::NotInService,
            3 => CardStatus::HwOnline,
            4 => CardStatus::HwOffline,
            5 => CardStatus::Configuring,
            6 => CardStatus::ConfigFailed,
            7 => CardStatus::TypeMismatch,
            8 => CardStatus::Deactivated,
            9 => CardStatus::Faulty,
            10 => CardStatus::Invalid,
            11 => CardStatus::NoPower,
            _ => return None,
        })
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CardStatus::InService => "In Service",
            CardStatus::NotInService => "Not In Service",
            CardStatus::HwOnline => "HW Online",
            CardStatus::HwOffline => "HW Offline",
            CardStatus::Configuring => "Configuring",
            CardStatus::ConfigFailed => "Config Failed",
            CardStatus::TypeMismatch => "Type Mismatch",
            CardStatus::Deactivated => "Deactivated",
            CardStatus::Faulty => "Faulty",
            CardStatus::Invalid => "Invalid",
            CardStatus::NoPower => "No Power",
        })
    }
}

fn decode_enum<T: fmt::Display>(value: &SnmpValue, from_code: fn(i64) -> Option<T>) -> String {
    value
        .as_i64()
        .and_then(from_code)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn decode_status(value: &SnmpValue) -> String {
    decode_enum(value, OnuStatus::from_code)
}

pub fn decode_offline_reason(value: &SnmpValue) -> String {
    decode_enum(value, OfflineReason::from_code)
}

pub fn decode_card_status(value: &SnmpValue) -> String {
    decode_enum(value, CardStatus::from_code)
}
