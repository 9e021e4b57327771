//! SNMP v2c sessions and the seam the driver talks through.
//!
//! The driver reaches a device only through [`Session`], so tests can
//! substitute an in-memory agent. [`UdpSession`] is the production
//! implementation on top of `async_snmp::Client`: point GETs and subtree
//! walks, each request bounded by the target's timeout. There are no
//! retries; a lost datagram surfaces as a read failure.

use std::future::Future;
use std::time::Duration;

use async_snmp::{Auth, Client, Oid, UdpClient, Value};
use futures::StreamExt;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// A decoded SNMP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// Numeric view of integer-like values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
                Some(i64::from(*v))
            }
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// True for the v2c exception values that stand in for a missing row.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

impl From<Value> for SnmpValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(v) => SnmpValue::Integer(i64::from(v)),
            Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
            Value::Null => SnmpValue::Null,
            Value::ObjectIdentifier(oid) => SnmpValue::ObjectId(oid.to_string()),
            Value::IpAddress(octets) => SnmpValue::IpAddress(octets),
            Value::Counter32(v) => SnmpValue::Counter32(v),
            Value::Gauge32(v) => SnmpValue::Gauge32(v),
            Value::TimeTicks(v) => SnmpValue::TimeTicks(v),
            Value::Opaque(bytes) => SnmpValue::Opaque(bytes.to_vec()),
            Value::Counter64(v) => SnmpValue::Counter64(v),
            Value::NoSuchObject => SnmpValue::NoSuchObject,
            Value::NoSuchInstance => SnmpValue::NoSuchInstance,
            Value::EndOfMibView => SnmpValue::EndOfMibView,
            // Tags outside the v2c SMI carry nothing the decoders can use.
            _ => SnmpValue::Null,
        }
    }
}

/// Where and how to reach a device's SNMP agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub community: String,
    pub timeout: Duration,
}

impl SnmpTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One open management session with a device.
pub trait Session: Send + Sync {
    /// Point read of a single OID.
    fn get(&self, oid: &str) -> impl Future<Output = Result<SnmpValue>> + Send;

    /// Every (oid, value) row under `oid`, in agent order.
    fn walk(&self, oid: &str) -> impl Future<Output = Result<Vec<(String, SnmpValue)>>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens sessions against a target.
pub trait Connector: Send + Sync {
    type Session: Session + 'static;

    fn connect(&self, target: &SnmpTarget)
        -> impl Future<Output = Result<Self::Session>> + Send;
}

fn parse_arcs(oid: &str) -> Option<Vec<u32>> {
    oid.trim_start_matches('.')
        .split('.')
        .map(|arc| arc.parse().ok())
        .collect()
}

/// Position of a subtree walk. Rows must stay under the root and arrive in
/// strictly increasing OID order.
#[derive(Debug)]
pub struct SubtreeCursor {
    root: Vec<u32>,
    last: Vec<u32>,
}

impl SubtreeCursor {
    pub fn new(root: &str) -> std::result::Result<Self, String> {
        let root = parse_arcs(root).ok_or_else(|| format!("malformed oid {root}"))?;
        Ok(Self {
            last: root.clone(),
            root,
        })
    }

    /// `Ok(true)` when `oid` is the next row of the subtree, `Ok(false)`
    /// once the walk has left it.
    pub fn advance(&mut self, oid: &str) -> std::result::Result<bool, String> {
        let arcs = parse_arcs(oid).ok_or_else(|| format!("malformed oid {oid}"))?;
        if arcs.len() <= self.root.len() || !arcs.starts_with(&self.root) {
            return Ok(false);
        }
        if arcs <= self.last {
            return Err(format!("agent returned {oid} out of order"));
        }
        self.last = arcs;
        Ok(true)
    }
}

/// SNMP session backed by an `async_snmp` client.
pub struct UdpSession {
    client: Option<UdpClient>,
}

impl std::fmt::Debug for UdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSession")
            .field("open", &self.client.is_some())
            .finish()
    }
}

impl UdpSession {
    fn client(&self) -> Result<&UdpClient> {
        self.client
            .as_ref()
            .ok_or_else(|| GatewayError::Connection("session is closed".to_string()))
    }
}

impl Session for UdpSession {
    async fn get(&self, oid: &str) -> Result<SnmpValue> {
        let read_error = |reason: String| GatewayError::AttributeRead {
            oid: oid.to_string(),
            reason,
        };
        let client = self.client()?;
        let target = Oid::parse(oid.trim_start_matches('.'))
            .map_err(|e| read_error(e.to_string()))?;
        let varbind = client
            .get(&target)
            .await
            .map_err(|e| read_error(e.to_string()))?;
        match SnmpValue::from(varbind.value) {
            value if value.is_exception() => Err(read_error("no such object".to_string())),
            value => Ok(value),
        }
    }

    async fn walk(&self, oid: &str) -> Result<Vec<(String, SnmpValue)>> {
        let root = oid.trim_start_matches('.');
        let walk_error = |reason: String| GatewayError::TableWalk {
            oid: root.to_string(),
            reason,
        };
        let client = self.client()?;
        let mut cursor = SubtreeCursor::new(root).map_err(walk_error)?;
        let start = Oid::parse(root).map_err(|e| walk_error(e.to_string()))?;
        let walk = client.walk(start).map_err(|e| walk_error(e.to_string()))?;
        let mut walk = std::pin::pin!(walk);

        let mut rows = Vec::new();
        while let Some(next) = walk.next().await {
            let varbind = next.map_err(|e| walk_error(e.to_string()))?;
            let next_oid = varbind.oid.to_string();
            if !cursor.advance(&next_oid).map_err(walk_error)? {
                break;
            }
            let value = SnmpValue::from(varbind.value);
            if value == SnmpValue::EndOfMibView {
                break;
            }
            rows.push((next_oid, value));
        }

        debug!(oid = root, rows = rows.len(), "walk complete");
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// Opens [`UdpSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    type Session = UdpSession;

    async fn connect(&self, target: &SnmpTarget) -> Result<UdpSession> {
        let client = Client::builder(target.address(), Auth::v2c(target.community.as_str()))
            .timeout(target.timeout)
            .retries(0)
            .connect()
            .await
            .map_err(|e| GatewayError::Connection(format!("{}: {e}", target.host)))?;
        Ok(UdpSession {
            client: Some(client),
        })
    }
}
