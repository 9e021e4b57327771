//! In-memory SNMP agent and telnet shell shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{
    split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

use crate::error::{GatewayError, Result};
use crate::snmp::{Connector, Session, SnmpTarget, SnmpValue};
use crate::telnet::Transport;

/// Contents and failure switches of a simulated device.
#[derive(Debug, Default)]
pub struct FakeDevice {
    pub values: HashMap<String, SnmpValue>,
    pub tables: HashMap<String, Vec<(String, SnmpValue)>>,
    pub failing_tables: HashSet<String>,
    pub refuse_connect: bool,
    /// How long each read takes, so concurrent sessions overlap.
    pub latency: Duration,
}

impl FakeDevice {
    pub fn with_value(mut self, oid: impl Into<String>, value: SnmpValue) -> Self {
        self.values.insert(oid.into(), value);
        self
    }

    pub fn with_table(mut self, root: impl Into<String>, rows: Vec<(String, SnmpValue)>) -> Self {
        self.tables.insert(root.into(), rows);
        self
    }
}

/// Bookkeeping of every session the connector handed out.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub open_now: AtomicUsize,
    pub peak_open: AtomicUsize,
    pub reads: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    pub device: Arc<FakeDevice>,
    pub counters: Arc<SessionCounters>,
    /// OIDs requested through `get`, in order.
    pub requested: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn new(device: FakeDevice) -> Self {
        Self {
            device: Arc::new(device),
            counters: Arc::new(SessionCounters::default()),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Point reads issued across every session.
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

pub struct FakeSession {
    connector: FakeConnector,
    open: bool,
}

impl Session for FakeSession {
    async fn get(&self, oid: &str) -> Result<SnmpValue> {
        let device = &self.connector.device;
        self.connector.counters.reads.fetch_add(1, Ordering::SeqCst);
        self.connector
            .requested
            .lock()
            .unwrap()
            .push(oid.to_string());
        if !device.latency.is_zero() {
            tokio::time::sleep(device.latency).await;
        }
        device
            .values
            .get(oid)
            .cloned()
            .ok_or_else(|| GatewayError::AttributeRead {
                oid: oid.to_string(),
                reason: "no such object".to_string(),
            })
    }

    async fn walk(&self, oid: &str) -> Result<Vec<(String, SnmpValue)>> {
        let device = &self.connector.device;
        if device.failing_tables.contains(oid) {
            return Err(GatewayError::TableWalk {
                oid: oid.to_string(),
                reason: "request timed out".to_string(),
            });
        }
        Ok(device.tables.get(oid).cloned().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            let counters = &self.connector.counters;
            counters.closed.fetch_add(1, Ordering::SeqCst);
            counters.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, target: &SnmpTarget) -> Result<FakeSession> {
        if self.device.refuse_connect {
            return Err(GatewayError::Connection(format!(
                "{}: connection refused",
                target.host
            )));
        }
        let counters = &self.counters;
        counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_open.fetch_max(now, Ordering::SeqCst);
        Ok(FakeSession {
            connector: self.clone(),
            open: true,
        })
    }
}

pub fn target() -> SnmpTarget {
    SnmpTarget {
        host: "192.0.2.10".to_string(),
        port: 161,
        community: "public".to_string(),
        timeout: Duration::from_secs(1),
    }
}

pub fn text(s: &str) -> SnmpValue {
    SnmpValue::OctetString(s.as_bytes().to_vec())
}

/// Device side of an in-memory telnet shell.
pub struct FakeShell {
    pub reader: BufReader<ReadHalf<DuplexStream>>,
    pub writer: WriteHalf<DuplexStream>,
}

impl FakeShell {
    /// A client transport wired to a fresh shell.
    pub fn pair() -> (Box<dyn Transport>, FakeShell) {
        let (client_end, device_end) = tokio::io::duplex(8192);
        let (read, writer) = split(device_end);
        let shell = FakeShell {
            reader: BufReader::new(read),
            writer,
        };
        (Box::new(client_end), shell)
    }

    pub async fn say(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    /// Next line the client sent, without its line ending.
    pub async fn hear(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Walks the client through username, password and enable with the
    /// default credentials.
    pub async fn accept_login(&mut self) {
        self.say("\r\nUsername:").await;
        assert_eq!(self.hear().await, "zte");
        self.say("Password:").await;
        assert_eq!(self.hear().await, "zte");
        self.say("\r\nZXAN>").await;
        assert_eq!(self.hear().await, "enable");
        self.say("Password:").await;
        assert_eq!(self.hear().await, "zxr10");
        self.say("\r\nZXAN#").await;
    }
}
