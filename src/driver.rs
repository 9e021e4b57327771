//! Device driver: the read operations of an OLT, built on the codec.
//!
//! A driver owns at most one SNMP session. Every read connects lazily on
//! first use, validates ids against the model before any wire traffic, and
//! checks the caller's cancellation token before each request goes out.
//!
//! Aggregates are best-effort. When one attribute of one terminal fails to
//! read, that field keeps its default and the terminal stays in the result;
//! only a failed connect or a failed table walk aborts an operation.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{self, AddressSet, Attribute, OltModel};
use crate::error::{GatewayError, Result};
use crate::models::{
    BoardStatus, EmptySlot, InterfaceStats, ModelDescriptor, PonPortStats, SystemInfo,
    TerminalDetail, TerminalSummary,
};
use crate::snmp::{Connector, Session, SnmpTarget, SnmpValue};

/// Capability contract shared by every OLT model.
pub trait OltDriver: Send + Sync {
    fn descriptor(&self) -> ModelDescriptor;

    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    fn validate_board_id(&self, board: u32) -> bool {
        (1..=self.descriptor().max_boards).contains(&board)
    }

    fn validate_pon_id(&self, pon: u32) -> bool {
        (1..=self.descriptor().max_pon_per_board).contains(&pon)
    }

    fn validate_onu_id(&self, onu_id: u32) -> bool {
        (1..=self.descriptor().max_onu_per_pon).contains(&onu_id)
    }

    fn list_terminals(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> impl Future<Output = Result<Vec<TerminalSummary>>> + Send;

    fn terminal_detail(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
        onu_id: u32,
    ) -> impl Future<Output = Result<TerminalDetail>> + Send;

    fn empty_slots(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> impl Future<Output = Result<Vec<EmptySlot>>> + Send;

    fn system_info(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<SystemInfo>> + Send;

    fn board_info(
        &self,
        cancel: &CancellationToken,
        board: u32,
    ) -> impl Future<Output = Result<BoardStatus>> + Send;

    fn all_boards(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<BoardStatus>>> + Send;

    fn pon_port_stats(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> impl Future<Output = Result<PonPortStats>> + Send;

    fn interface_stats(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<InterfaceStats>>> + Send;
}

/// Builds the driver for `model`. Declared models without a driver are
/// rejected here.
pub fn driver_for<C>(model: OltModel, connector: C, target: SnmpTarget) -> Result<C320Driver<C>>
where
    C: Connector,
{
    match model {
        OltModel::C320 => Ok(C320Driver::new(connector, target)),
        other => Err(GatewayError::UnsupportedModel(other.to_string())),
    }
}

/// Writes a decoded value into its destination.
type Apply<'a> = Box<dyn FnOnce(&SnmpValue) + Send + 'a>;

fn decode_into<'a, T: Send>(dest: &'a mut T, decode: fn(&SnmpValue) -> T) -> Apply<'a> {
    Box::new(move |value| *dest = decode(value))
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(GatewayError::Timeout {
            waiting_for: "caller deadline".to_string(),
            partial: String::new(),
        });
    }
    Ok(())
}

/// Issues each point read and applies its decoder on success. A failed read
/// leaves its destination untouched. Returns how many reads succeeded.
async fn read_best_effort<S: Session>(
    session: &S,
    cancel: &CancellationToken,
    reads: Vec<(String, Apply<'_>)>,
) -> Result<usize> {
    let mut succeeded = 0;
    for (oid, apply) in reads {
        checkpoint(cancel)?;
        if let Ok(value) = session.get(&oid).await {
            apply(&value);
            succeeded += 1;
        }
    }
    Ok(succeeded)
}

/// Terminal ids in `1..=max` not present in `occupied`, ascending.
pub fn free_ids(occupied: &HashSet<u32>, max: u32) -> Vec<u32> {
    (1..=max).filter(|id| !occupied.contains(id)).collect()
}

/// Joins the four interface walks on their trailing index. Rows are keyed
/// by the description walk; indexes it lacks are dropped.
pub fn merge_interfaces(
    descriptions: &[(String, SnmpValue)],
    statuses: &[(String, SnmpValue)],
    rx_bytes: &[(String, SnmpValue)],
    tx_bytes: &[(String, SnmpValue)],
) -> Vec<InterfaceStats> {
    let mut merged: BTreeMap<u32, InterfaceStats> = descriptions
        .iter()
        .map(|(oid, value)| {
            let index = codec::trailing_segment(oid);
            let stats = InterfaceStats {
                index,
                description: codec::decode_text(value),
                status: "Down".to_string(),
                ..Default::default()
            };
            (index, stats)
        })
        .collect();

    for (oid, value) in statuses {
        if let Some(row) = merged.get_mut(&codec::trailing_segment(oid)) {
            row.status = codec::decode_if_status(value);
        }
    }
    for (oid, value) in rx_bytes {
        if let Some(row) = merged.get_mut(&codec::trailing_segment(oid)) {
            row.rx_bytes = codec::decode_counter(value);
        }
    }
    for (oid, value) in tx_bytes {
        if let Some(row) = merged.get_mut(&codec::trailing_segment(oid)) {
            row.tx_bytes = codec::decode_counter(value);
        }
    }

    merged.into_values().collect()
}

/// Driver for the ZTE C320.
pub struct C320Driver<C: Connector> {
    connector: C,
    target: SnmpTarget,
    session: Mutex<Option<C::Session>>,
}

impl<C: Connector> C320Driver<C> {
    pub fn new(connector: C, target: SnmpTarget) -> Self {
        Self {
            connector,
            target,
            session: Mutex::new(None),
        }
    }

    /// The open session, connecting first if there is none.
    async fn session(&self) -> Result<MappedMutexGuard<'_, C::Session>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            let session = self.connector.connect(&self.target).await?;
            debug!(host = %self.target.host, port = self.target.port, "snmp session opened");
            *guard = Some(session);
        }
        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| GatewayError::Connection("session unavailable".to_string()))
    }

    fn check_board(&self, board: u32) -> Result<()> {
        if !self.validate_board_id(board) {
            return Err(GatewayError::Validation(format!(
                "board id {board} out of range 1..={}",
                codec::C320.max_boards
            )));
        }
        Ok(())
    }

    fn check_port(&self, board: u32, pon: u32) -> Result<()> {
        self.check_board(board)?;
        if !self.validate_pon_id(pon) {
            return Err(GatewayError::Validation(format!(
                "pon id {pon} out of range 1..={}",
                codec::C320.max_pon_per_board
            )));
        }
        Ok(())
    }

    fn check_onu(&self, board: u32, pon: u32, onu_id: u32) -> Result<()> {
        self.check_port(board, pon)?;
        if !self.validate_onu_id(onu_id) {
            return Err(GatewayError::Validation(format!(
                "onu id {onu_id} out of range 1..={}",
                codec::C320.max_onu_per_pon
            )));
        }
        Ok(())
    }

    /// Ids and names of the terminals registered on a port, in walk order.
    async fn discover(
        session: &C::Session,
        cancel: &CancellationToken,
        set: &AddressSet,
    ) -> Result<Vec<(u32, String)>> {
        checkpoint(cancel)?;
        let rows = session.walk(&set.name).await?;
        Ok(rows
            .iter()
            .map(|(oid, value)| (codec::trailing_segment(oid), codec::decode_text(value)))
            .filter(|(onu_id, _)| *onu_id != 0)
            .collect())
    }

    async fn read_board(
        session: &C::Session,
        cancel: &CancellationToken,
        board: u32,
    ) -> Result<BoardStatus> {
        let mut status = BoardStatus {
            board_id: board,
            status: "Unknown".to_string(),
            ..Default::default()
        };
        let oid = |base: &str| format!("{base}.{board}");
        let answered = read_best_effort(
            session,
            cancel,
            vec![
                (
                    oid(codec::CARD_TYPE_OID),
                    decode_into(&mut status.card_type, codec::decode_text),
                ),
                (
                    oid(codec::CARD_STATUS_OID),
                    decode_into(&mut status.status, codec::decode_card_status),
                ),
                (
                    oid(codec::CARD_CPU_OID),
                    decode_into(&mut status.cpu_load, codec::decode_integer),
                ),
                (
                    oid(codec::CARD_MEMORY_OID),
                    decode_into(&mut status.memory_usage, codec::decode_integer),
                ),
            ],
        )
        .await?;

        if answered == 0 {
            return Err(GatewayError::AttributeRead {
                oid: oid(codec::CARD_TYPE_OID),
                reason: format!("board {board} did not answer"),
            });
        }
        Ok(status)
    }
}

impl<C: Connector> OltDriver for C320Driver<C> {
    fn descriptor(&self) -> ModelDescriptor {
        codec::C320
    }

    async fn connect(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        match session {
            Some(mut session) => session.close().await,
            None => Ok(()),
        }
    }

    async fn list_terminals(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> Result<Vec<TerminalSummary>> {
        self.check_port(board, pon)?;
        let set = codec::compute_address_set(board, pon)?;
        checkpoint(cancel)?;
        let session = self.session().await?;

        let discovered = Self::discover(&session, cancel, &set).await?;
        let mut terminals = Vec::with_capacity(discovered.len());
        for (onu_id, name) in discovered {
            let mut terminal = TerminalSummary::new(board, pon, onu_id);
            terminal.name = name;
            read_best_effort(
                &*session,
                cancel,
                vec![
                    (
                        set.oid(Attribute::OnuType, onu_id),
                        decode_into(&mut terminal.onu_type, codec::decode_text),
                    ),
                    (
                        set.oid(Attribute::Serial, onu_id),
                        decode_into(&mut terminal.serial_number, codec::decode_serial_value),
                    ),
                    (
                        set.oid(Attribute::RxPower, onu_id),
                        decode_into(&mut terminal.rx_power, codec::decode_power),
                    ),
                    (
                        set.oid(Attribute::Status, onu_id),
                        decode_into(&mut terminal.status, codec::decode_status),
                    ),
                ],
            )
            .await?;
            terminals.push(terminal);
        }

        debug!(board, pon, count = terminals.len(), "listed terminals");
        Ok(terminals)
    }

    async fn terminal_detail(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
        onu_id: u32,
    ) -> Result<TerminalDetail> {
        self.check_onu(board, pon, onu_id)?;
        let set = codec::compute_address_set(board, pon)?;
        checkpoint(cancel)?;
        let session = self.session().await?;

        let mut detail = TerminalDetail {
            summary: TerminalSummary::new(board, pon, onu_id),
            ..Default::default()
        };
        let summary = &mut detail.summary;
        read_best_effort(
            &*session,
            cancel,
            vec![
                (
                    set.oid(Attribute::Name, onu_id),
                    decode_into(&mut summary.name, codec::decode_text),
                ),
                (
                    set.oid(Attribute::OnuType, onu_id),
                    decode_into(&mut summary.onu_type, codec::decode_text),
                ),
                (
                    set.oid(Attribute::Serial, onu_id),
                    decode_into(&mut summary.serial_number, codec::decode_serial_value),
                ),
                (
                    set.oid(Attribute::RxPower, onu_id),
                    decode_into(&mut summary.rx_power, codec::decode_power),
                ),
                (
                    set.oid(Attribute::TxPower, onu_id),
                    decode_into(&mut summary.tx_power, codec::decode_power),
                ),
                (
                    set.oid(Attribute::Status, onu_id),
                    decode_into(&mut summary.status, codec::decode_status),
                ),
                (
                    set.oid(Attribute::Distance, onu_id),
                    decode_into(&mut summary.distance, codec::decode_distance),
                ),
                (
                    set.oid(Attribute::IpAddress, onu_id),
                    decode_into(&mut detail.ip_address, codec::decode_ip),
                ),
                (
                    set.oid(Attribute::Description, onu_id),
                    decode_into(&mut detail.description, codec::decode_text),
                ),
                (
                    set.oid(Attribute::LastOnline, onu_id),
                    decode_into(&mut detail.last_online, codec::decode_timestamp_value),
                ),
                (
                    set.oid(Attribute::LastOffline, onu_id),
                    decode_into(&mut detail.last_offline, codec::decode_timestamp_value),
                ),
                (
                    set.oid(Attribute::OfflineReason, onu_id),
                    decode_into(&mut detail.last_down_cause, codec::decode_offline_reason),
                ),
            ],
        )
        .await?;

        // Uptime mirrors last-online; no elapsed-time computation.
        if !detail.last_online.is_empty() {
            detail.uptime = detail.last_online.clone();
        }
        Ok(detail)
    }

    async fn empty_slots(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> Result<Vec<EmptySlot>> {
        self.check_port(board, pon)?;
        let set = codec::compute_address_set(board, pon)?;
        checkpoint(cancel)?;
        let session = self.session().await?;

        let occupied: HashSet<u32> = Self::discover(&session, cancel, &set)
            .await?
            .into_iter()
            .map(|(onu_id, _)| onu_id)
            .collect();

        Ok(free_ids(&occupied, codec::C320.max_onu_per_pon)
            .into_iter()
            .map(|onu_id| EmptySlot { board, pon, onu_id })
            .collect())
    }

    async fn system_info(&self, cancel: &CancellationToken) -> Result<SystemInfo> {
        checkpoint(cancel)?;
        let session = self.session().await?;
        let mut info = SystemInfo::default();
        read_best_effort(
            &*session,
            cancel,
            vec![
                (
                    codec::SYS_DESCR_OID.to_string(),
                    decode_into(&mut info.description, codec::decode_text),
                ),
                (
                    codec::SYS_UPTIME_OID.to_string(),
                    decode_into(&mut info.uptime, codec::decode_timeticks),
                ),
                (
                    codec::SYS_CONTACT_OID.to_string(),
                    decode_into(&mut info.contact, codec::decode_text),
                ),
                (
                    codec::SYS_NAME_OID.to_string(),
                    decode_into(&mut info.name, codec::decode_text),
                ),
                (
                    codec::SYS_LOCATION_OID.to_string(),
                    decode_into(&mut info.location, codec::decode_text),
                ),
            ],
        )
        .await?;
        Ok(info)
    }

    async fn board_info(&self, cancel: &CancellationToken, board: u32) -> Result<BoardStatus> {
        self.check_board(board)?;
        checkpoint(cancel)?;
        let session = self.session().await?;
        Self::read_board(&session, cancel, board).await
    }

    async fn all_boards(&self, cancel: &CancellationToken) -> Result<Vec<BoardStatus>> {
        checkpoint(cancel)?;
        let session = self.session().await?;
        let mut boards = Vec::new();
        for board in 1..=codec::C320.max_boards {
            match Self::read_board(&session, cancel, board).await {
                Ok(status) => boards.push(status),
                // Empty slot in the chassis.
                Err(GatewayError::AttributeRead { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(boards)
    }

    async fn pon_port_stats(
        &self,
        cancel: &CancellationToken,
        board: u32,
        pon: u32,
    ) -> Result<PonPortStats> {
        self.check_port(board, pon)?;
        checkpoint(cancel)?;
        let session = self.session().await?;

        let index = codec::compute_pon_index(board, pon);
        let mut stats = PonPortStats {
            board,
            pon,
            ..Default::default()
        };
        read_best_effort(
            &*session,
            cancel,
            vec![
                (
                    format!("{}.{index}", codec::PON_TX_POWER_OID),
                    decode_into(&mut stats.tx_power, codec::decode_pon_dbm),
                ),
                (
                    format!("{}.{index}", codec::PON_RX_POWER_OID),
                    decode_into(&mut stats.rx_power, codec::decode_pon_dbm),
                ),
            ],
        )
        .await?;
        Ok(stats)
    }

    async fn interface_stats(&self, cancel: &CancellationToken) -> Result<Vec<InterfaceStats>> {
        checkpoint(cancel)?;
        let session = self.session().await?;

        let mut tables = Vec::with_capacity(4);
        for root in [
            codec::IF_DESCR_OID,
            codec::IF_OPER_STATUS_OID,
            codec::IF_HC_IN_OCTETS_OID,
            codec::IF_HC_OUT_OCTETS_OID,
        ] {
            checkpoint(cancel)?;
            tables.push(session.walk(root).await?);
        }

        Ok(merge_interfaces(&tables[0], &tables[1], &tables[2], &tables[3]))
    }
}
