//! HTTP routes over the driver, pool, cache and telnet client.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::cache_key;
use crate::driver::{driver_for, C320Driver, OltDriver};
use crate::error::{GatewayError, Result};
use crate::models::{
    BoardStatus, EmptySlot, InterfaceStats, PonPortStats, PoolStats, SystemInfo, TerminalDetail,
    TerminalSummary,
};
use crate::pool::Deadline;
use crate::snmp::Connector;
use crate::state::AppState;
use crate::telnet::TelnetClient;

const MAX_CLI_COMMANDS: usize = 32;

/// Body of every successful response.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub status: String,
    pub data: T,
}

type ApiResult<T> = Result<Json<Envelope<T>>>;

fn ok<T>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        code: 200,
        status: "OK".to_string(),
        data,
    })
}

#[derive(Debug, Deserialize)]
pub struct CliRequest {
    pub commands: Vec<String>,
}

/// Rejects ids outside the configured model before a session is opened.
fn check_location<C>(
    state: &AppState<C>,
    board: u32,
    pon: Option<u32>,
    onu: Option<u32>,
) -> Result<()>
where
    C: Connector + Clone,
{
    let driver = driver_for(
        state.config.olt_model,
        state.connector.clone(),
        state.target.clone(),
    )?;
    if !driver.validate_board_id(board) {
        return Err(GatewayError::Validation(format!("invalid board id {board}")));
    }
    if let Some(pon) = pon.filter(|&pon| !driver.validate_pon_id(pon)) {
        return Err(GatewayError::Validation(format!("invalid pon id {pon}")));
    }
    if let Some(onu) = onu.filter(|&onu| !driver.validate_onu_id(onu)) {
        return Err(GatewayError::Validation(format!("invalid onu id {onu}")));
    }
    Ok(())
}

/// Serves `key` from the cache, otherwise runs `work` through the pool
/// under the request deadline and caches a successful result.
async fn read_through<C, T, F>(state: &AppState<C>, key: String, work: F) -> Result<T>
where
    C: Connector + Clone,
    T: Serialize + DeserializeOwned + Send,
    F: for<'a> FnOnce(&'a C320Driver<C>, CancellationToken) -> BoxFuture<'a, Result<T>> + Send,
{
    if let Some(hit) = state.cache.get::<T>(&key).await {
        return Ok(hit);
    }

    let deadline = Deadline::after(state.config.request_timeout);
    let reads = deadline.token().clone();
    let result = state
        .pool
        .query(deadline.token(), &state.connector, &state.target, move |driver| {
            work(driver, reads)
        })
        .await;

    match &result {
        Ok(value) => state.cache.put(key, value).await,
        Err(e) => warn!(key, error = %e, "device read failed"),
    }
    result
}

/// GET /health - Liveness probe.
pub async fn health() -> Json<Envelope<&'static str>> {
    ok("healthy")
}

/// GET /api/v1/system - Generic system group.
pub async fn system_info<C>(State(state): State<Arc<AppState<C>>>) -> ApiResult<SystemInfo>
where
    C: Connector + Clone + 'static,
{
    let key = cache_key("system", &state.target.host, &[]);
    let info = read_through(&state, key, |driver, cancel| {
        Box::pin(async move { driver.system_info(&cancel).await })
    })
    .await?;
    Ok(ok(info))
}

/// GET /api/v1/boards - Every installed board.
pub async fn boards<C>(State(state): State<Arc<AppState<C>>>) -> ApiResult<Vec<BoardStatus>>
where
    C: Connector + Clone + 'static,
{
    let key = cache_key("boards", &state.target.host, &[]);
    let boards = read_through(&state, key, |driver, cancel| {
        Box::pin(async move { driver.all_boards(&cancel).await })
    })
    .await?;
    Ok(ok(boards))
}

/// GET /api/v1/boards/{board}
pub async fn board<C>(
    State(state): State<Arc<AppState<C>>>,
    Path(board): Path<u32>,
) -> ApiResult<BoardStatus>
where
    C: Connector + Clone + 'static,
{
    check_location(&state, board, None, None)?;
    let key = cache_key("board", &state.target.host, &[board]);
    let status = read_through(&state, key, move |driver, cancel| {
        Box::pin(async move { driver.board_info(&cancel, board).await })
    })
    .await?;
    Ok(ok(status))
}

/// GET /api/v1/board/{board}/pon/{pon} - Terminals on a PON port.
pub async fn onu_list<C>(
    State(state): State<Arc<AppState<C>>>,
    Path((board, pon)): Path<(u32, u32)>,
) -> ApiResult<Vec<TerminalSummary>>
where
    C: Connector + Clone + 'static,
{
    check_location(&state, board, Some(pon), None)?;
    let key = cache_key("onu_list", &state.target.host, &[board, pon]);
    let terminals = read_through(&state, key, move |driver, cancel| {
        Box::pin(async move { driver.list_terminals(&cancel, board, pon).await })
    })
    .await?;
    Ok(ok(terminals))
}

/// GET /api/v1/board/{board}/pon/{pon}/onu/{onu}
pub async fn onu_detail<C>(
    State(state): State<Arc<AppState<C>>>,
    Path((board, pon, onu)): Path<(u32, u32, u32)>,
) -> ApiResult<TerminalDetail>
where
    C: Connector + Clone + 'static,
{
    check_location(&state, board, Some(pon), Some(onu))?;
    let key = cache_key("onu_detail", &state.target.host, &[board, pon, onu]);
    let detail = read_through(&state, key, move |driver, cancel| {
        Box::pin(async move { driver.terminal_detail(&cancel, board, pon, onu).await })
    })
    .await?;
    Ok(ok(detail))
}

/// GET /api/v1/board/{board}/pon/{pon}/empty - Free terminal ids.
pub async fn empty_slots<C>(
    State(state): State<Arc<AppState<C>>>,
    Path((board, pon)): Path<(u32, u32)>,
) -> ApiResult<Vec<EmptySlot>>
where
    C: Connector + Clone + 'static,
{
    check_location(&state, board, Some(pon), None)?;
    let key = cache_key("onu_empty", &state.target.host, &[board, pon]);
    let slots = read_through(&state, key, move |driver, cancel| {
        Box::pin(async move { driver.empty_slots(&cancel, board, pon).await })
    })
    .await?;
    Ok(ok(slots))
}

/// GET /api/v1/board/{board}/pon/{pon}/stats - Port optical levels.
pub async fn pon_stats<C>(
    State(state): State<Arc<AppState<C>>>,
    Path((board, pon)): Path<(u32, u32)>,
) -> ApiResult<PonPortStats>
where
    C: Connector + Clone + 'static,
{
    check_location(&state, board, Some(pon), None)?;
    let key = cache_key("pon_stats", &state.target.host, &[board, pon]);
    let stats = read_through(&state, key, move |driver, cancel| {
        Box::pin(async move { driver.pon_port_stats(&cancel, board, pon).await })
    })
    .await?;
    Ok(ok(stats))
}

/// GET /api/v1/interfaces
pub async fn interfaces<C>(State(state): State<Arc<AppState<C>>>) -> ApiResult<Vec<InterfaceStats>>
where
    C: Connector + Clone + 'static,
{
    let key = cache_key("interfaces", &state.target.host, &[]);
    let rows = read_through(&state, key, |driver, cancel| {
        Box::pin(async move { driver.interface_stats(&cancel).await })
    })
    .await?;
    Ok(ok(rows))
}

/// GET /api/v1/pool - Session slot usage.
pub async fn pool_stats<C>(State(state): State<Arc<AppState<C>>>) -> Json<Envelope<PoolStats>>
where
    C: Connector + Clone + 'static,
{
    ok(state.pool.stats())
}

/// POST /api/v1/cli - Runs shell commands over the telnet session.
pub async fn run_cli<C>(
    State(state): State<Arc<AppState<C>>>,
    Json(request): Json<CliRequest>,
) -> ApiResult<IndexMap<String, String>>
where
    C: Connector + Clone + 'static,
{
    let commands: Vec<String> = request
        .commands
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if commands.is_empty() {
        return Err(GatewayError::Validation("no commands given".to_string()));
    }
    if commands.len() > MAX_CLI_COMMANDS {
        return Err(GatewayError::Validation(format!(
            "at most {MAX_CLI_COMMANDS} commands per request"
        )));
    }

    let deadline = Deadline::after(state.config.request_timeout);
    let mut slot = state.telnet.lock().await;
    if !slot.as_ref().is_some_and(TelnetClient::is_connected) {
        let mut client = TelnetClient::new(state.config.telnet.clone());
        client.connect().await?;
        info!(host = %state.config.telnet.host, "telnet session opened");
        *slot = Some(client);
    }
    let client = slot
        .as_mut()
        .ok_or_else(|| GatewayError::Connection("telnet session unavailable".to_string()))?;
    let result = client.execute_multiple(deadline.token(), &commands).await;
    if !client.is_connected() {
        *slot = None;
    }
    Ok(ok(result?))
}

/// Create all API routes with state
pub fn create_routes<C>(state: Arc<AppState<C>>) -> Router
where
    C: Connector + Clone + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/system", get(system_info::<C>))
        .route("/api/v1/boards", get(boards::<C>))
        .route("/api/v1/boards/{board}", get(board::<C>))
        .route("/api/v1/board/{board}/pon/{pon}", get(onu_list::<C>))
        .route(
            "/api/v1/board/{board}/pon/{pon}/onu/{onu}",
            get(onu_detail::<C>),
        )
        .route("/api/v1/board/{board}/pon/{pon}/empty", get(empty_slots::<C>))
        .route("/api/v1/board/{board}/pon/{pon}/stats", get(pon_stats::<C>))
        .route("/api/v1/interfaces", get(interfaces::<C>))
        .route("/api/v1/pool", get(pool_stats::<C>))
        .route("/api/v1/cli", post(run_cli::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Attribute};
    use crate::snmp::SnmpValue;
    use crate::state::Config;
    use crate::telnet::SessionState;
    use crate::testing::{text, FakeConnector, FakeDevice, FakeShell};
    use axum::{body::Body, http::Request, http::StatusCode};
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn build_test_state(device: FakeDevice, vars: &[(&str, &str)]) -> Arc<AppState<FakeConnector>> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        });
        Arc::new(AppState::new(config, FakeConnector::new(device)))
    }

    fn populated_port() -> FakeDevice {
        let set = codec::compute_address_set(1, 2).unwrap();
        FakeDevice::default()
            .with_table(
                set.name.clone(),
                vec![
                    (set.oid(Attribute::Name, 1), text("cust-one")),
                    (set.oid(Attribute::Name, 4), text("cust-four")),
                ],
            )
            .with_value(set.oid(Attribute::Serial, 4), text("1,ZTEGC0000004"))
            .with_value(set.oid(Attribute::Status, 4), SnmpValue::Integer(4))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_cli(app: Router, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri("/api/v1/cli")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    mod read_route_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_ok() {
            let app = create_routes(build_test_state(FakeDevice::default(), &[]));
            let (status, body) = get_json(app, "/health").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["code"], 200);
            assert_eq!(body["data"], "healthy");
        }

        #[tokio::test]
        async fn test_onu_list_in_envelope() {
            let app = create_routes(build_test_state(populated_port(), &[]));
            let (status, body) = get_json(app, "/api/v1/board/1/pon/2").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "OK");
            let rows = body["data"].as_array().unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[1]["onu_id"], 4);
            assert_eq!(rows[1]["serial_number"], "ZTEGC0000004");
            assert_eq!(rows[1]["status"], "Online");
            assert_eq!(rows[0]["rx_power"], "0.00");
        }

        #[tokio::test]
        async fn test_repeated_read_served_from_cache() {
            let state = build_test_state(populated_port(), &[]);
            let connector = state.connector.clone();
            let app = create_routes(state);

            let (first, _) = get_json(app.clone(), "/api/v1/board/1/pon/2/empty").await;
            let (second, body) = get_json(app, "/api/v1/board/1/pon/2/empty").await;
            assert_eq!(first, StatusCode::OK);
            assert_eq!(second, StatusCode::OK);
            assert_eq!(body["data"].as_array().unwrap().len(), 126);
            assert_eq!(connector.opened(), 1);
        }

        #[tokio::test]
        async fn test_zero_ttl_reads_every_time() {
            let state = build_test_state(populated_port(), &[("CACHE_TTL_SECS", "0")]);
            let connector = state.connector.clone();
            let app = create_routes(state);
            get_json(app.clone(), "/api/v1/board/1/pon/2").await;
            get_json(app, "/api/v1/board/1/pon/2").await;
            assert_eq!(connector.opened(), 2);
        }

        #[tokio::test]
        async fn test_out_of_range_is_bad_request() {
            let state = build_test_state(populated_port(), &[]);
            let connector = state.connector.clone();
            let app = create_routes(state);
            let (status, body) = get_json(app.clone(), "/api/v1/board/3/pon/1").await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], 400);
            let (status, _) = get_json(app, "/api/v1/board/1/pon/2/onu/129").await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(connector.opened(), 0);
        }

        #[tokio::test]
        async fn test_walk_failure_is_bad_gateway() {
            let set = codec::compute_address_set(1, 2).unwrap();
            let mut device = populated_port();
            device.failing_tables.insert(set.name);
            let app = create_routes(build_test_state(device, &[]));
            let (status, body) = get_json(app, "/api/v1/board/1/pon/2").await;
            assert_eq!(status, StatusCode::BAD_GATEWAY);
            assert!(body["data"]["error"]
                .as_str()
                .unwrap()
                .starts_with("table walk failed"));
        }

        #[tokio::test]
        async fn test_model_without_driver_is_not_implemented() {
            let app = create_routes(build_test_state(populated_port(), &[("OLT_MODEL", "C600")]));
            let (status, _) = get_json(app, "/api/v1/system").await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        }

        #[tokio::test]
        async fn test_pool_stats() {
            let app = create_routes(build_test_state(FakeDevice::default(), &[("POOL_MAX", "4")]));
            let (status, body) = get_json(app, "/api/v1/pool").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["max"], 4);
            assert_eq!(body["data"]["available"], 4);
        }
    }

    mod cli_route_tests {
        use super::*;

        #[tokio::test]
        async fn test_empty_command_list_rejected() {
            let app = create_routes(build_test_state(FakeDevice::default(), &[]));
            let (status, _) = post_cli(app, serde_json::json!({ "commands": ["  "] })).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        #[tokio::test(start_paused = true)]
        async fn test_commands_run_on_open_session() {
            let state = build_test_state(FakeDevice::default(), &[]);
            let (transport, mut shell) = FakeShell::pair();
            let device = tokio::spawn(async move {
                shell.accept_login().await;
                assert_eq!(shell.hear().await, "show card");
                shell
                    .say("show card\r\n1  1  GTGO  INSERVICE\r\nZXAN#")
                    .await;
                shell
            });

            let mut client = TelnetClient::new(state.config.telnet.clone());
            client.connect_with(transport).await.unwrap();
            *state.telnet.lock().await = Some(client);

            let app = create_routes(Arc::clone(&state));
            let (status, body) =
                post_cli(app, serde_json::json!({ "commands": ["show card"] })).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["show card"], "1  1  GTGO  INSERVICE");

            let telnet = state.telnet.lock().await;
            assert_eq!(
                telnet.as_ref().map(TelnetClient::state),
                Some(SessionState::InEnableMode)
            );
            drop(telnet);
            device.await.unwrap();
        }
    }
}
