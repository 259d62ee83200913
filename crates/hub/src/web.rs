use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::db::{AirRow, Db, WaterRow};
use crate::dispatch::{self, Toggled};
use crate::error::HubError;
use crate::flags::{SystemFlag, SystemFlags};
use crate::mqtt::{SharedTransport, Topics};
use crate::state::{Device, SharedState};

const INDEX_HTML: &str = include_str!("ui/index.html");
const RECORDS_HTML: &str = include_str!("ui/records.html");

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
    pub topics: Arc<Topics>,
    pub transport: SharedTransport,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/records", get(records_page))
        .route("/api/environment", get(api_environment))
        .route("/api/records", get(api_records))
        .route("/api/status", get(api_status))
        .route("/api/devices/{device}/toggle", post(api_toggle_device))
        .route("/api/system/{flag}/toggle", post(api_toggle_flag))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn records_page() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], RECORDS_HTML)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    Hub(HubError),
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        ApiError::Hub(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Hub(e) => {
                let status = match e {
                    HubError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                    HubError::Transport(_) => StatusCode::BAD_GATEWAY,
                    HubError::ParseFailure(_) => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Latest environment
// ---------------------------------------------------------------------------

/// Latest stored air and water rows merged into one object.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Environment {
    #[serde(with = "time::serde::rfc3339::option")]
    time: Option<OffsetDateTime>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    co2: Option<f64>,
    water_temp: Option<f64>,
    ph: Option<f64>,
    ec: Option<f64>,
}

impl Environment {
    fn from_rows(air: Option<AirRow>, water: Option<WaterRow>) -> Self {
        let time = air
            .map(|a| a.ts)
            .max(water.map(|w| w.ts))
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
        Self {
            time,
            temperature: air.map(|a| a.temperature),
            humidity: air.map(|a| a.humidity),
            co2: air.map(|a| a.co2),
            water_temp: water.map(|w| w.watertemperature),
            ph: water.map(|w| w.ph),
            ec: water.map(|w| w.ec),
        }
    }

    /// Served when the latest-row query itself fails.
    fn fallback(now: OffsetDateTime) -> Self {
        Self {
            time: Some(now),
            temperature: Some(0.0),
            humidity: Some(0.0),
            co2: Some(0.0),
            water_temp: Some(0.0),
            ph: Some(0.0),
            ec: Some(0.0),
        }
    }
}

async fn api_environment(State(app): State<AppState>) -> Response {
    if let Err(e) = app.db.ping().await {
        error!("environment: {e:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Database connection failed" })),
        )
            .into_response();
    }

    let env = match tokio::try_join!(app.db.latest_air(), app.db.latest_water()) {
        Ok((air, water)) => Environment::from_rows(air, water),
        Err(e) => {
            warn!("environment query failed, serving fallback: {e:#}");
            Environment::fallback(OffsetDateTime::now_utc())
        }
    };
    Json(vec![env]).into_response()
}

// ---------------------------------------------------------------------------
// History records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Air,
    Water,
}

impl RecordKind {
    /// Missing means air; any value other than "air" means water.
    fn parse(s: Option<&str>) -> Self {
        match s {
            None | Some("air") => RecordKind::Air,
            Some(_) => RecordKind::Water,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordsQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    page: Option<String>,
    limit: Option<String>,
}

fn positive_or(s: Option<&str>, default: i64) -> i64 {
    s.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

#[derive(Debug, Serialize)]
struct AirRecord {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    temperature: f64,
    humidity: f64,
    co2: f64,
}

#[derive(Debug, Serialize)]
struct WaterRecord {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    temperature: f64,
    ph: f64,
    ec: f64,
}

fn ts_to_time(ts: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(ts).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl From<AirRow> for AirRecord {
    fn from(r: AirRow) -> Self {
        Self {
            timestamp: ts_to_time(r.ts),
            temperature: r.temperature,
            humidity: r.humidity,
            co2: r.co2,
        }
    }
}

impl From<WaterRow> for WaterRecord {
    fn from(r: WaterRow) -> Self {
        Self {
            timestamp: ts_to_time(r.ts),
            temperature: r.watertemperature,
            ph: r.ph,
            ec: r.ec,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Records {
    Air(Vec<AirRecord>),
    Water(Vec<WaterRecord>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: i64,
    limit: i64,
    total: i64,
    total_pages: i64,
}

#[derive(Debug, Serialize)]
struct RecordsResponse {
    records: Records,
    pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<serde_json::Value>,
}

async fn fetch_records(
    db: &Db,
    kind: RecordKind,
    limit: i64,
    offset: i64,
) -> anyhow::Result<(Records, i64)> {
    match kind {
        RecordKind::Air => {
            let rows = db.air_records(limit, offset).await?;
            let total = db.count_air().await?;
            Ok((Records::Air(rows.into_iter().map(Into::into).collect()), total))
        }
        RecordKind::Water => {
            let rows = db.water_records(limit, offset).await?;
            let total = db.count_water().await?;
            Ok((Records::Water(rows.into_iter().map(Into::into).collect()), total))
        }
    }
}

async fn api_records(
    State(app): State<AppState>,
    Query(q): Query<RecordsQuery>,
) -> Json<RecordsResponse> {
    let kind = RecordKind::parse(q.kind.as_deref());
    let page = positive_or(q.page.as_deref(), DEFAULT_PAGE);
    let limit = positive_or(q.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = (page - 1).saturating_mul(limit);

    match fetch_records(&app.db, kind, limit, offset).await {
        Ok((records, total)) => Json(RecordsResponse {
            records,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages: (total + limit - 1) / limit,
            },
            error: None,
        }),
        Err(e) => {
            error!(?kind, "records query failed: {e:#}");
            let records = match kind {
                RecordKind::Air => Records::Air(Vec::new()),
                RecordKind::Water => Records::Water(Vec::new()),
            };
            Json(RecordsResponse {
                records,
                pagination: Pagination {
                    page,
                    limit,
                    total: 0,
                    total_pages: 0,
                },
                error: Some(json!({ "message": format!("{e:#}") })),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn api_toggle_device(
    State(app): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<Toggled>, ApiError> {
    let device: Device = device.parse().map_err(ApiError::NotFound)?;
    let toggled = dispatch::toggle(&app.shared, app.transport.as_ref(), &app.topics, device).await?;
    if toggled.recovery_cleared {
        app.db.mirror_system_flags(toggled.flags).await;
    }
    Ok(Json(toggled))
}

async fn api_toggle_flag(
    State(app): State<AppState>,
    Path(flag): Path<String>,
) -> Result<Json<SystemFlags>, ApiError> {
    let flag: SystemFlag = flag.parse().map_err(ApiError::NotFound)?;
    let flags = dispatch::toggle_flag(&app.shared, flag).await;
    app.db.mirror_system_flags(flags).await;
    Ok(Json(flags))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve the dashboard. With the `tls` feature and both `TLS_CERT` and
/// `TLS_KEY` set, HTTPS is served instead of plain HTTP.
pub async fn serve(app: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    #[cfg(feature = "tls")]
    {
        if let (Ok(cert), Ok(key)) = (std::env::var("TLS_CERT"), std::env::var("TLS_KEY")) {
            let config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .with_context(|| format!("failed to load tls cert={cert} key={key}"))?;
            info!("web ui listening on https://{addr}");
            axum_server::bind_rustls(addr, config)
                .serve(router(app).into_make_service())
                .await
                .context("web server error")?;
            return Ok(());
        }
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web ui listening on http://{addr}");

    axum::serve(listener, router(app))
        .await
        .context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::RecordingTransport;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn test_app(transport: Arc<RecordingTransport>) -> AppState {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        AppState {
            shared: SystemState::shared(),
            db,
            topics: Arc::new(Topics::new("FarmSmart")),
            transport,
        }
    }

    async fn send(app: &AppState, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = router(app.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    // -- Pages --------------------------------------------------------------

    #[tokio::test]
    async fn pages_are_served_as_html() {
        let app = test_app(Arc::default()).await;
        for uri in ["/", "/records"] {
            let resp = router(app.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let ct = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
            assert!(ct.starts_with("text/html"), "{uri}: {ct}");
        }
    }

    #[tokio::test]
    async fn dashboard_seeds_tiles_from_stored_environment() {
        let app = test_app(Arc::default()).await;
        let resp = router(app)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("fetch(\"/api/environment\")"));
        assert!(html.contains("fetch(\"/api/status\")"));
        // Every stored field the page reads is one the endpoint serves.
        for field in ["\"temperature\"", "\"humidity\"", "\"co2\"", "\"waterTemp\"", "\"ph\"", "\"ec\""] {
            assert!(html.contains(field), "{field}");
        }
    }

    // -- Environment --------------------------------------------------------

    #[tokio::test]
    async fn environment_with_no_rows_is_all_null() {
        let app = test_app(Arc::default()).await;
        let (status, body) = send(&app, "GET", "/api/environment").await;
        assert_eq!(status, StatusCode::OK);
        let env = &body[0];
        assert!(env["time"].is_null());
        assert!(env["temperature"].is_null());
        assert!(env["waterTemp"].is_null());
    }

    #[tokio::test]
    async fn environment_merges_latest_rows() {
        let app = test_app(Arc::default()).await;
        app.db.insert_air(100, 20.0, 50.0, 700.0).await.unwrap();
        app.db.insert_air(200, 24.5, 55.0, 812.0).await.unwrap();
        app.db.insert_water(150, 23.5, 7.42, 1200.0).await.unwrap();

        let (status, body) = send(&app, "GET", "/api/environment").await;
        assert_eq!(status, StatusCode::OK);
        let env = &body[0];
        assert_eq!(env["temperature"], 24.5);
        assert_eq!(env["co2"], 812.0);
        assert_eq!(env["waterTemp"], 23.5);
        assert_eq!(env["ph"], 7.42);
        assert_eq!(env["time"], "1970-01-01T00:03:20Z");
    }

    #[tokio::test]
    async fn environment_query_error_serves_zero_fallback() {
        let app = test_app(Arc::default()).await;
        sqlx::query("DROP TABLE airenvtbl")
            .execute(app.db.pool())
            .await
            .unwrap();

        let (status, body) = send(&app, "GET", "/api/environment").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["temperature"], 0.0);
        assert_eq!(body[0]["ec"], 0.0);
        assert!(body[0]["time"].is_string());
    }

    #[tokio::test]
    async fn environment_closed_pool_is_500() {
        let app = test_app(Arc::default()).await;
        app.db.pool().close().await;

        let (status, body) = send(&app, "GET", "/api/environment").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database connection failed");
    }

    // -- Records ------------------------------------------------------------

    #[tokio::test]
    async fn records_default_to_air_first_page() {
        let app = test_app(Arc::default()).await;
        for ts in 1..=3 {
            app.db.insert_air(ts, 20.0, 50.0, 800.0).await.unwrap();
        }

        let (status, body) = send(&app, "GET", "/api/records").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"].as_array().unwrap().len(), 3);
        assert_eq!(body["records"][0]["timestamp"], "1970-01-01T00:00:03Z");
        assert_eq!(body["records"][0]["co2"], 800.0);
        assert_eq!(body["pagination"]["page"], 1);
        assert_eq!(body["pagination"]["limit"], 100);
        assert_eq!(body["pagination"]["total"], 3);
        assert_eq!(body["pagination"]["totalPages"], 1);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn water_records_alias_temperature_and_paginate() {
        let app = test_app(Arc::default()).await;
        for ts in 1..=5 {
            app.db
                .insert_water(ts, 20.0 + ts as f64, 7.0, 1100.0)
                .await
                .unwrap();
        }

        let (_, body) = send(&app, "GET", "/api/records?type=water&page=2&limit=2").await;
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["temperature"], 23.0);
        assert!(records[0].get("watertemperature").is_none());
        assert_eq!(body["pagination"]["total"], 5);
        assert_eq!(body["pagination"]["totalPages"], 3);
    }

    #[tokio::test]
    async fn bad_paging_values_fall_back_to_defaults() {
        let app = test_app(Arc::default()).await;
        app.db.insert_water(7, 21.5, 6.9, 1000.0).await.unwrap();

        let (_, body) = send(&app, "GET", "/api/records?page=-3&limit=abc&type=soil").await;
        assert_eq!(body["pagination"]["page"], 1);
        assert_eq!(body["pagination"]["limit"], 100);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["pagination"]["totalPages"], 1);
        assert_eq!(body["records"][0]["temperature"], 21.5);
    }

    #[tokio::test]
    async fn record_type_other_than_air_reads_water_table() {
        let app = test_app(Arc::default()).await;
        app.db.insert_air(1, 20.0, 50.0, 800.0).await.unwrap();
        app.db.insert_water(2, 22.0, 7.1, 1100.0).await.unwrap();
        app.db.insert_water(3, 22.5, 7.2, 1150.0).await.unwrap();

        for query in ["type=water", "type=WATER2", "type=", "type=Air"] {
            let (_, body) = send(&app, "GET", &format!("/api/records?{query}")).await;
            assert_eq!(body["pagination"]["total"], 2, "{query}");
            assert!(body["records"][0].get("ph").is_some(), "{query}");
        }

        let (_, body) = send(&app, "GET", "/api/records?type=air").await;
        assert_eq!(body["pagination"]["total"], 1);
        assert!(body["records"][0].get("humidity").is_some());
    }

    #[test]
    fn record_kind_parsing() {
        assert_eq!(RecordKind::parse(None), RecordKind::Air);
        assert_eq!(RecordKind::parse(Some("air")), RecordKind::Air);
        assert_eq!(RecordKind::parse(Some("water")), RecordKind::Water);
        assert_eq!(RecordKind::parse(Some("soil")), RecordKind::Water);
        assert_eq!(RecordKind::parse(Some("")), RecordKind::Water);
    }

    #[tokio::test]
    async fn records_query_error_reports_empty_page() {
        let app = test_app(Arc::default()).await;
        sqlx::query("DROP TABLE waterenvtbl")
            .execute(app.db.pool())
            .await
            .unwrap();

        let (status, body) = send(&app, "GET", "/api/records?type=water").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["records"].as_array().unwrap().is_empty());
        assert_eq!(body["pagination"]["total"], 0);
        assert!(body["error"]["message"].is_string());
    }

    // -- Status -------------------------------------------------------------

    #[tokio::test]
    async fn status_reports_unknown_sensors_as_null() {
        let app = test_app(Arc::default()).await;
        let (status, body) = send(&app, "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mqtt_connected"], false);
        assert!(body["sensors"]["ph"]["value"].is_null());
        assert_eq!(body["sensors"]["ph"]["display"], "--");
        assert_eq!(body["devices"]["up_motor"]["on"], false);
    }

    // -- Commands -----------------------------------------------------------

    #[tokio::test]
    async fn device_toggle_while_disconnected_is_503() {
        let tx = Arc::new(RecordingTransport::default());
        let app = test_app(tx.clone()).await;

        let (status, body) = send(&app, "POST", "/api/devices/aquarium_light/toggle").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
        assert!(tx.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_toggle_publishes_command() {
        let tx = Arc::new(RecordingTransport::default());
        let app = test_app(tx.clone()).await;
        app.shared.write().await.mqtt_connected = true;

        let (status, body) = send(&app, "POST", "/api/devices/plantLight2/toggle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["on"], true);
        assert_eq!(tx.published_to("FarmSmart/plantLight2/sub"), vec!["1"]);
    }

    #[tokio::test]
    async fn device_toggle_transport_failure_is_502() {
        let tx = Arc::new(RecordingTransport::failing());
        let app = test_app(tx).await;
        app.shared.write().await.mqtt_connected = true;

        let (status, _) = send(&app, "POST", "/api/devices/up_motor/toggle").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_device_is_404() {
        let app = test_app(Arc::default()).await;
        let (status, _) = send(&app, "POST", "/api/devices/sprinkler/toggle").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn motor_start_mirrors_cleared_recovery() {
        let app = test_app(Arc::default()).await;
        {
            let mut st = app.shared.write().await;
            st.mqtt_connected = true;
            st.set_flags(SystemFlags::RECOVERY);
        }

        let (status, body) = send(&app, "POST", "/api/devices/up_motor/toggle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recovery_cleared"], true);
        assert_eq!(
            app.db.load_system_flags().await.unwrap(),
            Some(SystemFlags::CLEAR)
        );
    }

    #[tokio::test]
    async fn flag_toggle_updates_state_and_mirror() {
        let app = test_app(Arc::default()).await;

        let (status, body) = send(&app, "POST", "/api/system/emergency/toggle").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["emergency"], true);
        assert_eq!(body["recovery"], false);
        assert_eq!(app.shared.read().await.flags(), SystemFlags::EMERGENCY);
        assert_eq!(
            app.db.load_system_flags().await.unwrap(),
            Some(SystemFlags::EMERGENCY)
        );
    }

    #[tokio::test]
    async fn unknown_flag_is_404() {
        let app = test_app(Arc::default()).await;
        let (status, _) = send(&app, "POST", "/api/system/maintenance/toggle").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
