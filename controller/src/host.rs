use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use ledstrip_common::{
    CoreError, DeviceConfig, DeviceState, LightingSink, LightingState, MemoryStore,
    MonotonicClock, SettingsStore, StoreError,
};

use crate::api::Route;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<Controller>>,
}

struct Controller {
    device: DeviceState,
    store: FileStore,
    strip: LogStrip,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Settings kept as one JSON document, rewritten on every put.
struct FileStore {
    path: PathBuf,
    values: MemoryStore,
}

/// Stand-in for the LED strip: logs what would be shown.
struct LogStrip {
    pixel_count: usize,
    last: Option<LightingState>,
}

struct SystemClock;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("LEDSTRIP_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.ledstrip"));
    let store = FileStore::open(data_dir.join("settings.json")).unwrap_or_else(|err| {
        warn!("failed to open settings store, starting empty: {err:#}");
        FileStore::empty(data_dir.join("settings.json"))
    });

    let config = DeviceConfig::default();
    let device = DeviceState::boot(config.clone(), &store, SystemClock.monotonic_millis());
    let mut strip = LogStrip::new(config.pixel_count);
    device.apply_lighting(&mut strip);

    let app_state = AppState {
        controller: Arc::new(Mutex::new(Controller {
            device,
            store,
            strip,
        })),
    };

    spawn_control_loop(app_state.clone(), config.tick_interval_ms);

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let mut app = Router::new().route("/api/status", get(handle_get_status));
    for route in Route::ALL {
        app = app.route(
            route.path(),
            post(
                move |State(state): State<AppState>,
                      Query(params): Query<HashMap<String, String>>| async move {
                    handle_command(route, state, params).await
                },
            ),
        );
    }
    let app = app
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let mut controller = app_state.controller.lock().await;
    let Controller { device, store, .. } = &mut *controller;
    if let Err(err) = ledstrip_common::settings::save_epoch(store, device.rtc().now()) {
        warn!("failed to persist clock on shutdown: {err}");
    }
    info!("controller stopped");
    Ok(())
}

fn spawn_control_loop(app_state: AppState, tick_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now_ms = SystemClock.monotonic_millis();

            let mut controller = app_state.controller.lock().await;
            let Controller {
                device,
                store,
                strip,
            } = &mut *controller;
            for fired in device.tick(now_ms, store, strip) {
                info!("timer pair {} switched {}", fired.pair, fired.kind.as_str());
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.lock().await.device.status();
    Json(status)
}

async fn handle_command(
    route: Route,
    state: AppState,
    params: HashMap<String, String>,
) -> axum::response::Response {
    let command = match route.decode(&params) {
        Ok(command) => command,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let now_ms = SystemClock.monotonic_millis();
    let mut controller = state.controller.lock().await;
    let Controller {
        device,
        store,
        strip,
    } = &mut *controller;

    match device.handle(command, now_ms, store, strip) {
        Ok(status) => Json(status).into_response(),
        Err(err @ CoreError::InvalidArgument(_)) => {
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(err @ CoreError::Persistence(_)) => {
            warn!("{} not persisted: {err}", command.name());
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl FileStore {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let values = match std::fs::read(&path) {
            Ok(raw) => MemoryStore::from_json_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => MemoryStore::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        info!("settings store at {} ({} keys)", path.display(), values.len());
        Ok(Self { path, values })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            values: MemoryStore::new(),
        }
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = self.values.to_json_vec()?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn flush_key(&self, key: &str) -> Result<(), StoreError> {
        self.flush().map_err(|err| StoreError::Write {
            key: key.to_string(),
            reason: format!("{err:#}"),
        })
    }
}

impl SettingsStore for FileStore {
    fn get_u8(&self, key: &str, default: u8) -> Result<u8, StoreError> {
        self.values.get_u8(key, default)
    }

    fn get_i8(&self, key: &str, default: i8) -> Result<i8, StoreError> {
        self.values.get_i8(key, default)
    }

    fn get_u32(&self, key: &str, default: u32) -> Result<u32, StoreError> {
        self.values.get_u32(key, default)
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.values.put_u8(key, value)?;
        self.flush_key(key)
    }

    fn put_i8(&mut self, key: &str, value: i8) -> Result<(), StoreError> {
        self.values.put_i8(key, value)?;
        self.flush_key(key)
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        self.values.put_u32(key, value)?;
        self.flush_key(key)
    }
}

impl LogStrip {
    fn new(pixel_count: usize) -> Self {
        Self {
            pixel_count,
            last: None,
        }
    }
}

impl LightingSink for LogStrip {
    fn apply(&mut self, lighting: &LightingState) {
        if self.last.as_ref() == Some(lighting) {
            return;
        }
        let (red, green, blue) = lighting.scaled_rgb();
        info!(
            "strip: {} pixels at rgb({red}, {green}, {blue}) [brightness {}%]",
            self.pixel_count, lighting.brightness
        );
        self.last = Some(*lighting);
    }
}

impl MonotonicClock for SystemClock {
    fn monotonic_millis(&self) -> u64 {
        static START: OnceLock<Instant> = OnceLock::new();
        START
            .get_or_init(Instant::now)
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}
