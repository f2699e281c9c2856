use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AccessPointConfiguration, AuthMethod, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sys::EspError,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use ledstrip_common::{
    CoreError, DeviceConfig, DeviceState, MonotonicClock, SettingsStore, StoreError,
};

use crate::{
    api::{query_params, Route},
    pixels::PixelStrip,
};

const NVS_NAMESPACE: &str = "nvm_params";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const AP_SSID: &str = match option_env!("AP_SSID") {
    Some(ssid) => ssid,
    None => "ESP32-Weihnachten",
};
const AP_PASS: &str = match option_env!("AP_PASS") {
    Some(pass) => pass,
    None => "123456789",
};

const INDEX_HTML: &str = include_str!("../web/index.html");

type SharedState = Arc<Mutex<Controller>>;

struct Controller {
    device: DeviceState,
    store: NvsStore,
    strip: PixelStrip,
}

/// Typed settings in the `nvm_params` NVS namespace.
struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

/// Microseconds since boot from the high-resolution esp_timer.
struct EspTimerClock;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = NvsStore::open(nvs_partition.clone())?;
    let config = DeviceConfig::default();

    let Peripherals {
        modem, rmt, pins, ..
    } = Peripherals::take()?;
    let mut strip = match PixelStrip::new(rmt.channel0, pins.gpio18, config.pixel_count) {
        Ok(strip) => strip,
        Err(err) => {
            warn!("failed to initialize LED strip, running without output: {err:#}");
            PixelStrip::disabled(config.pixel_count)
        }
    };

    let device = DeviceState::boot(config.clone(), &store, EspTimerClock.monotonic_millis());
    device.apply_lighting(&mut strip);

    let wifi =
        start_access_point(modem, sys_loop, nvs_partition).context("wifi startup failed")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let state: SharedState = Arc::new(Mutex::new(Controller {
        device,
        store,
        strip,
    }));
    spawn_control_loop(state.clone(), config.tick_interval_ms)?;
    let server = create_http_server(state)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn start_access_point(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;

    let auth_method = if AP_PASS.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: AP_SSID
            .try_into()
            .map_err(|_| anyhow!("AP SSID too long"))?,
        password: AP_PASS
            .try_into()
            .map_err(|_| anyhow!("AP password too long"))?,
        auth_method,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    let ip = wifi.wifi().ap_netif().get_ip_info()?.ip;
    info!("access point `{AP_SSID}` up, controller at http://{ip}");
    Ok(wifi)
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let status = lock(&state).device.status();
            write_json(req, &status)
        })?;
    }

    for route in Route::ALL {
        let state = state.clone();
        server.fn_handler(route.path(), Method::Post, move |req| {
            let params = query_params(req.uri());
            let command = match route.decode(&params) {
                Ok(command) => command,
                Err(err) => return write_error(req, 400, &err.to_string()),
            };

            let now_ms = EspTimerClock.monotonic_millis();
            let result = {
                let mut controller = lock(&state);
                let Controller {
                    device,
                    store,
                    strip,
                } = &mut *controller;
                device.handle(command, now_ms, store, strip)
            };

            match result {
                Ok(status) => write_json(req, &status),
                Err(err @ CoreError::InvalidArgument(_)) => {
                    write_error(req, 400, &err.to_string())
                }
                Err(err @ CoreError::Persistence(_)) => {
                    warn!("{} not persisted: {err}", command.name());
                    write_error(req, 500, &err.to_string())
                }
            }
        })?;
    }

    Ok(server)
}

fn spawn_control_loop(state: SharedState, tick_interval_ms: u64) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            loop {
                feed_watchdog();
                let now_ms = EspTimerClock.monotonic_millis();

                {
                    let mut controller = lock(&state);
                    let Controller {
                        device,
                        store,
                        strip,
                    } = &mut *controller;
                    for fired in device.tick(now_ms, store, strip) {
                        info!("timer pair {} switched {}", fired.pair, fired.kind.as_str());
                    }
                }

                thread::sleep(Duration::from_millis(tick_interval_ms));
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn lock(state: &SharedState) -> MutexGuard<'_, Controller> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_json<T: Serialize>(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message }))?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

impl NvsStore {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .with_context(|| format!("failed to open NVS namespace `{NVS_NAMESPACE}`"))?;
        Ok(Self { nvs })
    }
}

fn nvs_read_error(key: &str, err: EspError) -> StoreError {
    StoreError::Read {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

fn nvs_write_error(key: &str, err: EspError) -> StoreError {
    StoreError::Write {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

// Unchanged values are not rewritten to spare flash.
impl SettingsStore for NvsStore {
    fn get_u8(&self, key: &str, default: u8) -> Result<u8, StoreError> {
        self.nvs
            .get_u8(key)
            .map(|value| value.unwrap_or(default))
            .map_err(|err| nvs_read_error(key, err))
    }

    fn get_i8(&self, key: &str, default: i8) -> Result<i8, StoreError> {
        self.nvs
            .get_i8(key)
            .map(|value| value.unwrap_or(default))
            .map_err(|err| nvs_read_error(key, err))
    }

    fn get_u32(&self, key: &str, default: u32) -> Result<u32, StoreError> {
        self.nvs
            .get_u32(key)
            .map(|value| value.unwrap_or(default))
            .map_err(|err| nvs_read_error(key, err))
    }

    fn put_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        if matches!(self.nvs.get_u8(key), Ok(Some(current)) if current == value) {
            return Ok(());
        }
        self.nvs
            .set_u8(key, value)
            .map_err(|err| nvs_write_error(key, err))
    }

    fn put_i8(&mut self, key: &str, value: i8) -> Result<(), StoreError> {
        if matches!(self.nvs.get_i8(key), Ok(Some(current)) if current == value) {
            return Ok(());
        }
        self.nvs
            .set_i8(key, value)
            .map_err(|err| nvs_write_error(key, err))
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), StoreError> {
        if matches!(self.nvs.get_u32(key), Ok(Some(current)) if current == value) {
            return Ok(());
        }
        self.nvs
            .set_u32(key, value)
            .map_err(|err| nvs_write_error(key, err))
    }
}

impl MonotonicClock for EspTimerClock {
    fn monotonic_millis(&self) -> u64 {
        let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
        u64::try_from(micros).unwrap_or(0) / 1_000
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    // INVALID_STATE: this task is already subscribed.
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
