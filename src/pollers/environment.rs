//! Environment sensor poller (C9, §4.9): every `ENV_POLL_INTERVAL`, read each
//! active sensor's ambient-temperature input register and insert one row.
//! Unlike the meter/ESS pollers, sensors are not vendor-tagged or
//! catalog-driven - they expose one fixed input register, so this poller
//! talks straight to the field-bus client.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use tokio::sync::Semaphore;

use crate::context::AppContext;
use crate::error::DeviceId;
use crate::fieldbus::{self, Endpoint};
use crate::register_map::FunctionCode;
use crate::store::{EnvironmentSensor, EnvironmentTelemetryRow};
use crate::ticker::run_cadenced;

/// Ambient-temperature input register: raw signed 16-bit, gain x10 (§4.9).
const TEMP_REGISTER: u16 = 0;
const TEMP_GAIN: f64 = 10.0;

pub async fn run(ctx: AppContext, sensors: Arc<Vec<EnvironmentSensor>>) {
    let period = ctx.config.env_poll_interval();
    let cancel = ctx.cancel.clone();
    run_cadenced(period, cancel, "environment-poller", move |cycle_start| {
        let ctx = ctx.clone();
        let sensors = sensors.clone();
        async move { poll_once(ctx, sensors, cycle_start).await }
    })
    .await;
}

async fn poll_once(ctx: AppContext, sensors: Arc<Vec<EnvironmentSensor>>, _cycle_start: Instant) {
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_parallel_polls));
    let mut tasks = Vec::with_capacity(sensors.len());

    for sensor in sensors.iter() {
        if ctx.breaker.should_skip(&DeviceId::EnvironmentSensor(sensor.sensor_id)) {
            continue;
        }
        let semaphore = semaphore.clone();
        let ctx = ctx.clone();
        let sensor = sensor.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            poll_sensor(&ctx, &sensor).await
        }));
    }

    for task in tasks {
        match task.await {
            Ok(Some(row)) => {
                if let Err(e) = ctx.store.insert_environment_telemetry(&row).await {
                    log::error!(
                        "[environment-poller] insert failed for sensor {}: {e}",
                        row.sensor_id
                    );
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("[environment-poller] poll task panicked: {e}"),
        }
    }
}

async fn poll_sensor(
    ctx: &AppContext,
    sensor: &EnvironmentSensor,
) -> Option<EnvironmentTelemetryRow> {
    let device = DeviceId::EnvironmentSensor(sensor.sensor_id);
    let endpoint = Endpoint {
        ip: sensor.ip.clone(),
        port: sensor.port,
        slave: sensor.slave_id,
    };

    let raw = fieldbus::read(device.clone(), &endpoint, TEMP_REGISTER, 1, FunctionCode::Input).await;
    let raw = match raw {
        Ok(regs) => regs,
        Err(e) => {
            log::warn!("[environment-poller] {device} poll failed: {e}");
            ctx.breaker.on_failure(device);
            return None;
        }
    };

    ctx.breaker.on_success(&device);
    let temperature = raw[0] as i16 as f64 / TEMP_GAIN;

    Some(EnvironmentTelemetryRow {
        sensor_id: sensor.sensor_id,
        measured_at: Utc::now().trunc_subsecs(0),
        temperature,
    })
}
